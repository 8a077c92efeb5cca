//! Snapshot tables: CSV in, typed cells out.

use std::cmp::Ordering;
use std::fmt;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("snapshot is empty (no header row)")]
    Empty,
    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("header contains an empty column name at position {0}")]
    EmptyColumnName(usize),
    #[error("duplicate column name `{0}`")]
    DuplicateColumn(String),
    #[error("row {row} has {found} cells, header has {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

/// Integer of any width, kept as its normalized decimal digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Integer<'a> {
    negative: bool,
    digits: &'a str,
}

impl<'a> Integer<'a> {
    /// Accepts an optional sign followed by ASCII digits only.
    pub fn parse(raw: &'a str) -> Option<Self> {
        let (negative, unsigned) = match raw.as_bytes().first() {
            Some(b'-') => (true, &raw[1..]),
            Some(b'+') => (false, &raw[1..]),
            _ => (false, raw),
        };
        if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let digits = unsigned.trim_start_matches('0');
        if digits.is_empty() {
            return Some(Self {
                negative: false,
                digits: "0",
            });
        }
        Some(Self { negative, digits })
    }

    fn magnitude_cmp(&self, other: &Self) -> Ordering {
        self.digits
            .len()
            .cmp(&other.digits.len())
            .then_with(|| self.digits.cmp(other.digits))
    }
}

impl Ord for Integer<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, false) => self.magnitude_cmp(other),
            (true, true) => other.magnitude_cmp(self),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Integer<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Integer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        f.write_str(self.digits)
    }
}

/// A single typed cell borrowed from a table row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    Null,
    Int(Integer<'a>),
    Float(f64),
    Bool(bool),
    Text(&'a str),
}

impl Cell<'_> {
    pub fn canonical(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Int(v) => v.to_string(),
            // `{:?}` is the shortest round-trip form and always keeps a fractional part.
            Cell::Float(v) => format!("{v:?}"),
            Cell::Bool(true) => "True".to_string(),
            Cell::Bool(false) => "False".to_string(),
            Cell::Text(s) => (*s).to_string(),
        }
    }

    /// Total order within one column; nulls sort last.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Cell::Null, Cell::Null) => Ordering::Equal,
            (Cell::Null, _) => Ordering::Greater,
            (_, Cell::Null) => Ordering::Less,
            (Cell::Int(a), Cell::Int(b)) => a.cmp(b),
            (Cell::Float(a), Cell::Float(b)) => a.total_cmp(b),
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Cell::Int(_) => 0,
            Cell::Float(_) => 1,
            Cell::Bool(_) => 2,
            Cell::Text(_) => 3,
            Cell::Null => 4,
        }
    }
}

/// An in-memory snapshot: ordered columns plus raw string rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    kinds: Vec<ColumnKind>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, TableError> {
        let mut seen = HashSet::new();
        for (idx, name) in columns.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(TableError::EmptyColumnName(idx));
            }
            if !seen.insert(name.as_str()) {
                return Err(TableError::DuplicateColumn(name.clone()));
            }
        }
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(TableError::RaggedRow {
                    row: idx + 1,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
        }
        let kinds = (0..columns.len())
            .map(|col| infer_kind(rows.iter().map(|r| r[col].as_str())))
            .collect();
        Ok(Self {
            columns,
            kinds,
            rows,
        })
    }

    /// Parses UTF-8 CSV with a mandatory header row.
    pub fn parse(bytes: &[u8]) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(bytes);

        let header = reader.headers()?.clone();
        if header.is_empty() {
            return Err(TableError::Empty);
        }
        let columns = header.iter().map(str::to_string).collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Self::new(columns, rows)
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, TableError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|err| TableError::Csv(csv::Error::from(err.into_error())))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn kinds(&self) -> &[ColumnKind] {
        &self.kinds
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, col: usize) -> Cell<'_> {
        parse_cell(self.kinds[col], &self.rows[row][col])
    }

    pub fn typed_row(&self, row: usize) -> Vec<Cell<'_>> {
        (0..self.columns.len()).map(|col| self.cell(row, col)).collect()
    }

    pub fn cmp_rows(&self, a: usize, b: usize) -> Ordering {
        for col in 0..self.columns.len() {
            let ord = self.cell(a, col).total_cmp(&self.cell(b, col));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    pub fn sorted_row_indices(&self) -> Vec<usize> {
        let mut order = (0..self.rows.len()).collect::<Vec<_>>();
        order.sort_by(|&a, &b| self.cmp_rows(a, b));
        order
    }

    /// Key values that occur more than once, with their occurrence counts.
    pub fn duplicate_keys(&self, key_column: &str) -> BTreeMap<String, usize> {
        let Some(idx) = self.column_index(key_column) else {
            return BTreeMap::new();
        };
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row[idx].clone()).or_default() += 1;
        }
        counts.retain(|_, n| *n > 1);
        counts
    }

    /// Keeps master rows whose key is absent from `incoming` and takes every
    /// incoming row, last occurrence winning. Output is sorted by key.
    pub fn merge_by_key(&self, incoming: &Table, key_column: &str) -> Option<Table> {
        let master_key = self.column_index(key_column)?;
        let incoming_key = incoming.column_index(key_column)?;

        let mut columns = incoming.columns.clone();
        for name in &self.columns {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }

        let project = |table: &Table, row: &[String]| -> Vec<String> {
            columns
                .iter()
                .map(|name| {
                    table
                        .column_index(name)
                        .map(|i| row[i].clone())
                        .unwrap_or_default()
                })
                .collect()
        };

        let mut merged: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in &self.rows {
            merged.insert(row[master_key].clone(), project(self, row));
        }
        for row in &incoming.rows {
            merged.insert(row[incoming_key].clone(), project(incoming, row));
        }

        let mut rows = merged.into_values().collect::<Vec<_>>();
        let key_pos = columns.iter().position(|c| c == key_column)?;
        let kind = infer_kind(rows.iter().map(|r| r[key_pos].as_str()));
        rows.sort_by(|a, b| parse_cell(kind, &a[key_pos]).total_cmp(&parse_cell(kind, &b[key_pos])));

        Table::new(columns, rows).ok()
    }
}

fn infer_kind<'a>(values: impl Iterator<Item = &'a str> + Clone) -> ColumnKind {
    let present = values.filter(|v| !v.is_empty());
    if present.clone().all(|v| Integer::parse(v).is_some()) {
        ColumnKind::Int
    } else if present.clone().all(|v| v.parse::<f64>().is_ok()) {
        ColumnKind::Float
    } else if present.clone().all(|v| parse_bool(v).is_some()) {
        ColumnKind::Bool
    } else {
        ColumnKind::Text
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "True" | "true" | "TRUE" => Some(true),
        "False" | "false" | "FALSE" => Some(false),
        _ => None,
    }
}

fn parse_cell(kind: ColumnKind, raw: &str) -> Cell<'_> {
    if raw.is_empty() {
        return Cell::Null;
    }
    match kind {
        ColumnKind::Int => Integer::parse(raw).map(Cell::Int).unwrap_or(Cell::Text(raw)),
        ColumnKind::Float => raw.parse().map(Cell::Float).unwrap_or(Cell::Text(raw)),
        ColumnKind::Bool => parse_bool(raw).map(Cell::Bool).unwrap_or(Cell::Text(raw)),
        ColumnKind::Text => Cell::Text(raw),
    }
}
