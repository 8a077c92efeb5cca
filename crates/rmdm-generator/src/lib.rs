//! Synthetic daily snapshot fabrication for customers, products and suppliers.
//!
//! Output is a pure function of `(seed, date)`: a base population is drawn
//! from the seed, then every day since [`epoch`] applies a small, seeded
//! batch of modifications and additions. Re-running a date reproduces the
//! same bytes, consecutive dates differ.

use chrono::{Datelike, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rmdm_core::{EntityLayout, Table, TableError};
use rmdm_storage::{ContentStore, StoreError, CSV_CONTENT_TYPE};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

mod words;

use words::*;

pub const CRATE_NAME: &str = "rmdm-generator";

pub const DEFAULT_SEED: u64 = 42;

/// First day of simulated history; dates before it get the base population.
pub fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("building snapshot table: {0}")]
    Table(#[from] TableError),
    #[error("publishing snapshot: {0}")]
    Store(#[from] StoreError),
    #[error("encoding modification history: {0}")]
    History(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorConfig {
    pub seed: u64,
    pub rows: usize,
    /// Fraction of rows modified per simulated day.
    pub change_rate: f64,
    /// Fraction of rows added per simulated day.
    pub growth_rate: f64,
    /// Fraction of rows duplicated under a `DUP…` key on duplicate days.
    pub duplicate_rate: f64,
}

impl GeneratorConfig {
    pub fn for_entity(entity: &str, seed: u64) -> Self {
        let (rows, duplicate_rate) = match entity {
            "customers" => (10_000, 0.0),
            "products" => (2_000, 0.0),
            "suppliers" => (500, 0.05),
            _ => (1_000, 0.0),
        };
        Self {
            seed,
            rows,
            change_rate: 0.002,
            growth_rate: 0.001,
            duplicate_rate,
        }
    }

    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }
}

pub trait SnapshotGenerator: Send + Sync {
    fn entity(&self) -> &'static str;
    fn generate(&self, date: NaiveDate) -> Result<Table, GenerateError>;
}

pub fn generator_for_entity(
    entity: &str,
    config: GeneratorConfig,
) -> Option<Box<dyn SnapshotGenerator>> {
    match entity {
        "customers" => Some(Box::new(Evolving::<Customers>::new(config))),
        "products" => Some(Box::new(Evolving::<Products>::new(config))),
        "suppliers" => Some(Box::new(Evolving::<Suppliers>::new(config))),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct PublishedSnapshot {
    pub entity: String,
    pub key: String,
    pub rows: usize,
    pub bytes: usize,
}

pub async fn publish_daily(
    store: &dyn ContentStore,
    generator: &dyn SnapshotGenerator,
    date: NaiveDate,
) -> Result<PublishedSnapshot, GenerateError> {
    let table = generator.generate(date)?;
    let bytes = table.to_csv()?;
    let key = EntityLayout::new(generator.entity()).snapshot_key(date);
    store.write(&key, &bytes, CSV_CONTENT_TYPE).await?;
    info!(entity = generator.entity(), %key, rows = table.row_count(), "published daily snapshot");
    Ok(PublishedSnapshot {
        entity: generator.entity().to_string(),
        key,
        rows: table.row_count(),
        bytes: bytes.len(),
    })
}

#[derive(Debug, Clone, Serialize)]
struct Change {
    date: String,
    field: &'static str,
    old: Option<String>,
    new: String,
}

/// Per-entity fabrication rules plugged into [`Evolving`].
trait Fabricator: Send + Sync + 'static {
    const ENTITY: &'static str;
    const COLUMNS: &'static [&'static str];

    fn fabricate(rng: &mut StdRng, ordinal: usize, date: NaiveDate) -> Vec<String>;

    /// Mutates one field in place and reports what changed.
    fn mutate(rng: &mut StdRng, row: &mut [String]) -> Change;

    fn duplicate_on(_date: NaiveDate) -> bool {
        false
    }

    fn column(name: &str) -> Option<usize> {
        Self::COLUMNS.iter().position(|c| *c == name)
    }
}

struct Evolving<F> {
    config: GeneratorConfig,
    _rules: std::marker::PhantomData<F>,
}

impl<F: Fabricator> Evolving<F> {
    fn new(config: GeneratorConfig) -> Self {
        Self {
            config,
            _rules: std::marker::PhantomData,
        }
    }

    fn day_rng(&self, salt: u64) -> StdRng {
        StdRng::seed_from_u64(self.config.seed ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    fn per_day(&self, rate: f64, population: usize) -> usize {
        (population as f64 * rate).ceil() as usize
    }
}

impl<F: Fabricator> SnapshotGenerator for Evolving<F> {
    fn entity(&self) -> &'static str {
        F::ENTITY
    }

    fn generate(&self, date: NaiveDate) -> Result<Table, GenerateError> {
        let last_modified = F::column("last_modified");
        let history_col = F::column("modification_history");

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let epoch = epoch();
        let base_date = epoch.min(date);
        let mut rows = (0..self.config.rows)
            .map(|i| F::fabricate(&mut rng, i + 1, base_date))
            .collect::<Vec<_>>();
        let mut histories: Vec<Vec<Change>> = vec![Vec::new(); rows.len()];

        let days = (date - epoch).num_days().max(0) as u64;
        for day in 1..=days {
            let today = epoch + chrono::Days::new(day);
            let stamp = today.format("%Y-%m-%d 00:00:00").to_string();
            let mut rng = self.day_rng(day);

            for _ in 0..self.per_day(self.config.change_rate, rows.len()) {
                let idx = rng.random_range(0..rows.len().max(1));
                let Some(row) = rows.get_mut(idx) else {
                    break;
                };
                let mut change = F::mutate(&mut rng, row);
                change.date = stamp.clone();
                if let Some(col) = last_modified {
                    row[col] = stamp.clone();
                }
                histories[idx].push(change);
            }

            for _ in 0..self.per_day(self.config.growth_rate, rows.len()) {
                let ordinal = rows.len() + 1;
                rows.push(F::fabricate(&mut rng, ordinal, today));
                histories.push(vec![Change {
                    date: stamp.clone(),
                    field: "created",
                    old: None,
                    new: "created".to_string(),
                }]);
            }
        }

        if let Some(col) = history_col {
            for (row, history) in rows.iter_mut().zip(&histories) {
                row[col] = serde_json::to_string(history)?;
            }
        }

        if F::duplicate_on(date) && self.config.duplicate_rate > 0.0 && !rows.is_empty() {
            let mut rng = self.day_rng(u64::MAX - days);
            let amount = self.per_day(self.config.duplicate_rate, rows.len()).min(rows.len());
            let picks = rand::seq::index::sample(&mut rng, rows.len(), amount).into_vec();
            for idx in picks {
                let mut dup = rows[idx].clone();
                let mut change = F::mutate(&mut rng, &mut dup);
                change.date = date.format("%Y-%m-%d 00:00:00").to_string();
                dup[0] = format!("DUP{idx:06}");
                if let Some(col) = last_modified {
                    dup[col] = change.date.clone();
                }
                if let Some(col) = history_col {
                    dup[col] = serde_json::to_string(&[change])?;
                }
                rows.push(dup);
            }
        }

        let columns = F::COLUMNS.iter().map(|c| c.to_string()).collect();
        Ok(Table::new(columns, rows)?)
    }
}

fn company(rng: &mut StdRng) -> String {
    format!(
        "{} {}",
        COMPANY_STEMS.choose(rng).copied().unwrap_or("Acme"),
        COMPANY_SUFFIXES.choose(rng).copied().unwrap_or("Ltd")
    )
}

fn street(rng: &mut StdRng) -> String {
    format!(
        "{} {}",
        rng.random_range(1..300),
        STREETS.choose(rng).copied().unwrap_or("Main Street")
    )
}

fn place(rng: &mut StdRng) -> &'static Place {
    PLACES.choose(rng).unwrap_or(&PLACES[0])
}

fn email_for(company: &str) -> String {
    let domain = company
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>();
    format!("contact@{domain}.com")
}

fn phone(rng: &mut StdRng) -> String {
    format!(
        "+{} {:03} {:03} {:04}",
        rng.random_range(1..99),
        rng.random_range(100..999),
        rng.random_range(100..999),
        rng.random_range(0..9999)
    )
}

fn bool_text(value: bool) -> String {
    if value { "True" } else { "False" }.to_string()
}

fn swap(row: &mut [String], col: usize, new: String, field: &'static str) -> Change {
    let old = std::mem::replace(&mut row[col], new.clone());
    Change {
        date: String::new(),
        field,
        old: Some(old),
        new,
    }
}

struct Customers;

impl Fabricator for Customers {
    const ENTITY: &'static str = "customers";
    const COLUMNS: &'static [&'static str] = &[
        "customer_id",
        "company_name",
        "vat_number",
        "address",
        "postal_code",
        "city",
        "country",
        "currency",
        "email",
        "phone",
        "industry",
        "created_at",
        "last_modified",
        "customer_segment",
        "is_active",
        "modification_history",
    ];

    fn fabricate(rng: &mut StdRng, ordinal: usize, date: NaiveDate) -> Vec<String> {
        let name = company(rng);
        let place = place(rng);
        let stamp = date.format("%Y-%m-%d 00:00:00").to_string();
        vec![
            format!("C{ordinal:06}"),
            name.clone(),
            format!("{}{}", place.code, rng.random_range(100_000_000..999_999_999u32)),
            street(rng),
            format!("{:05}", rng.random_range(1000..99999)),
            place.city.to_string(),
            place.country.to_string(),
            place.currency.to_string(),
            email_for(&name),
            phone(rng),
            INDUSTRIES.choose(rng).copied().unwrap_or("Retail").to_string(),
            stamp.clone(),
            stamp,
            SEGMENTS.choose(rng).copied().unwrap_or("SME").to_string(),
            bool_text(rng.random_bool(0.5)),
            "[]".to_string(),
        ]
    }

    fn mutate(rng: &mut StdRng, row: &mut [String]) -> Change {
        match rng.random_range(0..3) {
            0 => swap(row, 3, street(rng), "address"),
            1 => {
                let segment = SEGMENTS.choose(rng).copied().unwrap_or("SME").to_string();
                swap(row, 13, segment, "customer_segment")
            }
            _ => {
                let active = bool_text(row[14] != "True");
                swap(row, 14, active, "is_active")
            }
        }
    }
}

struct Products;

impl Fabricator for Products {
    const ENTITY: &'static str = "products";
    const COLUMNS: &'static [&'static str] = &[
        "product_id",
        "product_name",
        "category",
        "price",
        "cost",
        "weight_kg",
        "in_stock",
        "created_at",
    ];

    fn fabricate(rng: &mut StdRng, ordinal: usize, date: NaiveDate) -> Vec<String> {
        let price: f64 = rng.random_range(10.0..1000.0);
        vec![
            format!("P{ordinal:05}"),
            format!(
                "{} {}",
                PRODUCT_WORDS.choose(rng).copied().unwrap_or("Core"),
                PRODUCT_TIERS.choose(rng).copied().unwrap_or("Pro")
            ),
            CATEGORIES.choose(rng).copied().unwrap_or("Accessories").to_string(),
            format!("{price:.2}"),
            format!("{:.2}", price * rng.random_range(0.4..0.9_f64)),
            format!("{:.2}", rng.random_range(0.1..20.0_f64)),
            bool_text(rng.random_bool(0.5)),
            date.format("%Y-%m-%d 00:00:00").to_string(),
        ]
    }

    fn mutate(rng: &mut StdRng, row: &mut [String]) -> Change {
        if rng.random_bool(0.5) {
            let price = format!("{:.2}", rng.random_range(10.0..1000.0_f64));
            swap(row, 3, price, "price")
        } else {
            let in_stock = bool_text(row[6] != "True");
            swap(row, 6, in_stock, "in_stock")
        }
    }
}

struct Suppliers;

impl Fabricator for Suppliers {
    const ENTITY: &'static str = "suppliers";
    const COLUMNS: &'static [&'static str] = &[
        "supplier_id",
        "company_name",
        "service_type",
        "address",
        "postal_code",
        "city",
        "country",
        "email",
        "phone",
        "created_at",
        "last_modified",
        "is_active",
        "modification_history",
    ];

    fn fabricate(rng: &mut StdRng, ordinal: usize, date: NaiveDate) -> Vec<String> {
        let name = company(rng);
        let place = place(rng);
        let stamp = date.format("%Y-%m-%d 00:00:00").to_string();
        vec![
            format!("S{ordinal:06}"),
            name.clone(),
            SERVICES.choose(rng).copied().unwrap_or("IT").to_string(),
            street(rng),
            format!("{:05}", rng.random_range(1000..99999)),
            place.city.to_string(),
            place.country.to_string(),
            email_for(&name),
            phone(rng),
            stamp.clone(),
            stamp,
            bool_text(rng.random_bool(0.5)),
            "[]".to_string(),
        ]
    }

    fn mutate(rng: &mut StdRng, row: &mut [String]) -> Change {
        if rng.random_bool(0.5) {
            swap(row, 3, street(rng), "address")
        } else {
            let name = format!(
                "{} {}",
                company(rng),
                LEGAL_FORMS.choose(rng).copied().unwrap_or("SA")
            );
            swap(row, 1, name, "company_name")
        }
    }

    fn duplicate_on(date: NaiveDate) -> bool {
        date.weekday() == Weekday::Tue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmdm_storage::MemoryStore;

    fn small(entity: &str) -> Box<dyn SnapshotGenerator> {
        generator_for_entity(entity, GeneratorConfig::for_entity(entity, 42).with_rows(50))
            .expect("registered generator")
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn columns_match_entity_contracts() {
        let customers = small("customers").generate(day(2025, 3, 1)).unwrap();
        assert_eq!(customers.columns()[0], "customer_id");
        assert_eq!(customers.columns().len(), 16);

        let products = small("products").generate(day(2025, 3, 1)).unwrap();
        assert_eq!(
            products.columns(),
            ["product_id", "product_name", "category", "price", "cost", "weight_kg", "in_stock", "created_at"]
        );

        let suppliers = small("suppliers").generate(day(2025, 3, 1)).unwrap();
        assert_eq!(suppliers.columns()[0], "supplier_id");
        assert!(generator_for_entity("orders", GeneratorConfig::for_entity("orders", 1)).is_none());
    }

    #[test]
    fn same_seed_and_date_reproduce_identical_bytes() {
        let generator = small("customers");
        let a = generator.generate(day(2025, 2, 10)).unwrap().to_csv().unwrap();
        let b = generator.generate(day(2025, 2, 10)).unwrap().to_csv().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn consecutive_days_drift() {
        let generator = small("products");
        let monday = generator.generate(day(2025, 2, 10)).unwrap();
        let tuesday = generator.generate(day(2025, 2, 11)).unwrap();
        assert_ne!(monday, tuesday);
        assert!(tuesday.row_count() >= monday.row_count());
    }

    #[test]
    fn suppliers_gain_duplicate_rows_on_tuesdays() {
        let generator = small("suppliers");
        let tuesday = generator.generate(day(2025, 2, 11)).unwrap();
        let wednesday = generator.generate(day(2025, 2, 12)).unwrap();
        let dup_count = |t: &Table| t.rows().iter().filter(|r| r[0].starts_with("DUP")).count();
        assert!(dup_count(&tuesday) > 0);
        assert_eq!(dup_count(&wednesday), 0);
    }

    #[tokio::test]
    async fn publish_writes_dated_snapshot_key() {
        let store = MemoryStore::new("landing");
        let published = publish_daily(&store, small("suppliers").as_ref(), day(2025, 2, 12))
            .await
            .unwrap();
        assert_eq!(published.key, "suppliers/suppliers_2025-02-12.csv");
        let bytes = store.get(&published.key).unwrap();
        assert_eq!(Table::parse(&bytes).unwrap().row_count(), published.rows);
    }
}
