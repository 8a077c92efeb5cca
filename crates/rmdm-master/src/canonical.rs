//! Order-independent content fingerprints for snapshots.

use std::fmt;

use rmdm_core::{Table, TableError};
use rmdm_storage::{ContentStore, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Hex SHA-256 over a snapshot's canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("snapshot not found: {key}")]
    NotFound { key: String },
    #[error("snapshot {key} is not valid tabular content: {source}")]
    Parse {
        key: String,
        #[source]
        source: TableError,
    },
    #[error(transparent)]
    Store(StoreError),
}

impl FingerprintError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FingerprintError::NotFound { .. })
    }
}

/// Reads and parses a stored snapshot.
pub async fn read_snapshot(store: &dyn ContentStore, key: &str) -> Result<Table, FingerprintError> {
    let bytes = store.read(key).await.map_err(|err| match err {
        StoreError::NotFound { key } => FingerprintError::NotFound { key },
        other => FingerprintError::Store(other),
    })?;
    Table::parse(&bytes).map_err(|source| FingerprintError::Parse {
        key: key.to_string(),
        source,
    })
}

pub async fn fingerprint(store: &dyn ContentStore, key: &str) -> Result<Fingerprint, FingerprintError> {
    let table = read_snapshot(store, key).await?;
    Ok(fingerprint_table(&table))
}

/// Header plus rows sorted by the full typed column tuple, written as CSV of
/// canonical cell text and hashed.
pub fn fingerprint_table(table: &Table) -> Fingerprint {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Sha256Writer(Sha256::new()));

    // Writes into a hasher never fail; an error here would be a csv bug.
    let _ = writer.write_record(table.columns());
    for row in table.sorted_row_indices() {
        let cells = table
            .typed_row(row)
            .iter()
            .map(|cell| cell.canonical())
            .collect::<Vec<_>>();
        let _ = writer.write_record(&cells);
    }

    let _ = writer.flush();
    Fingerprint(hex::encode(writer.get_ref().0.clone().finalize()))
}

struct Sha256Writer(Sha256);

impl std::io::Write for Sha256Writer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmdm_storage::{FaultOp, MemoryStore};

    fn fp(csv: &str) -> Fingerprint {
        fingerprint_table(&Table::parse(csv.as_bytes()).expect("parse"))
    }

    #[test]
    fn row_order_does_not_change_the_fingerprint() {
        assert_eq!(fp("id,x\n1,a\n2,b\n"), fp("id,x\n2,b\n1,a\n"));
    }

    #[test]
    fn sort_uses_every_column_not_just_the_key() {
        // Same key twice: only a full-row sort makes these permutations equal.
        assert_eq!(fp("id,x\n1,b\n1,a\n"), fp("id,x\n1,a\n1,b\n"));
    }

    #[test]
    fn any_cell_row_or_column_change_is_detected() {
        let base = fp("id,x\n1,a\n2,b\n");
        assert_ne!(base, fp("id,x\n1,a\n2,c\n"));
        assert_ne!(base, fp("id,x\n1,a\n"));
        assert_ne!(base, fp("id,x\n1,a\n2,b\n3,c\n"));
        assert_ne!(base, fp("id,x,y\n1,a,\n2,b,\n"));
        assert_ne!(base, fp("id\n1\n2\n"));
    }

    #[test]
    fn equivalent_number_spellings_share_a_fingerprint() {
        assert_eq!(fp("id,price\n1,1.50\n2,3.0\n"), fp("id,price\n2,3\n1,1.5\n"));
    }

    #[test]
    fn long_integer_changes_are_detected() {
        assert_ne!(
            fp("customer_id,account\nC1,123456789012345678901\n"),
            fp("customer_id,account\nC1,123456789012345678902\n")
        );
        assert_ne!(
            fp("customer_id,account\nC1,9223372036854775808\n"),
            fp("customer_id,account\nC1,9223372036854775809\n")
        );
        assert_eq!(
            fp("customer_id,account\nC1,0009223372036854775808\n"),
            fp("customer_id,account\nC1,9223372036854775808\n")
        );
    }

    #[test]
    fn digest_is_hex_sha256() {
        let digest = fp("id\n1\n");
        assert_eq!(digest.as_str().len(), 64);
        assert!(digest.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn missing_and_malformed_blobs_are_distinct_errors() {
        let store = MemoryStore::new("landing");
        let missing = fingerprint(&store, "customers/customers_2026-01-01.csv")
            .await
            .unwrap_err();
        assert!(missing.is_not_found());

        store.write("customers/bad.csv", b"a,b\n1\n", "text/csv").await.unwrap();
        let malformed = fingerprint(&store, "customers/bad.csv").await.unwrap_err();
        assert!(matches!(malformed, FingerprintError::Parse { .. }));

        store.write("customers/ok.csv", b"a\n1\n", "text/csv").await.unwrap();
        store.fail_on(FaultOp::Read, "customers/ok.csv");
        let unreadable = fingerprint(&store, "customers/ok.csv").await.unwrap_err();
        assert!(matches!(unreadable, FingerprintError::Store(_)));
    }
}
