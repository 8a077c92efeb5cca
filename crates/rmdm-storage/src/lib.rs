//! Content store adapters + warehouse load client for RMDM.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

mod local;
mod memory;
mod warehouse;

pub use local::LocalFsStore;
pub use memory::{FaultOp, MemoryStore};
pub use warehouse::{
    classify_reqwest_error, classify_status, BackoffPolicy, HttpClientConfig, HttpWarehouseLoader,
    LoadError, LoadReport, LoadRequest, RetryDisposition, WarehouseLoader, WriteMode,
};

pub const CRATE_NAME: &str = "rmdm-storage";

pub const CSV_CONTENT_TYPE: &str = "text/csv";
pub const JSONL_CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub created: DateTime<Utc>,
    /// Monotonic write counter where the backend has one; 0 otherwise.
    pub generation: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },
    #[error("invalid object key `{key}`: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("io error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("store rejected {op} on {key}: {reason}")]
    Rejected {
        op: &'static str,
        key: String,
        reason: String,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub(crate) fn io(key: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound {
                key: key.to_string(),
            }
        } else {
            StoreError::Io {
                key: key.to_string(),
                source,
            }
        }
    }
}

/// Named blobs under a bucket namespace.
#[async_trait]
pub trait ContentStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Fully qualified location handed to external consumers such as the warehouse.
    fn uri(&self, key: &str) -> String;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn write(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StoreError>;

    async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError>;
}

/// Rejects keys that could escape the bucket or alias another key.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = |reason| {
        Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };
    if key.is_empty() {
        return invalid("empty key");
    }
    if key.starts_with('/') || key.contains('\\') {
        return invalid("keys are relative and `/`-separated");
    }
    for segment in key.split('/') {
        match segment {
            "" => return invalid("empty path segment"),
            "." | ".." => return invalid("relative path segment"),
            s if s.starts_with(".tmp-") => return invalid("reserved temp-file prefix"),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation_rejects_escapes() {
        assert!(validate_key("master/customers/customers_master.csv").is_ok());
        for bad in ["", "/abs", "a//b", "a/../b", "./a", "a/", "a\\b", "a/.tmp-x"] {
            assert!(
                matches!(validate_key(bad), Err(StoreError::InvalidKey { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = StoreError::io("x.csv", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.is_not_found());
    }
}
