//! "Object finalized" notifications: relevance filtering and dispatch.

use rmdm_core::{ConsolidationReport, EntityRegistry, EntitySpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::engine::MasterEngine;

pub const NOT_RELEVANT: &str = "File not relevant";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("event has no object name")]
    MissingName,
    #[error("event for bucket `{actual}` but this service watches `{expected}`")]
    BucketMismatch { expected: String, actual: String },
    #[error("object name `{0}` is not a valid key")]
    InvalidName(String),
}

impl FileEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            bucket: None,
            name: name.into(),
        }
    }

    pub fn validate(&self, expected_bucket: &str) -> Result<(), EventError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(EventError::MissingName);
        }
        if let Some(bucket) = &self.bucket {
            if bucket != expected_bucket {
                return Err(EventError::BucketMismatch {
                    expected: expected_bucket.to_string(),
                    actual: bucket.clone(),
                });
            }
        }
        if rmdm_storage::validate_key(name).is_err() {
            return Err(EventError::InvalidName(self.name.clone()));
        }
        Ok(())
    }
}

/// Matches `<entity>/<anything>.csv` against the registry. Master outputs
/// live under `master/` and never match.
pub fn classify<'r>(registry: &'r EntityRegistry, name: &str) -> Option<&'r EntitySpec> {
    let (dir, file) = name.split_once('/')?;
    if file.is_empty() || !file.ends_with(".csv") {
        return None;
    }
    registry.get(dir)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum EventDisposition {
    Ignored { name: String },
    Consolidated(ConsolidationReport),
}

impl EventDisposition {
    pub fn status_line(&self) -> String {
        match self {
            EventDisposition::Ignored { .. } => NOT_RELEVANT.to_string(),
            EventDisposition::Consolidated(report) => report.summary(),
        }
    }
}

/// Validates the event and, when it names a registered entity's snapshot,
/// runs one consolidation to completion.
pub async fn handle_event(
    engine: &MasterEngine,
    registry: &EntityRegistry,
    event: &FileEvent,
) -> Result<EventDisposition, EventError> {
    event.validate(engine.store().bucket())?;
    let name = event.name.trim();
    let Some(entity) = classify(registry, name) else {
        info!(name, "ignoring object outside watched entity prefixes");
        return Ok(EventDisposition::Ignored {
            name: name.to_string(),
        });
    };
    let report = engine.consolidate(entity, name).await;
    Ok(EventDisposition::Consolidated(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rmdm_storage::{ContentStore, MemoryStore};

    use crate::engine::EngineOptions;

    #[test]
    fn classify_requires_entity_prefix_and_csv_suffix() {
        let registry = EntityRegistry::builtin();
        assert_eq!(
            classify(&registry, "customers/customers_2026-01-01.csv").map(|e| e.name.as_str()),
            Some("customers")
        );
        assert!(classify(&registry, "customers/customers_2026-01-01.json").is_none());
        assert!(classify(&registry, "orders/orders_2026-01-01.csv").is_none());
        assert!(classify(&registry, "master/customers/customers_master.csv").is_none());
        assert!(classify(&registry, "customers.csv").is_none());
    }

    #[test]
    fn validate_rejects_empty_names_and_foreign_buckets() {
        assert_eq!(FileEvent::new("  ").validate("landing"), Err(EventError::MissingName));
        let foreign = FileEvent {
            bucket: Some("other".into()),
            name: "customers/a.csv".into(),
        };
        assert!(matches!(
            foreign.validate("landing"),
            Err(EventError::BucketMismatch { .. })
        ));
        assert!(matches!(
            FileEvent::new("customers/../x.csv").validate("landing"),
            Err(EventError::InvalidName(_))
        ));
        assert!(FileEvent::new("customers/a.csv").validate("landing").is_ok());
    }

    #[test]
    fn event_without_bucket_deserializes() {
        let event: FileEvent = serde_json::from_str(r#"{"name":"products/p.csv"}"#).unwrap();
        assert_eq!(event, FileEvent::new("products/p.csv"));
    }

    #[tokio::test]
    async fn irrelevant_paths_are_ignored_without_side_effects() {
        let store = Arc::new(MemoryStore::new("landing"));
        let engine = MasterEngine::new(store.clone(), EngineOptions::default());
        let registry = EntityRegistry::builtin();

        let outcome = handle_event(&engine, &registry, &FileEvent::new("reports/daily.pdf"))
            .await
            .unwrap();
        assert_eq!(outcome.status_line(), NOT_RELEVANT);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn relevant_event_runs_consolidation() {
        let store = Arc::new(MemoryStore::new("landing"));
        store
            .write(
                "suppliers/suppliers_2026-01-01.csv",
                b"supplier_id,name\nS000001,Acme\n",
                "text/csv",
            )
            .await
            .unwrap();
        let engine = MasterEngine::new(store.clone(), EngineOptions::default());
        let registry = EntityRegistry::builtin();
        let event = FileEvent {
            bucket: Some("landing".into()),
            name: "suppliers/suppliers_2026-01-01.csv".into(),
        };

        let outcome = handle_event(&engine, &registry, &event).await.unwrap();
        assert_eq!(outcome.status_line(), "Mastering suppliers: created, 1 rows");
        assert!(store.get("master/suppliers/suppliers_master.csv").is_some());
    }
}
