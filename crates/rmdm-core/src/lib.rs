//! Core domain model for RMDM: entities, storage layout, audit and result types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod table;

pub use table::{Cell, ColumnKind, Integer, Table, TableError};

pub const CRATE_NAME: &str = "rmdm-core";

/// Timestamp format shared by lineage copies and archived masters.
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A managed record type and the shape of its daily snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpec {
    pub name: String,
    pub primary_key: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

impl EntitySpec {
    pub fn new(name: &str, primary_key: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            primary_key: primary_key.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn layout(&self) -> EntityLayout<'_> {
        EntityLayout { entity: &self.name }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRegistry {
    pub entities: Vec<EntitySpec>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EntityRegistry {
    pub fn builtin() -> Self {
        Self {
            entities: vec![
                EntitySpec::new(
                    "customers",
                    "customer_id",
                    &[
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
                    ],
                ),
                EntitySpec::new(
                    "products",
                    "product_id",
                    &[
                        "product_id",
                        "product_name",
                        "category",
                        "price",
                        "cost",
                        "weight_kg",
                        "in_stock",
                        "created_at",
                    ],
                ),
                EntitySpec::new(
                    "suppliers",
                    "supplier_id",
                    &[
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
                    ],
                ),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Option<&EntitySpec> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.name.as_str())
    }
}

/// Storage key conventions for one entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityLayout<'a> {
    entity: &'a str,
}

impl<'a> EntityLayout<'a> {
    pub fn new(entity: &'a str) -> Self {
        Self { entity }
    }

    pub fn snapshot_key(&self, date: NaiveDate) -> String {
        format!("{0}/{0}_{1}.csv", self.entity, date.format("%Y-%m-%d"))
    }

    pub fn master_dir(&self) -> String {
        format!("master/{}/", self.entity)
    }

    pub fn master_key(&self) -> String {
        format!("{}{}_master.csv", self.master_dir(), self.entity)
    }

    pub fn timestamped_master_key(&self, at: DateTime<Utc>) -> String {
        format!("{}{}_master_{}.csv", self.master_dir(), self.entity, at.format(STAMP_FORMAT))
    }

    pub fn history_prefix(&self) -> String {
        format!("{}history/", self.master_dir())
    }

    pub fn history_key(&self, at: DateTime<Utc>) -> String {
        format!(
            "{}{}_master_{}.csv",
            self.history_prefix(),
            self.entity,
            at.format(STAMP_FORMAT)
        )
    }

    pub fn audit_log_key(&self) -> String {
        format!("{}audit/audit_log.jsonl", self.master_dir())
    }

    pub fn step_log_key(&self) -> String {
        format!("{}audit/step_log.csv", self.master_dir())
    }
}

/// Source of wall-clock time for stamps and durations.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStep {
    HashNew,
    HashCurrent,
    Compare,
    Download,
    Validate,
    CreateMaster,
    ArchiveCurrent,
    PruneHistory,
    WriteMaster,
    WarehouseLoad,
    Unchanged,
    Created,
    Mastered,
    Failed,
}

impl AuditStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStep::HashNew => "hash_new",
            AuditStep::HashCurrent => "hash_current",
            AuditStep::Compare => "compare",
            AuditStep::Download => "download",
            AuditStep::Validate => "validate",
            AuditStep::CreateMaster => "create_master",
            AuditStep::ArchiveCurrent => "archive_current",
            AuditStep::PruneHistory => "prune_history",
            AuditStep::WriteMaster => "write_master",
            AuditStep::WarehouseLoad => "warehouse_load",
            AuditStep::Unchanged => "unchanged",
            AuditStep::Created => "created",
            AuditStep::Mastered => "mastered",
            AuditStep::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuditStep::Unchanged | AuditStep::Created | AuditStep::Mastered | AuditStep::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Skipped,
    Warning,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Skipped => "skipped",
            AuditStatus::Warning => "warning",
            AuditStatus::Failed => "failed",
        }
    }
}

/// One immutable line of an entity's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub entity: String,
    pub source_file: String,
    pub step: AuditStep,
    pub status: AuditStatus,
    pub message: String,
    pub rows: Option<usize>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NewFileHashFailed,
    DownloadOrReadFailed,
    UploadFailed,
    CopyFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NewFileHashFailed => "new_file_hash_failed",
            FailureReason::DownloadOrReadFailed => "download_or_read_failed",
            FailureReason::UploadFailed => "upload_failed",
            FailureReason::CopyFailed => "copy_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseStatus {
    Success,
    PartialFailure,
    Failed,
}

/// Terminal state of one consolidation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConsolidationOutcome {
    Unchanged {
        fingerprint: String,
    },
    Created {
        master_path: String,
        timestamped_path: String,
    },
    Mastered {
        master_path: String,
        timestamped_path: String,
        archived_path: Option<String>,
    },
    Error {
        reason: FailureReason,
        detail: String,
    },
}

impl ConsolidationOutcome {
    pub fn action(&self) -> &'static str {
        match self {
            ConsolidationOutcome::Unchanged { .. } => "unchanged",
            ConsolidationOutcome::Created { .. } => "created",
            ConsolidationOutcome::Mastered { .. } => "mastered",
            ConsolidationOutcome::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConsolidationOutcome::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub run_id: Uuid,
    pub entity: String,
    pub source_file: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: ConsolidationOutcome,
    pub rows: Option<usize>,
    #[serde(rename = "bigquery_status", skip_serializing_if = "Option::is_none")]
    pub warehouse_status: Option<WarehouseStatus>,
    pub audit_entries: usize,
    pub audit_flushed: bool,
}

impl ConsolidationReport {
    /// Short human-readable status line for event callers.
    pub fn summary(&self) -> String {
        let mut line = format!("Mastering {}: {}", self.entity, self.outcome.action());
        if let ConsolidationOutcome::Error { reason, .. } = &self.outcome {
            line.push_str(&format!(" ({})", reason.as_str()));
        }
        if let Some(rows) = self.rows {
            line.push_str(&format!(", {rows} rows"));
        }
        if let Some(status) = self.warehouse_status {
            let status = match status {
                WarehouseStatus::Success => "success",
                WarehouseStatus::PartialFailure => "partial_failure",
                WarehouseStatus::Failed => "failed",
            };
            line.push_str(&format!(", warehouse load {status}"));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn layout_paths_follow_bucket_conventions() {
        let layout = EntityLayout::new("customers");
        let at = Utc.with_ymd_and_hms(2026, 2, 24, 13, 5, 9).single().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 2, 23).unwrap();

        assert_eq!(layout.snapshot_key(date), "customers/customers_2026-02-23.csv");
        assert_eq!(layout.master_dir(), "master/customers/");
        assert_eq!(layout.master_key(), "master/customers/customers_master.csv");
        assert_eq!(
            layout.timestamped_master_key(at),
            "master/customers/customers_master_20260224_130509.csv"
        );
        assert_eq!(
            layout.history_key(at),
            "master/customers/history/customers_master_20260224_130509.csv"
        );
        assert_eq!(layout.audit_log_key(), "master/customers/audit/audit_log.jsonl");
        assert_eq!(layout.step_log_key(), "master/customers/audit/step_log.csv");
    }

    #[test]
    fn builtin_registry_declares_primary_keys() {
        let registry = EntityRegistry::builtin();
        assert_eq!(registry.get("products").unwrap().primary_key, "product_id");
        assert_eq!(registry.names().collect::<Vec<_>>(), ["customers", "products", "suppliers"]);
        assert!(registry.get("orders").is_none());
    }

    #[test]
    fn error_outcome_serializes_with_action_and_reason() {
        let outcome = ConsolidationOutcome::Error {
            reason: FailureReason::NewFileHashFailed,
            detail: "missing".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["action"], "error");
        assert_eq!(json["reason"], "new_file_hash_failed");
    }
}
