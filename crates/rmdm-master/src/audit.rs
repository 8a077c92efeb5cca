//! Per-run audit buffering and the append-only per-entity audit log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rmdm_core::{AuditEntry, AuditStatus, AuditStep, Clock, EntityLayout};
use rmdm_storage::{ContentStore, StoreError, CSV_CONTENT_TYPE, JSONL_CONTENT_TYPE};
use thiserror::Error;
use uuid::Uuid;

const STEP_LOG_HEADER: [&str; 9] = [
    "timestamp",
    "run_id",
    "entity",
    "source_file",
    "step",
    "status",
    "message",
    "rows",
    "duration_ms",
];

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("writing {log}: {source}")]
    Write {
        log: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("encoding audit entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("writing step log: {0}")]
    Csv(#[from] csv::Error),
    #[error("audit log line {line} is not a valid entry: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Entries recorded during one consolidation run, owned by that run and
/// flushed once it reaches a terminal state.
pub struct AuditTrail {
    run_id: Uuid,
    entity: String,
    source_file: String,
    clock: Arc<dyn Clock>,
    last_mark: DateTime<Utc>,
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    pub fn new(run_id: Uuid, entity: &str, source_file: &str, clock: Arc<dyn Clock>) -> Self {
        let last_mark = clock.now();
        Self {
            run_id,
            entity: entity.to_string(),
            source_file: source_file.to_string(),
            clock,
            last_mark,
            entries: Vec::new(),
        }
    }

    /// Records a step; its duration is the time since the previous entry.
    pub fn record(
        &mut self,
        step: AuditStep,
        status: AuditStatus,
        message: impl Into<String>,
        rows: Option<usize>,
    ) {
        let now = self.clock.now();
        let duration_ms = (now - self.last_mark).num_milliseconds().max(0) as u64;
        self.last_mark = now;
        self.entries.push(AuditEntry {
            timestamp: now,
            run_id: self.run_id,
            entity: self.entity.clone(),
            source_file: self.source_file.clone(),
            step,
            status,
            message: message.into(),
            rows,
            duration_ms,
        });
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<AuditEntry> {
        self.entries
    }
}

/// Append-only JSONL log plus a CSV step log under `master/<entity>/audit/`.
///
/// The JSONL log is authoritative and written first; the step log is a
/// derived view that may lag it when its own write fails.
pub struct AuditLog<'a> {
    store: &'a dyn ContentStore,
}

impl<'a> AuditLog<'a> {
    pub fn new(store: &'a dyn ContentStore) -> Self {
        Self { store }
    }

    pub async fn append(&self, entity: &str, entries: &[AuditEntry]) -> Result<(), AuditError> {
        if entries.is_empty() {
            return Ok(());
        }
        let layout = EntityLayout::new(entity);

        let mut jsonl = self.read_or_empty(&layout.audit_log_key()).await?;
        if !jsonl.is_empty() && !jsonl.ends_with(b"\n") {
            jsonl.push(b'\n');
        }
        for entry in entries {
            serde_json::to_writer(&mut jsonl, entry)?;
            jsonl.push(b'\n');
        }

        let step_log = self.read_or_empty(&layout.step_log_key()).await?;
        let needs_header = step_log.is_empty();
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(step_log);
        if needs_header {
            writer.write_record(STEP_LOG_HEADER)?;
        }
        for entry in entries {
            writer.write_record([
                entry.timestamp.to_rfc3339(),
                entry.run_id.to_string(),
                entry.entity.clone(),
                entry.source_file.clone(),
                entry.step.as_str().to_string(),
                entry.status.as_str().to_string(),
                entry.message.clone(),
                entry.rows.map(|r| r.to_string()).unwrap_or_default(),
                entry.duration_ms.to_string(),
            ])?;
        }
        let step_log = writer
            .into_inner()
            .map_err(|err| AuditError::Csv(csv::Error::from(err.into_error())))?;

        self.store
            .write(&layout.audit_log_key(), &jsonl, JSONL_CONTENT_TYPE)
            .await
            .map_err(|source| AuditError::Write {
                log: "audit_log.jsonl",
                source,
            })?;
        self.store
            .write(&layout.step_log_key(), &step_log, CSV_CONTENT_TYPE)
            .await
            .map_err(|source| AuditError::Write {
                log: "step_log.csv",
                source,
            })?;
        Ok(())
    }

    /// Every entry ever appended for `entity`, in append order.
    pub async fn replay(&self, entity: &str) -> Result<Vec<AuditEntry>, AuditError> {
        let bytes = self
            .read_or_empty(&EntityLayout::new(entity).audit_log_key())
            .await?;
        String::from_utf8_lossy(&bytes)
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|source| AuditError::Decode {
                    line: idx + 1,
                    source,
                })
            })
            .collect()
    }

    async fn read_or_empty(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        match self.store.read(key).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }
}
