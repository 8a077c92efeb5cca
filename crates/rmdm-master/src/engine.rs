//! Master consolidation: fingerprint comparison, archive-then-publish, audit.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rmdm_core::{
    AuditStatus, AuditStep, Clock, ConsolidationOutcome, ConsolidationReport, EntityLayout,
    EntitySpec, FailureReason, SystemClock, Table, WarehouseStatus,
};
use rmdm_storage::{ContentStore, LoadRequest, WarehouseLoader, WriteMode, CSV_CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::audit::{AuditLog, AuditTrail};
use crate::canonical::{fingerprint, fingerprint_table, read_snapshot, Fingerprint, FingerprintError};
use crate::history::HistoryManager;

pub const DEFAULT_MAX_VERSIONS: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    FullReplace,
    // Upsert by primary key; no deletions.
    Incremental,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_versions: usize,
    pub strategy: MergeStrategy,
    pub dataset: String,
    pub project_id: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_versions: DEFAULT_MAX_VERSIONS,
            strategy: MergeStrategy::FullReplace,
            dataset: "retail_data".to_string(),
            project_id: None,
        }
    }
}

/// Consolidates daily snapshots into one master per entity.
///
/// Assumes a single writer per entity: the archive-then-overwrite sequence is
/// not guarded against a concurrent run for the same entity. Runs for
/// different entities touch disjoint keys and may proceed in parallel.
pub struct MasterEngine {
    store: Arc<dyn ContentStore>,
    clock: Arc<dyn Clock>,
    loader: Option<Arc<dyn WarehouseLoader>>,
    options: EngineOptions,
}

struct RunFailure {
    reason: FailureReason,
    detail: String,
}

impl RunFailure {
    fn new(reason: FailureReason, detail: impl ToString) -> Self {
        Self {
            reason,
            detail: detail.to_string(),
        }
    }
}

struct Committed {
    outcome: ConsolidationOutcome,
    rows: Option<usize>,
}

enum CurrentMaster {
    Absent,
    Present(Fingerprint),
    Unreadable,
}

impl MasterEngine {
    pub fn new(store: Arc<dyn ContentStore>, options: EngineOptions) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            loader: None,
            options,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn WarehouseLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Runs one consolidation to a terminal state; failures land in the outcome.
    pub async fn consolidate(&self, entity: &EntitySpec, snapshot_key: &str) -> ConsolidationReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("consolidate", %run_id, entity = %entity.name, source_file = snapshot_key);
        self.run(run_id, entity, snapshot_key).instrument(span).await
    }

    async fn run(&self, run_id: Uuid, entity: &EntitySpec, snapshot_key: &str) -> ConsolidationReport {
        let started_at = self.clock.now();
        let mut trail = AuditTrail::new(run_id, &entity.name, snapshot_key, self.clock.clone());

        let (outcome, rows) = match self.transition(entity, snapshot_key, &mut trail).await {
            Ok(committed) => (committed.outcome, committed.rows),
            Err(failure) => (
                ConsolidationOutcome::Error {
                    reason: failure.reason,
                    detail: failure.detail,
                },
                None,
            ),
        };

        let warehouse_status = match (&outcome, rows) {
            (ConsolidationOutcome::Created { .. } | ConsolidationOutcome::Mastered { .. }, Some(rows)) => {
                self.load_warehouse(entity, rows, &mut trail).await
            }
            _ => None,
        };

        match &outcome {
            ConsolidationOutcome::Unchanged { fingerprint } => trail.record(
                AuditStep::Unchanged,
                AuditStatus::Success,
                format!("identical content ({fingerprint})"),
                rows,
            ),
            ConsolidationOutcome::Created { master_path, .. } => trail.record(
                AuditStep::Created,
                AuditStatus::Success,
                format!("first master written to {master_path}"),
                rows,
            ),
            ConsolidationOutcome::Mastered {
                master_path,
                archived_path,
                ..
            } => trail.record(
                AuditStep::Mastered,
                AuditStatus::Success,
                match archived_path {
                    Some(archived) => format!("master replaced at {master_path}, previous archived to {archived}"),
                    None => format!("master replaced at {master_path}, previous not archived"),
                },
                rows,
            ),
            ConsolidationOutcome::Error { reason, detail } => trail.record(
                AuditStep::Failed,
                AuditStatus::Failed,
                format!("{}: {detail}", reason.as_str()),
                None,
            ),
        }

        let entries = trail.into_entries();
        let audit_flushed = match AuditLog::new(self.store.as_ref())
            .append(&entity.name, &entries)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, "failed to flush audit entries");
                false
            }
        };

        info!(action = outcome.action(), ?rows, "consolidation finished");
        ConsolidationReport {
            run_id,
            entity: entity.name.clone(),
            source_file: snapshot_key.to_string(),
            started_at,
            finished_at: self.clock.now(),
            outcome,
            rows,
            warehouse_status,
            audit_entries: entries.len(),
            audit_flushed,
        }
    }

    async fn transition(
        &self,
        entity: &EntitySpec,
        snapshot_key: &str,
        trail: &mut AuditTrail,
    ) -> Result<Committed, RunFailure> {
        let store = self.store.as_ref();
        let layout = entity.layout();
        let master_key = layout.master_key();

        let new_fp = match fingerprint(store, snapshot_key).await {
            Ok(fp) => {
                trail.record(AuditStep::HashNew, AuditStatus::Success, format!("fingerprint {fp}"), None);
                fp
            }
            Err(err) => {
                trail.record(AuditStep::HashNew, AuditStatus::Failed, err.to_string(), None);
                return Err(RunFailure::new(FailureReason::NewFileHashFailed, err));
            }
        };

        let current = match fingerprint(store, &master_key).await {
            Ok(fp) => {
                trail.record(AuditStep::HashCurrent, AuditStatus::Success, format!("fingerprint {fp}"), None);
                CurrentMaster::Present(fp)
            }
            Err(FingerprintError::NotFound { .. }) => {
                trail.record(AuditStep::HashCurrent, AuditStatus::Skipped, "no current master", None);
                CurrentMaster::Absent
            }
            Err(err @ FingerprintError::Parse { .. }) => {
                warn!(error = %err, "current master unreadable; treating as changed");
                trail.record(
                    AuditStep::HashCurrent,
                    AuditStatus::Warning,
                    format!("{err}; treating as changed"),
                    None,
                );
                CurrentMaster::Unreadable
            }
            Err(err) => {
                trail.record(AuditStep::HashCurrent, AuditStatus::Failed, err.to_string(), None);
                return Err(RunFailure::new(FailureReason::DownloadOrReadFailed, err));
            }
        };

        if let CurrentMaster::Present(current_fp) = &current {
            if *current_fp == new_fp {
                trail.record(AuditStep::Compare, AuditStatus::Success, "identical content", None);
                return Ok(Committed {
                    outcome: ConsolidationOutcome::Unchanged {
                        fingerprint: new_fp.to_string(),
                    },
                    rows: None,
                });
            }
        }
        trail.record(
            AuditStep::Compare,
            AuditStatus::Success,
            match current {
                CurrentMaster::Absent => "no current master to compare against",
                _ => "content differs",
            },
            None,
        );

        let snapshot = self.download(store, snapshot_key, trail).await?;
        self.validate(entity, &snapshot, trail)?;

        let candidate = match (&self.options.strategy, &current) {
            (MergeStrategy::Incremental, CurrentMaster::Present(current_fp)) => {
                let master = self.download(store, &master_key, trail).await?;
                match master.merge_by_key(&snapshot, &entity.primary_key) {
                    Some(merged) => {
                        if fingerprint_table(&merged) == *current_fp {
                            trail.record(
                                AuditStep::Compare,
                                AuditStatus::Success,
                                "merged snapshot adds no change",
                                None,
                            );
                            return Ok(Committed {
                                outcome: ConsolidationOutcome::Unchanged {
                                    fingerprint: current_fp.to_string(),
                                },
                                rows: None,
                            });
                        }
                        merged
                    }
                    None => {
                        trail.record(
                            AuditStep::Download,
                            AuditStatus::Warning,
                            format!("current master lacks `{}`; replacing it", entity.primary_key),
                            None,
                        );
                        snapshot
                    }
                }
            }
            _ => snapshot,
        };

        let rows = candidate.row_count();
        let bytes = candidate.to_csv().map_err(|err| {
            trail.record(AuditStep::WriteMaster, AuditStatus::Failed, err.to_string(), None);
            RunFailure::new(FailureReason::UploadFailed, err)
        })?;
        let at = self.clock.now();

        if matches!(current, CurrentMaster::Absent) {
            let timestamped = self
                .publish(&layout, &bytes, at, AuditStep::CreateMaster, rows, trail)
                .await?;
            return Ok(Committed {
                outcome: ConsolidationOutcome::Created {
                    master_path: master_key,
                    timestamped_path: timestamped,
                },
                rows: Some(rows),
            });
        }

        let archived_path = self.archive_and_prune(entity, &master_key, at, trail).await;
        let timestamped = self
            .publish(&layout, &bytes, at, AuditStep::WriteMaster, rows, trail)
            .await?;
        Ok(Committed {
            outcome: ConsolidationOutcome::Mastered {
                master_path: master_key,
                timestamped_path: timestamped,
                archived_path,
            },
            rows: Some(rows),
        })
    }

    async fn download(
        &self,
        store: &dyn ContentStore,
        key: &str,
        trail: &mut AuditTrail,
    ) -> Result<Table, RunFailure> {
        match read_snapshot(store, key).await {
            Ok(table) => {
                trail.record(
                    AuditStep::Download,
                    AuditStatus::Success,
                    format!("read {key}"),
                    Some(table.row_count()),
                );
                Ok(table)
            }
            Err(err) => {
                trail.record(AuditStep::Download, AuditStatus::Failed, err.to_string(), None);
                Err(RunFailure::new(FailureReason::DownloadOrReadFailed, err))
            }
        }
    }

    fn validate(&self, entity: &EntitySpec, snapshot: &Table, trail: &mut AuditTrail) -> Result<(), RunFailure> {
        if snapshot.column_index(&entity.primary_key).is_none() {
            let detail = format!("snapshot has no primary key column `{}`", entity.primary_key);
            trail.record(AuditStep::Validate, AuditStatus::Failed, detail.clone(), None);
            return Err(RunFailure::new(FailureReason::DownloadOrReadFailed, detail));
        }

        let mut problems = Vec::new();
        let duplicates = snapshot.duplicate_keys(&entity.primary_key);
        if !duplicates.is_empty() {
            problems.push(format!(
                "{} duplicated `{}` values",
                duplicates.len(),
                entity.primary_key
            ));
        }
        if !entity.columns.is_empty() {
            let declared = entity.columns.iter().map(String::as_str).collect::<BTreeSet<_>>();
            let actual = snapshot.columns().iter().map(String::as_str).collect::<BTreeSet<_>>();
            let missing = declared.difference(&actual).copied().collect::<Vec<_>>();
            let extra = actual.difference(&declared).copied().collect::<Vec<_>>();
            if !missing.is_empty() {
                problems.push(format!("missing columns: {}", missing.join(", ")));
            }
            if !extra.is_empty() {
                problems.push(format!("undeclared columns: {}", extra.join(", ")));
            }
        }

        if problems.is_empty() {
            trail.record(AuditStep::Validate, AuditStatus::Success, "schema ok", Some(snapshot.row_count()));
        } else {
            let message = problems.join("; ");
            warn!(%message, "snapshot validation warnings");
            trail.record(AuditStep::Validate, AuditStatus::Warning, message, Some(snapshot.row_count()));
        }
        Ok(())
    }

    async fn archive_and_prune(
        &self,
        entity: &EntitySpec,
        master_key: &str,
        at: DateTime<Utc>,
        trail: &mut AuditTrail,
    ) -> Option<String> {
        let history = HistoryManager::new(self.store.as_ref());
        let archived = match history.archive(&entity.name, master_key, at).await {
            Ok(Some(path)) => {
                trail.record(AuditStep::ArchiveCurrent, AuditStatus::Success, format!("archived to {path}"), None);
                Some(path)
            }
            Ok(None) => {
                trail.record(AuditStep::ArchiveCurrent, AuditStatus::Skipped, "no current master to archive", None);
                None
            }
            Err(err) => {
                warn!(error = %err, "archiving current master failed; continuing");
                trail.record(
                    AuditStep::ArchiveCurrent,
                    AuditStatus::Warning,
                    format!("archive failed, continuing: {err}"),
                    None,
                );
                None
            }
        };

        if archived.is_none() {
            trail.record(AuditStep::PruneHistory, AuditStatus::Skipped, "nothing archived", None);
            return None;
        }
        match history.prune(&entity.name, self.options.max_versions).await {
            Ok(outcome) => trail.record(
                AuditStep::PruneHistory,
                AuditStatus::Success,
                format!(
                    "kept {}, deleted {} (max {})",
                    outcome.retained.len(),
                    outcome.deleted.len(),
                    self.options.max_versions
                ),
                None,
            ),
            Err(err) => {
                warn!(error = %err, "pruning history failed; next prune will catch up");
                trail.record(AuditStep::PruneHistory, AuditStatus::Warning, err.to_string(), None);
            }
        }
        archived
    }

    async fn publish(
        &self,
        layout: &EntityLayout<'_>,
        bytes: &[u8],
        at: DateTime<Utc>,
        step: AuditStep,
        rows: usize,
        trail: &mut AuditTrail,
    ) -> Result<String, RunFailure> {
        let timestamped = layout.timestamped_master_key(at);
        let master_key = layout.master_key();

        if let Err(err) = self.store.write(&timestamped, bytes, CSV_CONTENT_TYPE).await {
            trail.record(step, AuditStatus::Failed, format!("upload of {timestamped} failed: {err}"), None);
            return Err(RunFailure::new(FailureReason::UploadFailed, err));
        }
        if let Err(err) = self.store.copy(&timestamped, &master_key).await {
            trail.record(step, AuditStatus::Failed, format!("copy to {master_key} failed: {err}"), None);
            return Err(RunFailure::new(FailureReason::CopyFailed, err));
        }
        trail.record(
            step,
            AuditStatus::Success,
            format!("published {timestamped} -> {master_key}"),
            Some(rows),
        );
        Ok(timestamped)
    }

    async fn load_warehouse(
        &self,
        entity: &EntitySpec,
        rows: usize,
        trail: &mut AuditTrail,
    ) -> Option<WarehouseStatus> {
        let loader = self.loader.as_ref()?;
        let request = LoadRequest {
            project_id: self.options.project_id.clone(),
            dataset: self.options.dataset.clone(),
            table: format!("{}_master", entity.name),
            source_uri: self.store.uri(&entity.layout().master_key()),
            write_mode: WriteMode::Truncate,
        };

        let status = match loader.load(&request).await {
            Ok(report) if !report.success => {
                trail.record(AuditStep::WarehouseLoad, AuditStatus::Failed, "loader reported failure", None);
                WarehouseStatus::Failed
            }
            Ok(report) if report.row_count != rows as u64 => {
                trail.record(
                    AuditStep::WarehouseLoad,
                    AuditStatus::Warning,
                    format!("loaded {} of {rows} rows into {}", report.row_count, request.table),
                    Some(report.row_count as usize),
                );
                WarehouseStatus::PartialFailure
            }
            Ok(report) => {
                trail.record(
                    AuditStep::WarehouseLoad,
                    AuditStatus::Success,
                    format!("loaded into {}.{}", request.dataset, request.table),
                    Some(report.row_count as usize),
                );
                WarehouseStatus::Success
            }
            Err(err) => {
                warn!(error = %err, "warehouse load failed");
                trail.record(AuditStep::WarehouseLoad, AuditStatus::Failed, err.to_string(), None);
                WarehouseStatus::Failed
            }
        };
        Some(status)
    }
}
