//! Master consolidation for RMDM: fingerprints, history, audit, engine and entry points.

pub mod audit;
pub mod canonical;
pub mod config;
pub mod engine;
pub mod history;
pub mod scheduler;
pub mod trigger;

pub use audit::{AuditError, AuditLog, AuditTrail};
pub use canonical::{fingerprint, fingerprint_table, read_snapshot, Fingerprint, FingerprintError};
pub use config::{parse_registry, ConfigError, MasterConfig};
pub use engine::{EngineOptions, MasterEngine, MergeStrategy, DEFAULT_MAX_VERSIONS};
pub use history::{HistoryManager, PruneOutcome};
pub use scheduler::{maybe_build_scheduler, run_daily, yesterday, DailyEntityRun};
pub use trigger::{classify, handle_event, EventDisposition, EventError, FileEvent, NOT_RELEVANT};

pub const CRATE_NAME: &str = "rmdm-master";
