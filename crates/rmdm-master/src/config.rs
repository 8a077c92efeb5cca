use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rmdm_core::EntityRegistry;
use rmdm_storage::{ContentStore, HttpClientConfig, HttpWarehouseLoader, LocalFsStore};
use thiserror::Error;
use tracing::info;

use crate::engine::{EngineOptions, MasterEngine, MergeStrategy, DEFAULT_MAX_VERSIONS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var}=`{value}`: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("reading entity registry {path}: {source}")]
    RegistryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing entity registry: {0}")]
    RegistryParse(#[from] serde_yaml::Error),
    #[error("entity registry declares no entities")]
    EmptyRegistry,
    #[error("entity `{0}` is declared more than once")]
    DuplicateEntity(String),
}

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub store_root: PathBuf,
    pub bucket: String,
    pub project_id: Option<String>,
    pub max_versions: usize,
    pub merge_strategy: MergeStrategy,
    pub entities_file: Option<PathBuf>,
    pub warehouse_url: Option<String>,
    pub warehouse_dataset: String,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub daily_cron: String,
    pub web_port: u16,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("./store"),
            bucket: "retail-data-landing-zone".to_string(),
            project_id: None,
            max_versions: DEFAULT_MAX_VERSIONS,
            merge_strategy: MergeStrategy::FullReplace,
            entities_file: None,
            warehouse_url: None,
            warehouse_dataset: "retail_data".to_string(),
            http_timeout_secs: 20,
            scheduler_enabled: false,
            daily_cron: "0 0 1 * * *".to_string(),
            web_port: 8000,
        }
    }
}

impl MasterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the config from any variable source; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(root) = get("RMDM_STORE_ROOT") {
            config.store_root = PathBuf::from(root);
        }
        if let Some(bucket) = get("RMDM_BUCKET") {
            if bucket.contains('/') {
                return Err(ConfigError::Invalid {
                    var: "RMDM_BUCKET",
                    value: bucket,
                    reason: "bucket names cannot contain `/`",
                });
            }
            config.bucket = bucket;
        }
        config.project_id = get("RMDM_PROJECT_ID");
        if let Some(raw) = get("RMDM_MAX_VERSIONS") {
            config.max_versions = match raw.parse::<usize>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "RMDM_MAX_VERSIONS",
                        value: raw,
                        reason: "expected an integer >= 1",
                    })
                }
            };
        }
        if let Some(raw) = get("RMDM_MERGE_STRATEGY") {
            config.merge_strategy = match raw.to_ascii_lowercase().as_str() {
                "full_replace" => MergeStrategy::FullReplace,
                "incremental" => MergeStrategy::Incremental,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "RMDM_MERGE_STRATEGY",
                        value: raw,
                        reason: "expected `full_replace` or `incremental`",
                    })
                }
            };
        }
        config.entities_file = get("RMDM_ENTITIES_FILE").map(PathBuf::from);
        config.warehouse_url = get("RMDM_WAREHOUSE_URL");
        if let Some(dataset) = get("RMDM_WAREHOUSE_DATASET") {
            config.warehouse_dataset = dataset;
        }
        if let Some(raw) = get("RMDM_HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = raw.parse().map_err(|_| ConfigError::Invalid {
                var: "RMDM_HTTP_TIMEOUT_SECS",
                value: raw.clone(),
                reason: "expected a number of seconds",
            })?;
        }
        config.scheduler_enabled = get("RMDM_SCHEDULER_ENABLED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
            .unwrap_or(false);
        if let Some(cron) = get("RMDM_DAILY_CRON") {
            config.daily_cron = cron;
        }
        if let Some(raw) = get("RMDM_WEB_PORT") {
            config.web_port = raw.parse().map_err(|_| ConfigError::Invalid {
                var: "RMDM_WEB_PORT",
                value: raw.clone(),
                reason: "expected a TCP port",
            })?;
        }
        Ok(config)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_versions: self.max_versions,
            strategy: self.merge_strategy,
            dataset: self.warehouse_dataset.clone(),
            project_id: self.project_id.clone(),
        }
    }

    /// The YAML registry when one is configured, the built-in one otherwise.
    pub fn load_registry(&self) -> Result<EntityRegistry, ConfigError> {
        let Some(path) = &self.entities_file else {
            return Ok(EntityRegistry::builtin());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::RegistryRead {
            path: path.clone(),
            source,
        })?;
        parse_registry(&text)
    }

    pub fn open_store(&self) -> LocalFsStore {
        LocalFsStore::new(&self.store_root, &self.bucket)
    }

    pub fn build_engine(&self) -> Result<MasterEngine> {
        let store: Arc<dyn ContentStore> = Arc::new(self.open_store());
        let mut engine = MasterEngine::new(store, self.engine_options());
        if let Some(url) = &self.warehouse_url {
            let loader = HttpWarehouseLoader::new(
                url.clone(),
                HttpClientConfig {
                    timeout: Duration::from_secs(self.http_timeout_secs),
                    ..Default::default()
                },
            )
            .with_context(|| format!("building warehouse loader for {url}"))?;
            info!(endpoint = loader.endpoint(), dataset = %self.warehouse_dataset, "warehouse loading enabled");
            engine = engine.with_loader(Arc::new(loader));
        }
        Ok(engine)
    }
}

pub fn parse_registry(text: &str) -> Result<EntityRegistry, ConfigError> {
    let registry: EntityRegistry = serde_yaml::from_str(text)?;
    if registry.entities.is_empty() {
        return Err(ConfigError::EmptyRegistry);
    }
    let mut seen = BTreeSet::new();
    for entity in &registry.entities {
        if !seen.insert(entity.name.as_str()) {
            return Err(ConfigError::DuplicateEntity(entity.name.clone()));
        }
    }
    Ok(registry)
}
