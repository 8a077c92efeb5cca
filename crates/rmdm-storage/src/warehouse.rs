use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Truncate,
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRequest {
    pub project_id: Option<String>,
    pub dataset: String,
    pub table: String,
    pub source_uri: String,
    pub write_mode: WriteMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub success: bool,
    pub row_count: u64,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("load request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Bulk-loads a stored CSV into an analytical table.
#[async_trait]
pub trait WarehouseLoader: Send + Sync {
    async fn load(&self, request: &LoadRequest) -> Result<LoadReport, LoadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Posts load requests as JSON to a loader endpoint and expects a [`LoadReport`] back.
#[derive(Debug)]
pub struct HttpWarehouseLoader {
    client: reqwest::Client,
    endpoint: String,
    backoff: BackoffPolicy,
}

impl HttpWarehouseLoader {
    pub fn new(endpoint: impl Into<String>, config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            backoff: config.backoff,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post_with_retries(&self, request: &LoadRequest) -> Result<LoadReport, LoadError> {
        let mut attempt = 0;
        loop {
            match self.client.post(&self.endpoint).json(request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.json::<LoadReport>().await?);
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        warn!(%status, attempt, "retryable warehouse status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(LoadError::HttpStatus {
                        status: status.as_u16(),
                        url: resp.url().to_string(),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        warn!(error = %err, attempt, "retryable warehouse request error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(LoadError::Request(err));
                }
            }
        }
    }
}

#[async_trait]
impl WarehouseLoader for HttpWarehouseLoader {
    async fn load(&self, request: &LoadRequest) -> Result<LoadReport, LoadError> {
        let span = info_span!(
            "warehouse_load",
            dataset = %request.dataset,
            table = %request.table,
            source_uri = %request.source_uri
        );
        self.post_with_retries(request).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode as AxumStatus, routing::post, Json, Router};
    use tokio::net::TcpListener;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), RetryDisposition::NonRetryable);
    }

    async fn spawn_loader_endpoint(failures_before_success: usize) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/load",
                post(
                    move |State(calls): State<Arc<AtomicUsize>>, Json(req): Json<LoadRequest>| async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        if n < failures_before_success {
                            return Err(AxumStatus::SERVICE_UNAVAILABLE);
                        }
                        assert_eq!(req.write_mode, WriteMode::Truncate);
                        Ok(Json(LoadReport {
                            success: true,
                            row_count: 42,
                        }))
                    },
                ),
            )
            .with_state(calls.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/load"), calls)
    }

    fn request() -> LoadRequest {
        LoadRequest {
            project_id: None,
            dataset: "retail_data".into(),
            table: "customers_master".into(),
            source_uri: "mem://landing/master/customers/customers_master.csv".into(),
            write_mode: WriteMode::Truncate,
        }
    }

    fn fast_config(max_retries: usize) -> HttpClientConfig {
        HttpClientConfig {
            backoff: BackoffPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn loader_retries_unavailable_endpoint_then_succeeds() {
        let (url, calls) = spawn_loader_endpoint(2).await;
        let loader = HttpWarehouseLoader::new(url.clone(), fast_config(3)).unwrap();
        assert_eq!(loader.endpoint(), url);

        let report = loader.load(&request()).await.expect("load");
        assert!(report.success);
        assert_eq!(report.row_count, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn loader_gives_up_after_max_retries() {
        let (url, calls) = spawn_loader_endpoint(10).await;
        let loader = HttpWarehouseLoader::new(url, fast_config(1)).unwrap();

        let err = loader.load(&request()).await.unwrap_err();
        assert!(matches!(err, LoadError::HttpStatus { status: 503, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
