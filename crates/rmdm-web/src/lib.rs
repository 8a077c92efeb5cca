//! Axum HTTP surface for RMDM: storage event intake and audit replay.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmdm_core::EntityRegistry;
use rmdm_master::{handle_event, maybe_build_scheduler, AuditLog, FileEvent, MasterConfig, MasterEngine};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "rmdm-web";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MasterEngine>,
    pub registry: Arc<EntityRegistry>,
}

impl AppState {
    pub fn new(engine: Arc<MasterEngine>, registry: Arc<EntityRegistry>) -> Self {
        Self { engine, registry }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/events", post(event_handler))
        .route("/entities/{entity}/audit", get(audit_handler))
        .with_state(Arc::new(state))
}

/// Serves the HTTP surface and, when enabled, the daily cron alongside it.
pub async fn serve(config: &MasterConfig) -> anyhow::Result<()> {
    let registry = Arc::new(config.load_registry().context("loading entity registry")?);
    let engine = Arc::new(config.build_engine()?);

    let scheduler = maybe_build_scheduler(config, engine.clone(), registry.clone()).await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
        info!(cron = %config.daily_cron, "daily scheduler started");
    }

    let listener = TcpListener::bind(("0.0.0.0", config.web_port))
        .await
        .with_context(|| format!("binding port {}", config.web_port))?;
    info!(port = config.web_port, bucket = %config.bucket, "serving");
    axum::serve(listener, app(AppState::new(engine, registry)))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for shutdown signal");
            }
        })
        .await?;

    if let Some(mut sched) = scheduler {
        if let Err(err) = sched.shutdown().await {
            warn!(error = %err, "scheduler shutdown failed");
        }
    }
    Ok(())
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn event_handler(State(state): State<Arc<AppState>>, Json(event): Json<FileEvent>) -> Response {
    match handle_event(&state.engine, &state.registry, &event).await {
        Ok(disposition) => (StatusCode::OK, disposition.status_line()).into_response(),
        Err(err) => {
            warn!(name = %event.name, error = %err, "rejected storage event");
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
    }
}

async fn audit_handler(State(state): State<Arc<AppState>>, Path(entity): Path<String>) -> Response {
    if state.registry.get(&entity).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown entity `{entity}`") })),
        )
            .into_response();
    }
    match AuditLog::new(state.engine.store().as_ref()).replay(&entity).await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => {
            error!(%entity, error = %err, "audit replay failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}
