//! Keep-alive HTTP server.
//!
//! Hosting platforms that sleep idle web services ping `/`; `/purge/:channel_id`
//! lets an operator clean a moderated channel without Discord access.

use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serenity::model::id::ChannelId;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{audio::registry::SessionRegistry, bot::moderation::Purger};

/// Shared state of the keep-alive routes
#[derive(Clone)]
pub struct AppState {
    pub purger: Purger,
    pub registry: Arc<SessionRegistry>,
    pub instance_id: String,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(purger: Purger, registry: Arc<SessionRegistry>, instance_id: String) -> Self {
        Self {
            purger,
            registry,
            instance_id,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub instance: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub uptime: String,
    pub sessions: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/purge/:channel_id", get(purge))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serves the keep-alive routes on `0.0.0.0:port` until `shutdown`
pub async fn run(port: u16, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind keep-alive server to {}", addr))?;
    info!("🌐 Keep-alive server listening on {}", addr);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await
    .context("Keep-alive server error")?;

    Ok(())
}

async fn home(ConnectInfo(addr): ConnectInfo<SocketAddr>, headers: HeaderMap) -> &'static str {
    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");
    info!("👋 Ping from {} ({})", addr, agent);
    "Bot is alive!"
}

async fn purge(State(state): State<AppState>, Path(channel_id): Path<u64>) -> Response {
    if channel_id == 0 {
        return (StatusCode::BAD_REQUEST, "Invalid channel id").into_response();
    }

    let purger = state.purger.clone();
    tokio::spawn(async move {
        if let Err(e) = purger.purge(ChannelId::new(channel_id)).await {
            warn!("⚠️ Purge of channel {} failed: {:?}", channel_id, e);
        }
    });

    format!("Purge started for {}", channel_id).into_response()
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;
    Json(HealthReport {
        status: "ok",
        instance: state.instance_id.clone(),
        started_at: state.started_at,
        uptime_secs,
        uptime: humantime::format_duration(Duration::from_secs(uptime_secs)).to_string(),
        sessions: state.registry.len(),
    })
}
