//! HTTP request handlers.

use super::AppState;
use crate::db::{JobRecord, StoreError};
use crate::probe::ProbeRequest;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Query parameters for `/ping`. Kept as text so bad values fall back to
/// defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct PingQuery {
    /// Seconds between echo requests, fractional allowed.
    #[serde(default)]
    pub period: Option<String>,
    /// Whole seconds to keep probing.
    #[serde(default)]
    pub duration: Option<String>,
}

impl PingQuery {
    fn period(&self, default: Duration) -> Duration {
        self.period
            .as_deref()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .and_then(|f| Duration::try_from_secs_f64(f).ok())
            .filter(|d| !d.is_zero())
            .unwrap_or(default)
    }

    fn duration(&self, default: Duration) -> Duration {
        self.duration
            .as_deref()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(default)
    }
}

// ============================================================================
// API: Ping
// ============================================================================

/// Start probing the caller's own address.
pub async fn handle_ping(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<PingQuery>,
) -> impl IntoResponse {
    let target = peer.ip().to_canonical();
    let request = ProbeRequest {
        target,
        period: query.period(state.config.default_period),
        duration: query.duration(state.config.default_duration),
    };

    match state.jobs.submit(request) {
        Ok(id) => (StatusCode::ACCEPTED, Json(JobRecord::pending(id.link()))).into_response(),
        Err(e) => {
            tracing::error!("error pinging {}: {}", target, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================================
// API: Results
// ============================================================================

pub async fn handle_retrieve(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.jobs.retrieve(&id) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(StoreError::NotFound) => (StatusCode::NOT_FOUND, "ping not found").into_response(),
        Err(e) => {
            tracing::error!("error retrieving ping {}: {}", id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
