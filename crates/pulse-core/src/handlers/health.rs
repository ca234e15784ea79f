//! Health check handler

use crate::hub::ConnectionKind;
use crate::state::AppState;
use crate::{Request, Response, Result, StatusCode};
use serde::Serialize;
use std::sync::Arc;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    /// Shutdown started, server is going away
    Draining,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Ok => StatusCode::OK,
            HealthStatus::Draining => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub connections: usize,
    pub websockets: usize,
    pub event_streams: usize,
    pub uptime_secs: u64,
}

impl HealthReport {
    pub fn collect(state: &AppState) -> Self {
        let hub = &state.hub;
        Self {
            status: if hub.is_closed() || state.tracker.is_shutting_down() {
                HealthStatus::Draining
            } else {
                HealthStatus::Ok
            },
            connections: hub.len(),
            websockets: hub.count(ConnectionKind::WebSocket),
            event_streams: hub.count(ConnectionKind::EventStream),
            uptime_secs: state.uptime().as_secs(),
        }
    }
}

/// `GET /health`
pub async fn health(_req: Request, state: Arc<AppState>) -> Result<Response> {
    let report = HealthReport::collect(&state);
    let mut res = Response::json_value(&report)?;
    res.status = report.status.status_code();
    Ok(res)
}
