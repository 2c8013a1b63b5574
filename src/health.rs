use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};
use serde::Serialize;
use time::OffsetDateTime;

use crate::Hub;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Live websocket sessions.
    pub connections: usize,
}

#[debug_handler(state = crate::AppState)]
pub async fn health(State(hub): State<Arc<Hub>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "OK",
        timestamp: OffsetDateTime::now_utc(),
        connections: hub.registry().session_count(),
    })
}
