use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::state::WorkerState;

const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(10);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `POST /admin/shutdown`: loopback-only, drains
/// in-flight requests up to a deadline then exits the process with code 0.
/// This is one of exactly three things allowed to terminate the Worker
/// process — the other two are an OS-level kill and an unrecoverable bind
/// failure at startup.
pub async fn shutdown(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<WorkerState>>,
) -> Response {
    if !peer.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }

    tracing::info!(event = "shutdown_requested", worker_id = %state.worker_id);

    let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_DEADLINE;
    while state.in_flight() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }

    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::process::exit(0);
    });

    StatusCode::OK.into_response()
}
