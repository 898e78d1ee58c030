// src/health.rs

//! Liveness endpoint for external monitoring.
//!
//! - `GET /` answers `running`
//! - `GET /status` answers the relay status as JSON

use axum::{Json, Router, extract::State, routing::get};
use tokio::net::TcpListener;

use crate::error::Result;
use crate::pipeline::{RelayStatus, StatusHandle};

pub fn create_router(status: StatusHandle) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/status", get(relay_status))
        .with_state(status)
}

async fn liveness() -> &'static str {
    "running"
}

async fn relay_status(State(status): State<StatusHandle>) -> Json<RelayStatus> {
    Json(status.snapshot())
}

/// Bind `addr` and serve in the background.
///
/// Binding happens before returning so a busy port is a startup error.
pub async fn serve(addr: &str, status: StatusHandle) -> Result<tokio::task::JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("Health endpoint listening on http://{}", listener.local_addr()?);

    let router = create_router(status);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            log::error!("Health endpoint stopped: {e}");
        }
    }))
}
