//! probed library - probe metrics ingestion daemon
//!
//! Accepts delay, aggregate attestation and attestation summary reports
//! from probes over HTTP and hands them to the probe store.

use axum::Router;
use probedb::ProbeDb;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: ProbeDb,
}

impl AppState {
    pub fn new(db: ProbeDb) -> Self {
        Self { db }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::metric_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
