pub mod health;
pub mod metrics;
pub mod positions;

use crate::db::Repository;
use crate::oracle::OracleReader;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    /// Absent when no price feed is configured.
    pub oracle: Option<Arc<OracleReader>>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, oracle: Option<Arc<OracleReader>>) -> Self {
        Self { repo, oracle }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/positions", get(positions::list_positions))
        .route("/v1/positions/:id", get(positions::get_position))
        .route("/v1/metrics", get(metrics::get_metrics))
        .layer(cors)
        .with_state(state)
}
