// Launchpad Backend
// Eligibility gating, sale queue ticketing and distribution planning

pub mod config;
pub mod database;
pub mod distribution;
pub mod eligibility;
pub mod error;
pub mod extract;
pub mod kyc;
pub mod memory;
pub mod models;
pub mod queue;
pub mod store;
pub mod sweeper;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use eligibility::GeoPolicy;
use store::Store;

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Config,
    pub geo_policy: GeoPolicy,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        let geo_policy = GeoPolicy::new(&config.geo_blocked_countries);
        Self {
            store,
            config,
            geo_policy,
        }
    }
}

/// Build the HTTP router
pub fn router(state: Arc<AppState>) -> Router {
    // Preflight requests are answered by the CORS layer.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/eligibility", post(eligibility::check_eligibility))
        .route("/api/queue", get(queue::handle_queue).post(queue::handle_queue))
        .route("/api/distribution/plan", post(distribution::create_distribution_plan))
        .route("/api/kyc/submit", post(kyc::submit_kyc))
        .route("/api/kyc/review", post(kyc::review_kyc))
        .route("/api/kyc/webhook", post(kyc::kyc_webhook))
        .route("/api/kyc/:wallet", get(kyc::get_kyc_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_health = state.store.health_check().await.is_ok();

    Json(serde_json::json!({
        "status": if db_health { "healthy" } else { "unhealthy" },
        "database": if db_health { "up" } else { "down" },
    }))
}
