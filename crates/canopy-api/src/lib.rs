//! canopy-api: REST API for Canopy.
//!
//! Thin axum surface over the release controller and the admission gate.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/health` | Liveness |
//! | GET | `/api/v1/releases` | List release summaries |
//! | POST | `/api/v1/releases` | Create or update a release |
//! | GET | `/api/v1/releases/{name}` | Get a release and its current state |
//! | DELETE | `/api/v1/releases/{name}` | Destroy a release |
//! | POST | `/api/v1/admission` | Check a deployment against the managed releases |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use canopy_engine::{AdmissionGate, ReleaseController};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<ReleaseController>,
    pub admission: Arc<AdmissionGate>,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(controller: Arc<ReleaseController>, admission: Arc<AdmissionGate>) -> Router {
    let state = ApiState {
        controller,
        admission,
    };

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/releases", get(handlers::list_releases).post(handlers::create_release))
        .route("/releases/{name}", get(handlers::get_release).delete(handlers::delete_release))
        .route("/admission", post(handlers::check_admission))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
