//! REST API handlers.
//!
//! Each handler delegates to the release controller or the admission gate
//! and returns JSON responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use canopy_engine::{Admission, AdmissionRequest, EngineError, SubmitOutcome};
use canopy_state::{Release, StoreError};
use tracing::{error, info};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn engine_error_status(e: &EngineError) -> StatusCode {
    match e {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        EngineError::PluginNotFound { .. }
        | EngineError::Config(_)
        | EngineError::Store(StoreError::InvalidRelease(_)) => StatusCode::BAD_REQUEST,
        EngineError::ReleaseActive { .. } | EngineError::Transition(_) => StatusCode::CONFLICT,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /api/v1/health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── Releases ───────────────────────────────────────────────────

/// GET /api/v1/releases
pub async fn list_releases(State(state): State<ApiState>) -> impl IntoResponse {
    match state.controller.summaries() {
        Ok(summaries) => ApiResponse::ok(summaries).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/releases/{name}
pub async fn get_release(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.controller.get(&name) {
        Ok(detail) => ApiResponse::ok(detail).into_response(),
        Err(e) if e.is_not_found() => {
            error_response("release not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/releases
pub async fn create_release(
    State(state): State<ApiState>,
    payload: Result<Json<Release>, JsonRejection>,
) -> impl IntoResponse {
    let Json(release) = match payload {
        Ok(payload) => payload,
        Err(e) => return error_response(&e.body_text(), StatusCode::BAD_REQUEST).into_response(),
    };
    let name = release.name.clone();

    match state.controller.submit(release).await {
        Ok(SubmitOutcome::Unchanged) => ApiResponse::ok(serde_json::json!({
            "release": name,
            "outcome": "unchanged"
        }))
        .into_response(),
        Ok(outcome) => {
            let outcome = match outcome {
                SubmitOutcome::Created => "created",
                _ => "updated",
            };
            (
                StatusCode::CREATED,
                ApiResponse::ok(serde_json::json!({ "release": name, "outcome": outcome })),
            )
                .into_response()
        }
        Err(e) => {
            error!(release = %name, error = %e, "unable to submit release");
            error_response(&e.to_string(), engine_error_status(&e)).into_response()
        }
    }
}

/// DELETE /api/v1/releases/{name}
pub async fn delete_release(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.controller.destroy(&name).await {
        // The watcher task outlives the request and removes the release.
        Ok(_watcher) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(serde_json::json!({ "release": name, "status": "destroying" })),
        )
            .into_response(),
        Err(e) if e.is_not_found() => {
            error_response("release not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => {
            error!(release = %name, error = %e, "unable to destroy release");
            error_response(&e.to_string(), engine_error_status(&e)).into_response()
        }
    }
}

// ── Admission ──────────────────────────────────────────────────

/// POST /api/v1/admission
pub async fn check_admission(
    State(state): State<ApiState>,
    payload: Result<Json<AdmissionRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(e) => return error_response(&e.body_text(), StatusCode::BAD_REQUEST).into_response(),
    };

    match state.admission.check(&request).await {
        Ok(Admission::Granted) => ApiResponse::ok(serde_json::json!({
            "deployment": request.name,
            "status": "admission_granted"
        }))
        .into_response(),
        Ok(Admission::Rejected { release, reason, .. }) => {
            info!(deployment = %request.name, %release, "deployment rejected");
            error_response(&reason, StatusCode::CONFLICT).into_response()
        }
        Err(e) => {
            error!(deployment = %request.name, error = %e, "admission failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = state.controller.provider().metrics().render_prometheus();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use canopy_engine::testing::{MockState, fast_settings, mock_registry, mock_release};
    use canopy_engine::{AdmissionGate, Provider, ReleaseController};
    use canopy_state::{ReleaseStore, State as ReleaseState, Store};

    fn test_state() -> (ApiState, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(ReleaseStore::open_in_memory().unwrap());
        let provider = Arc::new(Provider::new(
            mock_registry(&MockState::new()),
            store.clone(),
            fast_settings(),
        ));
        let state = ApiState {
            controller: Arc::new(ReleaseController::new(provider.clone())),
            admission: Arc::new(AdmissionGate::new(provider)),
        };
        (state, store)
    }

    fn stored(store: &Arc<dyn Store>, name: &str, states: &[ReleaseState]) -> Release {
        let mut release = mock_release(name);
        for s in states {
            release.update_state(*s);
        }
        store.upsert_release(&release).unwrap();
        release
    }

    #[tokio::test]
    async fn health_is_ok() {
        let resp = health().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_releases_empty() {
        let (state, _) = test_state();
        let resp = list_releases(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_release_returns_created() {
        let (state, store) = test_state();
        let resp = create_release(State(state), Ok(Json(mock_release("api"))))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(store.get_release("api").is_ok());
    }

    #[tokio::test]
    async fn resubmitting_same_version_is_ok() {
        let (state, store) = test_state();
        stored(&store, "api", &[ReleaseState::Idle]);

        let resp = create_release(State(state), Ok(Json(mock_release("api"))))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_release_with_unknown_plugin_is_bad_request() {
        let (state, _) = test_state();
        let mut release = mock_release("api");
        release.monitor.plugin_name = "datadog".to_string();

        let resp = create_release(State(state), Ok(Json(release))).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn updating_active_release_conflicts() {
        let (state, store) = test_state();
        stored(&store, "api", &[ReleaseState::Idle, ReleaseState::Deploy]);
        let mut release = mock_release("api");
        release.version = "2".to_string();

        let resp = create_release(State(state), Ok(Json(release))).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn get_nonexistent_release() {
        let (state, _) = test_state();
        let resp = get_release(State(state), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_release_is_accepted() {
        let (state, store) = test_state();
        stored(&store, "api", &[ReleaseState::Idle]);

        let resp = delete_release(State(state), Path("api".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn delete_nonexistent_release() {
        let (state, _) = test_state();
        let resp = delete_release(State(state), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_release_twice_conflicts() {
        let (state, store) = test_state();
        stored(&store, "api", &[ReleaseState::Idle, ReleaseState::Destroy]);

        let resp = delete_release(State(state), Path("api".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn admission_rejected_for_active_release() {
        let (state, store) = test_state();
        stored(&store, "api", &[ReleaseState::Idle, ReleaseState::Deploy, ReleaseState::Monitor]);
        let request = AdmissionRequest {
            name: "api".to_string(),
            namespace: "default".to_string(),
            runtime: "mock".to_string(),
            ..Default::default()
        };

        let resp = check_admission(State(state), Ok(Json(request))).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn admission_granted_without_release() {
        let (state, _) = test_state();
        let request = AdmissionRequest {
            name: "web".to_string(),
            runtime: "mock".to_string(),
            ..Default::default()
        };

        let resp = check_admission(State(state), Ok(Json(request))).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let (state, _) = test_state();
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
