//! HTTP surface: health probes and subscription administration

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cw_subscriptions::{SubscriptionError, SubscriptionLifecycleManager, SubscriptionRecord, SubscriptionScheduler};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SubscriptionLifecycleManager>,
    pub scheduler: Arc<SubscriptionScheduler>,
    pub scheduler_enabled: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    scheduler_running: bool,
    tracked_subscriptions: usize,
    pending_creations: usize,
}

#[derive(Deserialize)]
struct EnsureRequest {
    resource: String,
    /// Overrides the configured notification URL
    #[serde(default, rename = "notificationUrl")]
    notification_url: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/q/health", get(health))
        .route("/q/health/live", get(|| async { Json(json!({"status": "UP"})) }))
        .route("/q/health/ready", get(ready))
        .route("/api/subscriptions", get(list_subscriptions).post(ensure_subscription))
        .route("/api/subscriptions/renew", post(renew_now))
        .with_state(state)
}

fn scheduler_healthy(state: &AppState) -> bool {
    !state.scheduler_enabled || state.scheduler.is_running()
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if scheduler_healthy(&state) { "UP" } else { "DOWN" },
        scheduler_running: state.scheduler.is_running(),
        tracked_subscriptions: state.manager.registry().len(),
        pending_creations: state.manager.pending_creations().len(),
    })
}

async fn ready(State(state): State<AppState>) -> Response {
    if scheduler_healthy(&state) {
        Json(json!({"status": "UP"})).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "DOWN"}))).into_response()
    }
}

async fn list_subscriptions(State(state): State<AppState>) -> Json<Vec<SubscriptionRecord>> {
    Json(state.manager.subscriptions())
}

async fn ensure_subscription(State(state): State<AppState>, Json(request): Json<EnsureRequest>) -> Response {
    let target_url = request
        .notification_url
        .unwrap_or_else(|| state.manager.config().notification_url.clone());

    match state.manager.ensure_subscription_for(&request.resource, &target_url).await {
        Ok(Some(subscription)) => {
            info!(resource = %request.resource, subscription_id = %subscription.id, "Resource onboarded via API");
            (StatusCode::OK, Json(subscription)).into_response()
        }
        Ok(None) => {
            warn!(resource = %request.resource, "Onboarding via API could not establish a subscription");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "notification service unavailable, subscription not established"})),
            )
                .into_response()
        }
        Err(SubscriptionError::InvalidArgument(message)) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn renew_now(State(state): State<AppState>) -> Response {
    let report = state.scheduler.run_once().await;
    Json(report).into_response()
}
