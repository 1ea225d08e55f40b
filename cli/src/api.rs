//! Administrative HTTP surface: routing rules and the sync start point.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;

use chainbridge_core::error::BridgeError;
use chainbridge_core::router::Router as RuleRouter;
use chainbridge_core::rules::{NewRule, RoutingRule};
use chainbridge_core::syncer::SyncHandle;
use chainbridge_core::types::Point;
use chainbridge_core::SyncStatus;

#[derive(Clone)]
pub struct ApiState {
    pub rules: Arc<RuleRouter>,
    pub sync: SyncHandle,
    /// Registered encoder names, uppercase.
    pub encoders: Arc<Vec<String>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/mappings", post(create_mapping).get(list_mappings))
        .route("/mappings/:id", delete(delete_mapping))
        .route("/sync/start", post(set_start_point))
        .route("/sync/status", get(sync_status))
        .with_state(state)
}

pub struct ApiError(BridgeError);

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BridgeError::DuplicateRule { .. } => StatusCode::CONFLICT,
            BridgeError::RuleNotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::InvalidRule(_) | BridgeError::UnknownEncoder(_) => StatusCode::BAD_REQUEST,
            e => {
                tracing::error!(error = %e, "admin request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn create_mapping(
    State(state): State<ApiState>,
    Json(rule): Json<NewRule>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rule = rule.validate()?;
    if !state.encoders.iter().any(|e| e == rule.encoder_name()) {
        return Err(BridgeError::UnknownEncoder(rule.encoder_name().to_string()).into());
    }
    let id = state.rules.add_rule(&rule).await?;
    Ok(Json(json!({ "id": id })))
}

async fn list_mappings(State(state): State<ApiState>) -> Result<Json<Vec<RoutingRule>>, ApiError> {
    Ok(Json(state.rules.list_rules().await?))
}

async fn delete_mapping(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.rules.remove_rule(id).await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn set_start_point(
    State(state): State<ApiState>,
    Json(point): Json<Point>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.sync.set_start_point(point).await?;
    Ok(Json(json!({ "status": "sync point updated" })))
}

async fn sync_status(State(state): State<ApiState>) -> Json<SyncStatus> {
    Json(state.sync.status())
}
