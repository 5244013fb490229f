/// HTTP request handlers
use crate::domain::{DashboardSummary, Health, StatusReport};
use crate::errors::ApiError;
use crate::services::{PassthroughService, RefreshService};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub refresh: Arc<RefreshService>,
    pub passthrough: Arc<PassthroughService>,
}

/// Successful response wrapper
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub ok: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { ok: true, data }
    }
}

#[derive(Debug, Deserialize)]
pub struct SlaQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: String,
}

/// Health check handler
pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        now: Utc::now(),
    })
}

/// Cached dashboard; also kicks off a background refresh when none is running
pub async fn get_dashboard(
    State(state): State<AppState>,
) -> Json<SuccessResponse<DashboardSummary>> {
    state.refresh.trigger();
    Json(SuccessResponse::new(state.refresh.summary().await))
}

pub async fn get_heatmap(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let rows = state.refresh.heatmap().await?;
    Ok(Json(serde_json::json!(SuccessResponse::new(
        serde_json::json!({ "monitors": rows })
    ))))
}

pub async fn get_status(State(state): State<AppState>) -> Json<SuccessResponse<StatusReport>> {
    Json(SuccessResponse::new(state.refresh.status().await))
}

/// Manual refresh; answers immediately
pub async fn trigger_refresh(State(state): State<AppState>) -> Json<Value> {
    let started = state.refresh.trigger();
    Json(serde_json::json!(SuccessResponse::new(serde_json::json!({
        "started": started,
        "isLoading": state.refresh.is_loading(),
    }))))
}

pub async fn list_incidents(State(state): State<AppState>) -> Json<Value> {
    let incidents = state.refresh.incidents().await;
    Json(serde_json::json!(SuccessResponse::new(serde_json::json!({
        "incidents": incidents.as_slice()
    }))))
}

pub async fn list_status_changes(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let changes = state.refresh.status_changes().await?;
    Ok(Json(serde_json::json!(SuccessResponse::new(
        serde_json::json!({ "changes": changes })
    ))))
}

pub async fn list_heartbeats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let heartbeats = state.passthrough.heartbeats().await?;
    Ok(Json(serde_json::json!(SuccessResponse::new(
        serde_json::json!({ "heartbeats": heartbeats })
    ))))
}

/// Reject ids we have never seen once the cache is warm
async fn ensure_known_monitor(state: &AppState, id: &str) -> Result<(), ApiError> {
    let monitors = state.refresh.monitors().await;
    if monitors.is_empty() || monitors.iter().any(|m| m.id == id) {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("monitor {}", id)))
    }
}

pub async fn get_sla(
    Path(id): Path<String>,
    Query(params): Query<SlaQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    ensure_known_monitor(&state, &id).await?;
    let report = state.passthrough.sla(&id, params.from, params.to).await?;
    Ok(Json(serde_json::json!(SuccessResponse::new(
        serde_json::json!({ "id": id, "sla": report })
    ))))
}

pub async fn get_response_times(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    ensure_known_monitor(&state, &id).await?;
    let report = state.passthrough.response_times(&id).await?;
    Ok(Json(serde_json::json!(SuccessResponse::new(
        serde_json::json!({ "id": id, "responseTimes": report })
    ))))
}

pub async fn proxy(
    Query(params): Query<ProxyQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let response = state.passthrough.proxy(&params.url).await?;
    Ok(Json(serde_json::json!(SuccessResponse::new(response))))
}
