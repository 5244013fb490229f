/// Application routes configuration
use crate::handlers::{
    get_dashboard, get_heatmap, get_response_times, get_sla, get_status, health, list_heartbeats,
    list_incidents, list_status_changes, proxy, trigger_refresh, AppState,
};
use axum::{
    routing::{get, post},
    Router,
};

/// Build the application router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Cached dashboard views
        .route("/api/dashboard", get(get_dashboard))
        .route("/api/heatmap", get(get_heatmap))
        .route("/api/status", get(get_status))
        .route("/api/incidents", get(list_incidents))
        .route("/api/status-changes", get(list_status_changes))
        // Manual refresh
        .route("/api/refresh", post(trigger_refresh))
        // Upstream passthrough
        .route("/api/heartbeats", get(list_heartbeats))
        .route("/api/monitors/:id/sla", get(get_sla))
        .route("/api/monitors/:id/response-times", get(get_response_times))
        .route("/api/proxy", get(proxy))
        .with_state(state)
}
