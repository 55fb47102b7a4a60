//! HTTP request handlers.

use super::AppState;
use crate::db::{snapshot, CheckStore, DbError, Target};
use crate::notify::NotifyError;
use crate::scheduler::SchedulerError;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// Prefix `https://` when no scheme is given and reject anything that is not
/// an absolute http(s) URL with a host.
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let url = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else if raw.contains("://") {
        return None;
    } else {
        format!("https://{}", raw)
    };

    let parsed = reqwest::Url::parse(&url).ok()?;
    parsed.host_str()?;
    Some(url)
}

fn db_error(e: DbError) -> Response {
    match e {
        DbError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
        DbError::Conflict(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
    }
}

// ============================================================================
// Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> Response {
    match state.store.list_all_targets() {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_get_target(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_target(id) {
        Ok(target) => Json(target).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    pub url: String,
    pub user_id: i64,
    #[serde(default)]
    pub category: Option<String>,
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<CreateTargetRequest>,
) -> Response {
    let Some(url) = normalize_url(&req.url) else {
        return (StatusCode::BAD_REQUEST, "Invalid URL").into_response();
    };

    let mut target = Target {
        url,
        user_id: req.user_id,
        category: req.category,
        ..Default::default()
    };
    if let Err(e) = state.store.add_target(&mut target) {
        return db_error(e);
    }

    tracing::info!("Tracking {} for user {}", target.url, target.user_id);

    if let Err(e) = state.scheduler.probe_now(&target.url).await {
        tracing::warn!("Could not perform immediate check of {}: {}", target.url, e);
    }

    (StatusCode::CREATED, Json(target)).into_response()
}

pub async fn handle_delete_target(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_target(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CategoryUpdate {
    pub category: Option<String>,
}

pub async fn handle_update_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<CategoryUpdate>,
) -> Response {
    match state.store.update_target_category(id, req.category.as_deref()) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// Uptime & history
// ============================================================================

pub async fn handle_get_uptime(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let target = match state.store.get_target(id) {
        Ok(t) => t,
        Err(e) => return db_error(e),
    };

    match snapshot(state.store.as_ref(), &target, Utc::now()) {
        Ok(snap) => Json(snap).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

pub async fn handle_get_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    if let Err(e) = state.store.get_target(id) {
        return db_error(e);
    }

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    match state.store.history(id, None, Some(limit)) {
        Ok(records) => Json(records).into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// Immediate probes
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ProbeRequest {
    pub url: String,
}

pub async fn handle_probe_now(
    State(state): State<AppState>,
    Json(req): Json<ProbeRequest>,
) -> Response {
    let Some(url) = normalize_url(&req.url) else {
        return (StatusCode::BAD_REQUEST, "Invalid URL").into_response();
    };

    match state.scheduler.probe_now(&url).await {
        Ok(record) => Json(record).into_response(),
        Err(SchedulerError::UnknownTarget(_)) => {
            (StatusCode::NOT_FOUND, "URL not monitored").into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Users & reports
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

pub async fn handle_create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Response {
    if req.username.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Username required").into_response();
    }

    match state.store.add_user(req.username.trim(), req.email.as_deref()) {
        Ok(id) => (StatusCode::CREATED, Json(json!({ "id": id }))).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_get_summary(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.notifications.summarize_user(id) {
        Ok(summary) => Json(summary).into_response(),
        Err(NotifyError::UnknownUser(_)) | Err(NotifyError::NoTargets(_)) => {
            (StatusCode::NOT_FOUND, "No targets for user").into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_send_report(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let success = state.notifications.send_report(id).await;
    Json(json!({ "success": success })).into_response()
}
