use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use log::error;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::domain::{model::OpResult, UpdateService};

pub fn router(service: Arc<UpdateService>) -> Router {
    Router::new()
        .route("/api/containers", get(list_containers))
        .route("/api/update", post(trigger_update))
        .route("/api/rollback", post(trigger_rollback))
        .route("/api/check", post(trigger_check))
        .route("/api/jobs/:job_id", get(job_snapshot))
        .route("/api/settings", get(list_settings).post(put_setting))
        .route("/health", get(health))
        .with_state(service)
}

async fn list_containers(State(service): State<Arc<UpdateService>>) -> impl IntoResponse {
    Json(service.monitored_containers().await)
}

#[derive(Deserialize)]
struct UpdateRequest {
    container: Option<String>,
    tag: Option<String>,
}

async fn trigger_update(
    State(service): State<Arc<UpdateService>>,
    Json(payload): Json<UpdateRequest>,
) -> impl IntoResponse {
    let (Some(container), Some(tag)) = (payload.container, payload.tag) else {
        return Json(json!(OpResult::err("Missing parameters")));
    };
    let job = service.jobs.create();
    tokio::spawn(async move {
        let result = service.update_service(&container, &tag, Some(job)).await;
        service
            .jobs
            .complete(job, result.success, result.message, result.error);
    });
    Json(json!({ "job_id": job }))
}

#[derive(Deserialize)]
struct RollbackRequest {
    container: Option<String>,
    tag: Option<String>,
}

async fn trigger_rollback(
    State(service): State<Arc<UpdateService>>,
    Json(payload): Json<RollbackRequest>,
) -> impl IntoResponse {
    let Some(container) = payload.container else {
        return Json(json!(OpResult::err("Missing container")));
    };
    let job = service.jobs.create();
    tokio::spawn(async move {
        let result = service
            .rollback_service(&container, payload.tag, Some(job))
            .await;
        service
            .jobs
            .complete(job, result.success, result.message, result.error);
    });
    Json(json!({ "job_id": job }))
}

async fn trigger_check(State(service): State<Arc<UpdateService>>) -> impl IntoResponse {
    let job = service.jobs.create();
    tokio::spawn(async move {
        service.check_once(Some(job)).await;
        service
            .jobs
            .complete(job, true, Some("Check finished".to_string()), None);
    });
    Json(json!({ "job_id": job }))
}

async fn job_snapshot(
    State(service): State<Arc<UpdateService>>,
    Path(job_id): Path<Uuid>,
) -> impl IntoResponse {
    match service.jobs.snapshot(job_id) {
        Some(snapshot) => Json(json!(snapshot)).into_response(),
        None => (StatusCode::NOT_FOUND, "No such job").into_response(),
    }
}

async fn list_settings(State(service): State<Arc<UpdateService>>) -> impl IntoResponse {
    match service.store.settings().await {
        Ok(settings) => {
            let map: serde_json::Map<String, serde_json::Value> = settings
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect();
            Json(serde_json::Value::Object(map)).into_response()
        }
        Err(e) => {
            error!("Error reading settings: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Something went wrong: {e}"),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct SettingRequest {
    key: String,
    value: String,
}

async fn put_setting(
    State(service): State<Arc<UpdateService>>,
    Json(payload): Json<SettingRequest>,
) -> impl IntoResponse {
    match service.store.set_setting(&payload.key, &payload.value).await {
        Ok(()) => Json(json!(OpResult::ok("Setting saved"))).into_response(),
        Err(e) => {
            error!("Error writing setting {}: {:#}", payload.key, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Something went wrong: {e}"),
            )
                .into_response()
        }
    }
}

async fn health(State(service): State<Arc<UpdateService>>) -> impl IntoResponse {
    let monitored = service.monitored_containers().await.len();
    Json(json!({ "status": "ok", "containers_monitored": monitored }))
}
