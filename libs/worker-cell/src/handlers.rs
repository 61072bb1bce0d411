use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_utils::extractor::{require_role, require_worker};
use shared_utils::validation::validate_email;

use crate::models::{CreateWorkerRequest, UpdateWorkerRequest, WorkerSearchQuery};
use crate::services::WorkerService;

#[axum::debug_handler]
pub async fn create_worker(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateWorkerRequest>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, &[Role::Admin])?;
    validate_email(&request.email)?;

    let worker = WorkerService::new(&config)
        .create_worker(request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "worker": worker
    })))
}

#[axum::debug_handler]
pub async fn get_worker(
    State(config): State<Arc<AppConfig>>,
    Path(worker_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_worker(&user)?;

    let worker = WorkerService::new(&config)
        .get_worker(worker_id, auth.token())
        .await?;

    Ok(Json(json!(worker)))
}

#[axum::debug_handler]
pub async fn list_workers(
    State(config): State<Arc<AppConfig>>,
    Query(query): Query<WorkerSearchQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_worker(&user)?;

    let workers = WorkerService::new(&config)
        .list_workers(&query, auth.token())
        .await?;

    Ok(Json(json!({
        "workers": workers,
        "total": workers.len()
    })))
}

#[axum::debug_handler]
pub async fn update_worker(
    State(config): State<Arc<AppConfig>>,
    Path(worker_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateWorkerRequest>,
) -> Result<Json<Value>, AppError> {
    let is_admin = user.has_role(Role::Admin);
    let is_self = user.is_worker() && user.is_self(worker_id);

    if !is_admin && !(is_self && request.touches_only_name()) {
        return Err(AppError::Forbidden("Not authorized to update this worker".to_string()));
    }

    let worker = WorkerService::new(&config)
        .update_worker(worker_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "worker": worker
    })))
}

#[axum::debug_handler]
pub async fn deactivate_worker(
    State(config): State<Arc<AppConfig>>,
    Path(worker_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, &[Role::Admin])?;

    let worker = WorkerService::new(&config)
        .deactivate_worker(worker_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "worker": worker
    })))
}
