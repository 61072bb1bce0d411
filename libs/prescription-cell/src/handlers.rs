use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_utils::extractor::{require_role, require_self_or_worker};

use crate::models::{IssuePrescriptionRequest, PrescriptionView, RevokePrescriptionRequest};
use crate::services::PrescriptionService;

#[axum::debug_handler]
pub async fn issue_prescription(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<IssuePrescriptionRequest>,
) -> Result<Json<PrescriptionView>, AppError> {
    require_role(&user, &[Role::Doctor])?;

    let prescription = PrescriptionService::new(&config)
        .issue(request, &user, auth.token())
        .await?;
    Ok(Json(prescription.into()))
}

#[axum::debug_handler]
pub async fn get_prescription(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(prescription_id): Path<Uuid>,
) -> Result<Json<PrescriptionView>, AppError> {
    let prescription = PrescriptionService::new(&config)
        .get(prescription_id, auth.token())
        .await?;

    if !prescription.can_view(&user.id) && !user.is_worker() {
        return Err(AppError::Forbidden("Not allowed to view this prescription".to_string()));
    }
    Ok(Json(prescription.into()))
}

#[axum::debug_handler]
pub async fn list_patient_prescriptions(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_self_or_worker(&user, patient_id)?;

    let prescriptions: Vec<PrescriptionView> = PrescriptionService::new(&config)
        .list_for_patient(patient_id, auth.token())
        .await?
        .into_iter()
        .map(PrescriptionView::from)
        .collect();

    Ok(Json(json!({
        "prescriptions": prescriptions,
        "total": prescriptions.len()
    })))
}

#[axum::debug_handler]
pub async fn revoke_prescription(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(prescription_id): Path<Uuid>,
    Json(request): Json<RevokePrescriptionRequest>,
) -> Result<Json<PrescriptionView>, AppError> {
    let prescription = PrescriptionService::new(&config)
        .revoke(prescription_id, &request.reason, &user, auth.token())
        .await?;
    Ok(Json(prescription.into()))
}
