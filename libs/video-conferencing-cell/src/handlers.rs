use axum::{
    extract::{Extension, Path, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use appointment_cell::SchedulingState;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{JoinVideoRequest, JoinVideoResponse, VideoSession, VideoStatusView};
use crate::services::VideoSessionService;

#[axum::debug_handler]
pub async fn video_health(State(state): State<SchedulingState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "realtime_configured": state.config.is_video_configured()
    }))
}

#[axum::debug_handler]
pub async fn get_video_status(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<VideoStatusView>, AppError> {
    let view = VideoSessionService::new(&state)
        .status(appointment_id, &user, auth.token())
        .await?;
    Ok(Json(view))
}

#[axum::debug_handler]
pub async fn join_video(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<JoinVideoRequest>,
) -> Result<Json<JoinVideoResponse>, AppError> {
    let joined = VideoSessionService::new(&state)
        .join(appointment_id, &user, &request.offer_sdp, auth.token())
        .await?;
    Ok(Json(joined))
}

#[axum::debug_handler]
pub async fn end_video(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<VideoSession>, AppError> {
    let ended = VideoSessionService::new(&state)
        .end(appointment_id, &user, auth.token())
        .await?;
    Ok(Json(ended))
}
