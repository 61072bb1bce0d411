use axum::{
    extract::{ws::WebSocketUpgrade, Extension, Path, Query, State},
    response::Response,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use appointment_cell::{SchedulingState, SlotView};
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::{require_dispatcher, require_self_or_worker, require_worker};
use shared_utils::timezone::today_jst;

use crate::models::{AssignRequest, BoardDateQuery, CreateWaitingEntryRequest, MoveRequest, UnassignRequest};
use crate::services::live::stream_board;
use crate::services::AssignmentBoardService;

// ==============================================================================
// WAITING LIST
// ==============================================================================

#[axum::debug_handler]
pub async fn add_waiting_entry(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateWaitingEntryRequest>,
) -> Result<Json<Value>, AppError> {
    require_self_or_worker(&user, request.patient_id)?;

    let entry = AssignmentBoardService::new(&state)
        .add_waiting(request, auth.token())
        .await?;

    Ok(Json(json!(entry)))
}

#[axum::debug_handler]
pub async fn list_waiting_entries(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<BoardDateQuery>,
) -> Result<Json<Value>, AppError> {
    require_worker(&user)?;

    let entries = AssignmentBoardService::new(&state)
        .list_waiting(query.date, auth.token())
        .await?;

    Ok(Json(json!({
        "entries": entries,
        "total": entries.len()
    })))
}

#[axum::debug_handler]
pub async fn cancel_waiting_entry(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = AssignmentBoardService::new(&state);
    let entry = service.get_waiting(entry_id, auth.token()).await?;
    require_self_or_worker(&user, entry.patient_id)?;

    let cancelled = service.cancel_waiting(entry_id, auth.token()).await?;
    Ok(Json(json!(cancelled)))
}

// ==============================================================================
// BOARD
// ==============================================================================

#[axum::debug_handler]
pub async fn get_board(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<BoardDateQuery>,
) -> Result<Json<Value>, AppError> {
    require_worker(&user)?;

    let board = AssignmentBoardService::new(&state)
        .board_view(query.date, auth.token())
        .await?;

    Ok(Json(json!(board)))
}

#[axum::debug_handler]
pub async fn assign_patient(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<AssignRequest>,
) -> Result<Json<Value>, AppError> {
    require_dispatcher(&user)?;

    let outcome = AssignmentBoardService::new(&state)
        .assign(request, &user, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": outcome.appointment,
        "slot": SlotView::from(&outcome.slot),
        "entry": outcome.entry
    })))
}

#[axum::debug_handler]
pub async fn unassign_patient(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<UnassignRequest>,
) -> Result<Json<Value>, AppError> {
    require_dispatcher(&user)?;

    let outcome = AssignmentBoardService::new(&state)
        .unassign(request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": outcome.appointment,
        "slot": outcome.slot.as_ref().map(SlotView::from),
        "entry": outcome.entry
    })))
}

#[axum::debug_handler]
pub async fn move_patient(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<MoveRequest>,
) -> Result<Json<Value>, AppError> {
    require_dispatcher(&user)?;

    let (moved, entry) = AssignmentBoardService::new(&state)
        .move_patient(request, &user, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": moved.appointment,
        "previous_appointment": moved.previous_appointment,
        "from_slot": moved.from_slot.as_ref().map(SlotView::from),
        "to_slot": SlotView::from(&moved.to_slot),
        "entry": entry
    })))
}

/// Live board feed. Subscribes before the upgrade completes so no event
/// published during the handshake is missed.
pub async fn live_board(
    State(state): State<SchedulingState>,
    Extension(user): Extension<User>,
    Query(query): Query<BoardDateQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    require_worker(&user)?;

    let date = query.date.unwrap_or_else(today_jst);
    let receiver = state.events.subscribe();
    debug!("User {} subscribing to live board for {}", user.id, date);

    Ok(ws.on_upgrade(move |socket| stream_board(socket, receiver, date)))
}
