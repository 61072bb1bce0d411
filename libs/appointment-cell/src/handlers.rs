// libs/appointment-cell/src/handlers.rs
use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_utils::extractor::{require_dispatcher, require_self_or_worker, require_worker};

use crate::models::{
    Appointment, AppointmentStatus, BookAppointmentRequest, CancelAppointmentRequest,
    ConflictCheckQuery, DoctorDayQuery, GenerateSlotsRequest, RescheduleAppointmentRequest,
    SlotQuery, SlotView, UpdateStatusRequest,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::{AppointmentBookingService, SlotService};
use crate::state::SchedulingState;

fn ensure_can_view(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    if user.is_worker() || appointment.is_participant(&user.id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized to access this appointment".to_string()))
    }
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[axum::debug_handler]
pub async fn generate_slots(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<GenerateSlotsRequest>,
) -> Result<Json<Value>, AppError> {
    let own_schedule = user.has_role(Role::Doctor) && user.is_self(request.doctor_id);
    if !own_schedule {
        require_dispatcher(&user)?;
    }

    let result = SlotService::new(&state)
        .generate_slots(request, auth.token())
        .await?;

    Ok(Json(json!({
        "created": result.created.iter().map(SlotView::from).collect::<Vec<_>>(),
        "skipped": result.skipped,
        "created_count": result.created.len(),
        "skipped_count": result.skipped.len()
    })))
}

#[axum::debug_handler]
pub async fn list_slots(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = SlotService::new(&state)
        .list_slots(&query, auth.token())
        .await?;

    Ok(Json(json!({
        "slots": slots.iter().map(SlotView::from).collect::<Vec<_>>(),
        "total": slots.len()
    })))
}

#[axum::debug_handler]
pub async fn block_slot(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_worker(&user)?;

    let slot = SlotService::new(&state).block_slot(slot_id, auth.token()).await?;
    Ok(Json(json!(SlotView::from(&slot))))
}

#[axum::debug_handler]
pub async fn unblock_slot(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_worker(&user)?;

    let slot = SlotService::new(&state).unblock_slot(slot_id, auth.token()).await?;
    Ok(Json(json!(SlotView::from(&slot))))
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    require_self_or_worker(&user, request.patient_id)?;

    let outcome = AppointmentBookingService::new(&state)
        .book_appointment(request, &user, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": outcome.appointment,
        "slot": SlotView::from(&outcome.slot)
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = AppointmentBookingService::new(&state)
        .get_appointment(appointment_id, auth.token())
        .await?;
    ensure_can_view(&user, &appointment)?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn get_patient_appointments(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_self_or_worker(&user, patient_id)?;

    let appointments = AppointmentBookingService::new(&state)
        .get_patient_appointments(patient_id, auth.token())
        .await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_doctor_appointments(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DoctorDayQuery>,
) -> Result<Json<Value>, AppError> {
    require_worker(&user)?;

    let appointments = AppointmentBookingService::new(&state)
        .get_doctor_appointments(doctor_id, query.date, auth.token())
        .await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    AppointmentLifecycleService::new().ensure_role_may_set(user.clinic_role(), request.status)?;

    let service = AppointmentBookingService::new(&state);
    let appointment = service.get_appointment(appointment_id, auth.token()).await?;
    ensure_can_view(&user, &appointment)?;

    // Patients cannot leave notes for the doctor record.
    let notes = if user.is_worker() { request.doctor_notes } else { None };
    let updated = service
        .update_status(appointment_id, request.status, notes, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": updated
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentBookingService::new(&state);
    let appointment = service.get_appointment(appointment_id, auth.token()).await?;
    require_self_or_worker(&user, appointment.patient_id)?;

    let outcome = service
        .cancel_appointment(appointment_id, &request.reason, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": outcome.appointment,
        "slot": outcome.slot.as_ref().map(SlotView::from)
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentBookingService::new(&state);
    let appointment = service.get_appointment(appointment_id, auth.token()).await?;
    require_self_or_worker(&user, appointment.patient_id)?;

    let outcome = service
        .reschedule_appointment(&appointment, request.new_slot_id, &user, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": outcome.appointment,
        "previous_appointment": outcome.previous_appointment,
        "from_slot": outcome.from_slot.as_ref().map(SlotView::from),
        "to_slot": SlotView::from(&outcome.to_slot),
        "waiting_entry": outcome.waiting_entry
    })))
}

#[axum::debug_handler]
pub async fn check_conflicts(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<ConflictCheckQuery>,
) -> Result<Json<Value>, AppError> {
    require_worker(&user)?;

    let result = AppointmentBookingService::new(&state)
        .check_conflicts(query.doctor_id, query.start.utc(), query.end.utc(), auth.token())
        .await?;

    Ok(Json(json!(result)))
}

/// Statuses a caller may move the appointment to next.
#[axum::debug_handler]
pub async fn get_allowed_transitions(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = AppointmentBookingService::new(&state)
        .get_appointment(appointment_id, auth.token())
        .await?;
    ensure_can_view(&user, &appointment)?;

    let lifecycle = AppointmentLifecycleService::new();
    let allowed: Vec<AppointmentStatus> = lifecycle
        .get_valid_transitions(appointment.status)
        .into_iter()
        .filter(|status| lifecycle.ensure_role_may_set(user.clinic_role(), *status).is_ok())
        .collect();

    Ok(Json(json!({
        "status": appointment.status,
        "allowed": allowed
    })))
}
