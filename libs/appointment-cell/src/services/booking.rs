// libs/appointment-cell/src/services/booking.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_models::auth::User;
use shared_utils::timezone::{jst_day_bounds, query_timestamp};

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BookAppointmentRequest, BookingSource,
    ClaimOutcome, ClaimRequest, ConflictCheckResponse, MoveOutcome, ReleaseOutcome,
};
use crate::services::claim::{appointment_changed, SlotClaimService};
use crate::services::conflict::ConflictDetectionService;
use crate::services::events::ScheduleEventHub;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::state::SchedulingState;

pub struct AppointmentBookingService {
    claims: SlotClaimService,
    lifecycle: AppointmentLifecycleService,
    events: ScheduleEventHub,
}

impl AppointmentBookingService {
    pub fn new(state: &SchedulingState) -> Self {
        Self {
            claims: SlotClaimService::new(state),
            lifecycle: AppointmentLifecycleService::new(),
            events: state.events.clone(),
        }
    }

    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        booked_by: &User,
        auth_token: &str,
    ) -> Result<ClaimOutcome, AppointmentError> {
        let booked_by_id = user_uuid(booked_by)?;
        let source = portal_source(booked_by);
        debug!("Booking slot {} for patient {} via {:?}", request.slot_id, request.patient_id, source);

        self.claims.claim(ClaimRequest {
            slot_id: request.slot_id,
            patient_id: request.patient_id,
            appointment_type: request.appointment_type,
            reason: request.reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
            booked_by: booked_by_id,
            source,
            replaces: None,
        }, auth_token).await
    }

    pub async fn get_appointment(&self, appointment_id: Uuid, auth_token: &str) -> Result<Appointment, AppointmentError> {
        self.claims.repository().get_appointment(appointment_id, auth_token).await
    }

    pub async fn get_patient_appointments(&self, patient_id: Uuid, auth_token: &str) -> Result<Vec<Appointment>, AppointmentError> {
        self.claims.repository()
            .list_appointments(&[format!("patient_id=eq.{}", patient_id)], auth_token)
            .await
    }

    pub async fn get_doctor_appointments(
        &self,
        doctor_id: Uuid,
        date: Option<NaiveDate>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut filters = vec![format!("doctor_id=eq.{}", doctor_id)];
        if let Some(date) = date {
            let (from, to) = jst_day_bounds(date)?;
            filters.push(format!("start_time=gte.{}", query_timestamp(from)));
            filters.push(format!("start_time=lt.{}", query_timestamp(to)));
        }
        self.claims.repository().list_appointments(&filters, auth_token).await
    }

    /// Validated status change. Cancellation goes through the slot release so
    /// the slot opens up again.
    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        doctor_notes: Option<String>,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(appointment_id, auth_token).await?;
        self.lifecycle.validate_status_transition(current.status, new_status)?;

        if new_status == AppointmentStatus::Cancelled {
            let reason = doctor_notes.as_deref().unwrap_or("cancelled");
            return Ok(self.cancel_appointment(appointment_id, reason, auth_token).await?.appointment);
        }

        let mut changes = Map::new();
        changes.insert("status".to_string(), json!(new_status));
        changes.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
        if let Some(notes) = doctor_notes {
            changes.insert("doctor_notes".to_string(), json!(notes));
        }

        let updated = self.claims.repository()
            .update_appointment_if(appointment_id, &[current.status], Value::Object(changes), auth_token)
            .await?
            .ok_or(AppointmentError::ConcurrentUpdate)?;

        info!("Appointment {} {} -> {}", appointment_id, current.status, new_status);
        self.events.publish(appointment_changed(&updated));
        Ok(updated)
    }

    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        reason: &str,
        auth_token: &str,
    ) -> Result<ReleaseOutcome, AppointmentError> {
        if reason.trim().is_empty() {
            return Err(AppointmentError::ValidationError("A cancellation reason is required".to_string()));
        }
        self.claims.release(appointment_id, reason.trim(), auth_token).await
    }

    pub async fn reschedule_appointment(
        &self,
        appointment: &Appointment,
        new_slot_id: Uuid,
        moved_by: &User,
        auth_token: &str,
    ) -> Result<MoveOutcome, AppointmentError> {
        let from_slot_id = appointment.slot_id.ok_or_else(|| {
            AppointmentError::ValidationError("Appointment is not linked to a slot".to_string())
        })?;
        self.claims
            .move_booking(
                from_slot_id,
                new_slot_id,
                Some(appointment.id),
                user_uuid(moved_by)?,
                portal_source(moved_by),
                auth_token,
            )
            .await
    }

    pub async fn check_conflicts(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        if start >= end {
            return Err(AppointmentError::ValidationError("start must be before end".to_string()));
        }
        ConflictDetectionService::new(self.claims.repository())
            .check_doctor(doctor_id, start, end, None, auth_token)
            .await
    }
}

/// Source for bookings made through `/appointments`. Only the board's own
/// operations are tagged `operator_board`.
pub fn portal_source(user: &User) -> BookingSource {
    if user.is_worker() {
        BookingSource::StaffPortal
    } else {
        BookingSource::PatientPortal
    }
}

pub fn user_uuid(user: &User) -> Result<Uuid, AppointmentError> {
    Uuid::parse_str(&user.id).map_err(|_| AppointmentError::Unauthorized)
}
