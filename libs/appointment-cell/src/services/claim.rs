//! Booking a patient into a slot, releasing it, and moving between slots.
//!
//! Every write path runs under the slot's lock and finishes with a
//! compare-and-set on the slot row, so a second writer that slipped past the
//! lock (expired lease, another backend) still cannot double-book: its CAS
//! matches nothing and its appointment is cancelled again.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BookingSource, ClaimOutcome, ClaimRequest,
    DoctorSlot, MoveOutcome, ReleaseOutcome, SlotStatus,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::events::{ScheduleEvent, ScheduleEventHub};
use crate::services::locking::{slot_key, SlotLockManager};
use crate::services::repository::AppointmentRepository;
use crate::state::SchedulingState;

pub struct SlotClaimService {
    repository: AppointmentRepository,
    locks: SlotLockManager,
    events: ScheduleEventHub,
}

impl SlotClaimService {
    pub fn new(state: &SchedulingState) -> Self {
        Self {
            repository: AppointmentRepository::new(&state.config),
            locks: state.locks.clone(),
            events: state.events.clone(),
        }
    }

    pub fn locks(&self) -> &SlotLockManager {
        &self.locks
    }

    pub fn repository(&self) -> &AppointmentRepository {
        &self.repository
    }

    pub async fn claim(&self, request: ClaimRequest, auth_token: &str) -> Result<ClaimOutcome, AppointmentError> {
        let leases = self.locks.acquire_all(vec![slot_key(request.slot_id)]).await?;
        let result = self.claim_locked(&request, auth_token).await;
        self.locks.release_all(leases).await;

        let outcome = result?;
        self.publish_claim(&outcome);
        Ok(outcome)
    }

    /// Claim with the slot lock already held by the caller.
    pub async fn claim_locked(&self, request: &ClaimRequest, auth_token: &str) -> Result<ClaimOutcome, AppointmentError> {
        let slot = self.repository.get_slot(request.slot_id, auth_token).await?;
        if slot.status != SlotStatus::Open {
            return Err(AppointmentError::SlotUnavailable(slot.status));
        }
        if slot.start_time <= Utc::now() {
            return Err(AppointmentError::SlotInPast);
        }

        ConflictDetectionService::new(&self.repository)
            .ensure_free(
                slot.doctor_id,
                request.patient_id,
                slot.start_time,
                slot.end_time,
                request.replaces,
                auth_token,
            )
            .await?;

        let now = Utc::now().to_rfc3339();
        let appointment = self.repository.insert_appointment(json!({
            "id": Uuid::new_v4(),
            "patient_id": request.patient_id,
            "doctor_id": slot.doctor_id,
            "slot_id": slot.id,
            "start_time": slot.start_time.to_rfc3339(),
            "end_time": slot.end_time.to_rfc3339(),
            "status": AppointmentStatus::Confirmed,
            "appointment_type": request.appointment_type,
            "reason": request.reason,
            "doctor_notes": null,
            "cancellation_reason": null,
            "prescription_issued": false,
            "booked_by": request.booked_by,
            "source": request.source,
            "created_at": now,
            "updated_at": now
        }), auth_token).await?;

        let booked = self.repository.update_slot_if(
            slot.id,
            SlotStatus::Open,
            None,
            json!({
                "status": SlotStatus::Booked,
                "appointment_id": appointment.id,
                "patient_id": request.patient_id,
                "updated_at": Utc::now().to_rfc3339()
            }),
            auth_token,
        ).await;

        match booked {
            Ok(Some(slot)) => {
                info!("Slot {} booked for patient {} (appointment {})", slot.id, request.patient_id, appointment.id);
                Ok(ClaimOutcome { appointment, slot })
            }
            Ok(None) => {
                warn!("Lost the race for slot {}, cancelling appointment {}", slot.id, appointment.id);
                self.compensate(appointment.id, auth_token).await;
                Err(AppointmentError::SlotTaken)
            }
            Err(e) => {
                self.compensate(appointment.id, auth_token).await;
                Err(e)
            }
        }
    }

    /// Cancel an appointment and reopen its slot.
    pub async fn release(
        &self,
        appointment_id: Uuid,
        reason: &str,
        auth_token: &str,
    ) -> Result<ReleaseOutcome, AppointmentError> {
        let appointment = self.repository.get_appointment(appointment_id, auth_token).await?;
        let keys = appointment.slot_id.map(slot_key).into_iter().collect();

        let leases = self.locks.acquire_all(keys).await?;
        let result = self.release_locked(&appointment, reason, auth_token).await;
        self.locks.release_all(leases).await;

        let outcome = result?;
        self.publish_release(&outcome);
        Ok(outcome)
    }

    /// Release with the slot lock (if any) already held by the caller.
    pub async fn release_locked(
        &self,
        appointment: &Appointment,
        reason: &str,
        auth_token: &str,
    ) -> Result<ReleaseOutcome, AppointmentError> {
        if appointment.status.is_terminal() {
            return Err(AppointmentError::InvalidStatusTransition {
                from: appointment.status,
                to: AppointmentStatus::Cancelled,
            });
        }

        let cancelled = self.repository.update_appointment_if(
            appointment.id,
            &AppointmentStatus::ACTIVE,
            cancellation(reason),
            auth_token,
        ).await?
        .ok_or(AppointmentError::ConcurrentUpdate)?;

        let slot = match appointment.slot_id {
            Some(slot_id) => self.reopen_slot(slot_id, appointment.id, auth_token).await?,
            None => None,
        };

        info!("Appointment {} cancelled: {}", appointment.id, reason);
        Ok(ReleaseOutcome { appointment: cancelled, slot })
    }

    /// Move the booking in `from_slot_id` to `to_slot_id`. The target is
    /// claimed before the source is released, so a failed claim leaves the
    /// original booking untouched, and a failed release gives the target
    /// back. `expected` pins the appointment the caller believes occupies the
    /// source slot. A waiting entry assigned to the old appointment follows
    /// the new one.
    pub async fn move_booking(
        &self,
        from_slot_id: Uuid,
        to_slot_id: Uuid,
        expected: Option<Uuid>,
        moved_by: Uuid,
        source: BookingSource,
        auth_token: &str,
    ) -> Result<MoveOutcome, AppointmentError> {
        if from_slot_id == to_slot_id {
            return Err(AppointmentError::ValidationError("Source and target slot are the same".to_string()));
        }

        let leases = self.locks
            .acquire_all(vec![slot_key(from_slot_id), slot_key(to_slot_id)])
            .await?;
        let result = self.move_locked(from_slot_id, to_slot_id, expected, moved_by, source, auth_token).await;
        self.locks.release_all(leases).await;

        let outcome = result?;
        self.publish_move(&outcome);
        Ok(outcome)
    }

    async fn move_locked(
        &self,
        from_slot_id: Uuid,
        to_slot_id: Uuid,
        expected: Option<Uuid>,
        moved_by: Uuid,
        source: BookingSource,
        auth_token: &str,
    ) -> Result<MoveOutcome, AppointmentError> {
        let from_slot = self.repository.get_slot(from_slot_id, auth_token).await?;
        let appointment_id = match (from_slot.status, from_slot.appointment_id) {
            (SlotStatus::Booked, Some(id)) => id,
            (status, _) => return Err(AppointmentError::SlotUnavailable(status)),
        };
        if expected.is_some_and(|id| id != appointment_id) {
            return Err(AppointmentError::ConcurrentUpdate);
        }

        let previous = self.repository.get_appointment(appointment_id, auth_token).await?;
        if !matches!(previous.status, AppointmentStatus::Pending | AppointmentStatus::Confirmed) {
            return Err(AppointmentError::InvalidStatusTransition {
                from: previous.status,
                to: AppointmentStatus::Cancelled,
            });
        }

        let claimed = self.claim_locked(&ClaimRequest {
            slot_id: to_slot_id,
            patient_id: previous.patient_id,
            appointment_type: previous.appointment_type,
            reason: previous.reason.clone(),
            booked_by: moved_by,
            source,
            replaces: Some(previous.id),
        }, auth_token).await?;

        let released = match self.release_locked(&previous, "moved to another slot", auth_token).await {
            Ok(released) => released,
            Err(e) => {
                warn!("Releasing appointment {} failed ({}), undoing claim of slot {}", previous.id, e, to_slot_id);
                if let Err(undo) = self.release_locked(&claimed.appointment, "move rolled back", auth_token).await {
                    warn!("Failed to release appointment {}: {}", claimed.appointment.id, undo);
                }
                return Err(e);
            }
        };

        // The move has committed. A stale waiting entry is logged, not fatal.
        let waiting_entry = self.repository
            .follow_waiting_entry(previous.id, claimed.appointment.id, auth_token)
            .await
            .unwrap_or_else(|e| {
                warn!("Waiting entry of appointment {} did not follow the move: {}", previous.id, e);
                None
            });

        Ok(MoveOutcome {
            appointment: claimed.appointment,
            previous_appointment: released.appointment,
            from_slot: released.slot,
            to_slot: claimed.slot,
            waiting_entry,
        })
    }

    async fn reopen_slot(
        &self,
        slot_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<DoctorSlot>, AppointmentError> {
        let reopened = self.repository.update_slot_if(
            slot_id,
            SlotStatus::Booked,
            Some(appointment_id),
            json!({
                "status": SlotStatus::Open,
                "appointment_id": null,
                "patient_id": null,
                "updated_at": Utc::now().to_rfc3339()
            }),
            auth_token,
        ).await?;

        if reopened.is_none() {
            warn!("Slot {} no longer linked to appointment {}", slot_id, appointment_id);
        }
        Ok(reopened)
    }

    async fn compensate(&self, appointment_id: Uuid, auth_token: &str) {
        let result = self.repository.update_appointment_if(
            appointment_id,
            &AppointmentStatus::ACTIVE,
            cancellation("slot claimed concurrently"),
            auth_token,
        ).await;

        if let Err(e) = result {
            warn!("Failed to cancel orphaned appointment {}: {}", appointment_id, e);
        }
    }

    pub fn publish_claim(&self, outcome: &ClaimOutcome) {
        self.events.publish_all([
            ScheduleEvent::slot_changed(&outcome.slot),
            appointment_changed(&outcome.appointment),
        ]);
    }

    pub fn publish_release(&self, outcome: &ReleaseOutcome) {
        self.events.publish(appointment_changed(&outcome.appointment));
        if let Some(slot) = &outcome.slot {
            self.events.publish(ScheduleEvent::slot_changed(slot));
        }
    }

    pub fn publish_move(&self, outcome: &MoveOutcome) {
        self.events.publish_all([
            ScheduleEvent::slot_changed(&outcome.to_slot),
            appointment_changed(&outcome.appointment),
            appointment_changed(&outcome.previous_appointment),
        ]);
        if let Some(slot) = &outcome.from_slot {
            self.events.publish(ScheduleEvent::slot_changed(slot));
        }
        if let Some(entry) = &outcome.waiting_entry {
            self.events.publish(ScheduleEvent::WaitingListChanged {
                date: entry.preferred_date,
                entry_id: entry.id,
                status: "assigned".to_string(),
            });
        }
    }
}

pub fn appointment_changed(appointment: &Appointment) -> ScheduleEvent {
    ScheduleEvent::AppointmentChanged {
        date: appointment.jst_date(),
        appointment_id: appointment.id,
        slot_id: appointment.slot_id,
        status: appointment.status,
    }
}

fn cancellation(reason: &str) -> Value {
    json!({
        "status": AppointmentStatus::Cancelled,
        "cancellation_reason": reason,
        "updated_at": Utc::now().to_rfc3339()
    })
}
