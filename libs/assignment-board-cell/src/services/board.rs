//! The operator assignment board: one column per active doctor, the waiting
//! queue beside it, and the operations that move patients between them.
//!
//! Assign takes the waiting entry's lock together with the slot lock so two
//! operators dragging the same patient onto different slots serialize, and
//! the loser finds the entry already `assigned`.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use appointment_cell::services::booking::user_uuid;
use appointment_cell::services::events::ScheduleEventHub;
use appointment_cell::services::locking::{slot_key, waiting_key};
use appointment_cell::services::SlotClaimService;
use appointment_cell::{
    AppointmentError, BookingSource, ClaimRequest, DoctorSlot, MoveOutcome, ReleaseOutcome, SlotStatus,
    SlotView,
};
use appointment_cell::SchedulingState;
use patient_cell::{Patient, PatientService, PatientSummary};
use shared_models::auth::User;
use shared_utils::timezone::{jst_day_bounds, today_jst, ClinicTime};
use worker_cell::{Worker, WorkerService};

use crate::error::BoardError;
use crate::models::{
    AssignOutcome, AssignRequest, BoardCounters, BoardSlot, BoardView, CreateWaitingEntryRequest,
    DoctorColumn, MoveRequest, UnassignOutcome, UnassignRequest, WaitingEntry, WaitingStatus,
};
use crate::services::waiting::{waiting_changed, WaitingListService};

pub struct AssignmentBoardService {
    claims: SlotClaimService,
    waiting: WaitingListService,
    workers: WorkerService,
    patients: PatientService,
    events: ScheduleEventHub,
}

impl AssignmentBoardService {
    pub fn new(state: &SchedulingState) -> Self {
        Self {
            claims: SlotClaimService::new(state),
            waiting: WaitingListService::new(&state.config),
            workers: WorkerService::new(&state.config),
            patients: PatientService::new(&state.config),
            events: state.events.clone(),
        }
    }

    // ==========================================================================
    // WAITING LIST
    // ==========================================================================

    pub async fn add_waiting(
        &self,
        request: CreateWaitingEntryRequest,
        auth_token: &str,
    ) -> Result<WaitingEntry, BoardError> {
        let entry = self.waiting.add_entry(request, auth_token).await?;
        self.events.publish(waiting_changed(&entry));
        Ok(entry)
    }

    pub async fn list_waiting(
        &self,
        date: Option<NaiveDate>,
        auth_token: &str,
    ) -> Result<Vec<WaitingEntry>, BoardError> {
        self.waiting.list_waiting(date, auth_token).await
    }

    pub async fn get_waiting(&self, entry_id: Uuid, auth_token: &str) -> Result<WaitingEntry, BoardError> {
        self.waiting.get_entry(entry_id, auth_token).await
    }

    pub async fn cancel_waiting(&self, entry_id: Uuid, auth_token: &str) -> Result<WaitingEntry, BoardError> {
        let leases = self.claims.locks().acquire_all(vec![waiting_key(entry_id)]).await?;
        let result = self.waiting.cancel_entry(entry_id, auth_token).await;
        self.claims.locks().release_all(leases).await;

        let entry = result?;
        info!("Waiting entry {} cancelled", entry.id);
        self.events.publish(waiting_changed(&entry));
        Ok(entry)
    }

    // ==========================================================================
    // BOARD VIEW
    // ==========================================================================

    pub async fn board_view(&self, date: Option<NaiveDate>, auth_token: &str) -> Result<BoardView, BoardError> {
        let date = date.unwrap_or_else(today_jst);
        let (from, to) = jst_day_bounds(date).map_err(AppointmentError::from)?;

        let doctors = self.workers.list_active_doctors(auth_token).await?;
        let slots = self.claims.repository().list_slots(from, to, None, None, auth_token).await?;

        let mut patient_ids: Vec<Uuid> = slots.iter().filter_map(|slot| slot.patient_id).collect();
        patient_ids.sort();
        patient_ids.dedup();
        let patients = self.patients.get_patients(&patient_ids, auth_token).await?;

        let waiting = self.waiting.list_waiting(Some(date), auth_token).await?;

        Ok(assemble_board(date, doctors, slots, &patients, waiting))
    }

    // ==========================================================================
    // OPERATIONS
    // ==========================================================================

    #[instrument(skip(self, operator, auth_token), fields(operator = %operator.id))]
    pub async fn assign(
        &self,
        request: AssignRequest,
        operator: &User,
        auth_token: &str,
    ) -> Result<AssignOutcome, BoardError> {
        let operator_id = user_uuid(operator)?;
        let leases = self.claims.locks()
            .acquire_all(vec![waiting_key(request.waiting_id), slot_key(request.slot_id)])
            .await?;
        let result = self.assign_locked(&request, operator_id, auth_token).await;
        self.claims.locks().release_all(leases).await;

        let outcome = result?;
        info!("Assigned waiting entry {} to slot {}", outcome.entry.id, outcome.slot.id);
        self.claims.publish_claim(&appointment_cell::ClaimOutcome {
            appointment: outcome.appointment.clone(),
            slot: outcome.slot.clone(),
        });
        self.events.publish(waiting_changed(&outcome.entry));
        Ok(outcome)
    }

    async fn assign_locked(
        &self,
        request: &AssignRequest,
        operator_id: Uuid,
        auth_token: &str,
    ) -> Result<AssignOutcome, BoardError> {
        let entry = self.waiting.get_entry(request.waiting_id, auth_token).await?;
        if entry.status != WaitingStatus::Waiting {
            return Err(BoardError::EntryNotWaiting(entry.status));
        }

        let claimed = self.claims.claim_locked(&ClaimRequest {
            slot_id: request.slot_id,
            patient_id: entry.patient_id,
            appointment_type: entry.priority.appointment_type(),
            reason: Some(entry.chief_complaint.clone()),
            booked_by: operator_id,
            source: BookingSource::OperatorBoard,
            replaces: None,
        }, auth_token).await?;

        // The entry can still change without the lock (direct cancel by the
        // patient through another instance), so the write is conditional.
        let marked = self.waiting.mark_assigned(entry.id, claimed.appointment.id, auth_token).await;
        match marked {
            Ok(Some(entry)) => Ok(AssignOutcome {
                appointment: claimed.appointment,
                slot: claimed.slot,
                entry,
            }),
            Ok(None) => {
                self.undo_claim(&claimed.appointment, auth_token).await;
                let current = self.waiting.get_entry(entry.id, auth_token).await?;
                Err(BoardError::EntryNotWaiting(current.status))
            }
            Err(e) => {
                self.undo_claim(&claimed.appointment, auth_token).await;
                Err(e)
            }
        }
    }

    async fn undo_claim(&self, appointment: &appointment_cell::Appointment, auth_token: &str) {
        warn!("Releasing appointment {} after failed assignment", appointment.id);
        if let Err(e) = self.claims.release_locked(appointment, "waiting entry changed during assignment", auth_token).await {
            warn!("Failed to release appointment {}: {}", appointment.id, e);
        }
    }

    #[instrument(skip(self, auth_token))]
    pub async fn unassign(
        &self,
        request: UnassignRequest,
        auth_token: &str,
    ) -> Result<UnassignOutcome, BoardError> {
        let leases = self.claims.locks().acquire_all(vec![slot_key(request.slot_id)]).await?;
        let result = self.unassign_locked(&request, auth_token).await;
        self.claims.locks().release_all(leases).await;

        let outcome = result?;
        self.claims.publish_release(&ReleaseOutcome {
            appointment: outcome.appointment.clone(),
            slot: outcome.slot.clone(),
        });
        if let Some(entry) = &outcome.entry {
            self.events.publish(waiting_changed(entry));
        }
        Ok(outcome)
    }

    async fn unassign_locked(
        &self,
        request: &UnassignRequest,
        auth_token: &str,
    ) -> Result<UnassignOutcome, BoardError> {
        let slot = self.claims.repository().get_slot(request.slot_id, auth_token).await?;
        let appointment_id = match (slot.status, slot.appointment_id) {
            (SlotStatus::Booked, Some(id)) => id,
            (status, _) => return Err(AppointmentError::SlotUnavailable(status).into()),
        };

        let appointment = self.claims.repository().get_appointment(appointment_id, auth_token).await?;
        let released = self.claims.release_locked(&appointment, "unassigned on the board", auth_token).await?;

        let entry = match self.waiting.find_by_appointment(appointment_id, auth_token).await? {
            Some(entry) if request.return_to_waiting => {
                self.waiting.return_to_waiting(entry.id, appointment_id, auth_token).await?
            }
            _ => None,
        };

        info!("Slot {} unassigned (appointment {})", request.slot_id, appointment_id);
        Ok(UnassignOutcome {
            appointment: released.appointment,
            slot: released.slot,
            entry,
        })
    }

    /// Drag a booked patient onto another slot. The shared move path re-points
    /// the waiting entry; it is re-read here for the response only.
    #[instrument(skip(self, operator, auth_token), fields(operator = %operator.id))]
    pub async fn move_patient(
        &self,
        request: MoveRequest,
        operator: &User,
        auth_token: &str,
    ) -> Result<(MoveOutcome, Option<WaitingEntry>), BoardError> {
        let moved = self.claims.move_booking(
            request.from_slot_id,
            request.to_slot_id,
            None,
            user_uuid(operator)?,
            BookingSource::OperatorBoard,
            auth_token,
        ).await?;

        let entry = match &moved.waiting_entry {
            Some(followed) => self.waiting.get_entry(followed.id, auth_token).await
                .map(Some)
                .unwrap_or_else(|e| {
                    warn!("Could not reload waiting entry {} after move: {}", followed.id, e);
                    None
                }),
            None => None,
        };

        info!("Moved appointment {} from slot {} to slot {}",
              moved.previous_appointment.id, request.from_slot_id, request.to_slot_id);
        Ok((moved, entry))
    }
}

/// Lay slots out in per-doctor columns. Slots of doctors who are not active
/// are left off the board.
pub fn assemble_board(
    date: NaiveDate,
    doctors: Vec<Worker>,
    slots: Vec<DoctorSlot>,
    patients: &[Patient],
    waiting: Vec<WaitingEntry>,
) -> BoardView {
    let today = today_jst();
    let summaries: HashMap<Uuid, PatientSummary> = patients
        .iter()
        .map(|patient| (patient.id, PatientSummary::of(patient, today)))
        .collect();

    let mut by_doctor: HashMap<Uuid, Vec<DoctorSlot>> = HashMap::new();
    for slot in slots {
        by_doctor.entry(slot.doctor_id).or_default().push(slot);
    }

    let mut counters = BoardCounters {
        waiting: waiting.len(),
        ..BoardCounters::default()
    };

    let columns = doctors
        .into_iter()
        .map(|doctor| {
            let mut slots = by_doctor.remove(&doctor.id).unwrap_or_default();
            slots.sort_by_key(|slot| slot.start_time);

            let slots = slots
                .iter()
                .map(|slot| {
                    counters.count_slot(slot.status);
                    BoardSlot {
                        slot: SlotView::from(slot),
                        patient: slot.patient_id.and_then(|id| summaries.get(&id).cloned()),
                    }
                })
                .collect();

            DoctorColumn {
                doctor_id: doctor.id,
                doctor_name: doctor.display_name(),
                specialty: doctor.specialty,
                slots,
            }
        })
        .collect();

    BoardView {
        date,
        generated_at: ClinicTime::from(Utc::now()),
        columns,
        waiting,
        counters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use shared_models::auth::Role;

    use crate::models::Priority;

    fn doctor(last_name: &str) -> Worker {
        Worker {
            id: Uuid::new_v4(),
            email: format!("{}@clinic.jp", last_name),
            first_name: "太郎".to_string(),
            last_name: last_name.to_string(),
            role: Role::Doctor,
            specialty: Some("内科".to_string()),
            license_number: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn slot(doctor_id: Uuid, hour: u32, status: SlotStatus, patient_id: Option<Uuid>) -> DoctorSlot {
        let start = Utc.with_ymd_and_hms(2030, 5, 1, hour, 0, 0).unwrap();
        DoctorSlot {
            id: Uuid::new_v4(),
            doctor_id,
            start_time: start,
            end_time: start + Duration::minutes(30),
            status,
            appointment_id: patient_id.map(|_| Uuid::new_v4()),
            patient_id,
            created_at: start,
            updated_at: start,
        }
    }

    fn patient(id: Uuid) -> Patient {
        Patient {
            id,
            email: "hanako@example.jp".to_string(),
            first_name: "花子".to_string(),
            last_name: "山田".to_string(),
            first_name_kana: Some("ハナコ".to_string()),
            last_name_kana: Some("ヤマダ".to_string()),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 1).unwrap(),
            gender: None,
            phone: None,
            address: None,
            allergies: Vec::new(),
            current_medications: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn waiting_entry() -> WaitingEntry {
        WaitingEntry {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            chief_complaint: "めまい".to_string(),
            preferred_date: None,
            priority: Priority::Soon,
            status: WaitingStatus::Waiting,
            appointment_id: None,
            requested_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn columns_follow_doctor_order_with_sorted_slots() {
        let sato = doctor("佐藤");
        let suzuki = doctor("鈴木");
        let booked_patient = Uuid::new_v4();
        let slots = vec![
            slot(sato.id, 2, SlotStatus::Open, None),
            slot(suzuki.id, 1, SlotStatus::Blocked, None),
            slot(sato.id, 1, SlotStatus::Booked, Some(booked_patient)),
            slot(Uuid::new_v4(), 1, SlotStatus::Open, None),
        ];
        let date = NaiveDate::from_ymd_opt(2030, 5, 1).unwrap();

        let board = assemble_board(
            date,
            vec![sato.clone(), suzuki.clone()],
            slots,
            &[patient(booked_patient)],
            vec![waiting_entry()],
        );

        assert_eq!(board.columns.len(), 2);
        assert_eq!(board.columns[0].doctor_id, sato.id);
        assert_eq!(board.columns[0].doctor_name, "佐藤 太郎");
        let first = &board.columns[0].slots[0];
        assert_eq!(first.slot.status, SlotStatus::Booked);
        assert_eq!(first.patient.as_ref().map(|p| p.display_name.as_str()), Some("山田 花子"));
        assert!(board.columns[0].slots[1].patient.is_none());

        // The inactive doctor's slot is not counted.
        assert_eq!(board.counters, BoardCounters { open: 1, booked: 1, blocked: 1, waiting: 1 });
    }

    #[test]
    fn doctor_without_slots_gets_an_empty_column() {
        let board = assemble_board(
            NaiveDate::from_ymd_opt(2030, 5, 1).unwrap(),
            vec![doctor("高橋")],
            Vec::new(),
            &[],
            Vec::new(),
        );
        assert_eq!(board.columns.len(), 1);
        assert!(board.columns[0].slots.is_empty());
        assert_eq!(board.counters, BoardCounters::default());
    }
}
