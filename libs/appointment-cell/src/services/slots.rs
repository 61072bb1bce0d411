use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use shared_utils::timezone::{jst_date_time_to_utc, jst_day_bounds, parse_jst_time_of_day, today_jst};

use crate::models::{
    AppointmentError, DoctorSlot, GenerateSlotsRequest, GenerateSlotsResponse, PlannedSlot, SlotQuery,
    SlotStatus,
};
use crate::services::conflict::intervals_overlap;
use crate::services::events::{ScheduleEvent, ScheduleEventHub};
use crate::services::locking::{slot_key, SlotLockManager};
use crate::services::repository::AppointmentRepository;
use crate::state::SchedulingState;

pub const MIN_SLOT_MINUTES: i64 = 5;
pub const MAX_SLOT_MINUTES: i64 = 120;

/// Contiguous slots of `minutes` from `start` to `end` (JST wall clock) on
/// `date`. A trailing remainder shorter than one slot is dropped.
pub fn plan_slots(
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    minutes: i64,
) -> Result<Vec<PlannedSlot>, AppointmentError> {
    if !(MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&minutes) {
        return Err(AppointmentError::ValidationError(format!(
            "slot_minutes must be between {} and {}",
            MIN_SLOT_MINUTES, MAX_SLOT_MINUTES
        )));
    }
    if start >= end {
        return Err(AppointmentError::ValidationError("start must be before end".to_string()));
    }

    let range_end = jst_date_time_to_utc(date, end)?;
    let step = Duration::minutes(minutes);
    let mut cursor = jst_date_time_to_utc(date, start)?;
    let mut planned = Vec::new();

    while cursor + step <= range_end {
        planned.push(PlannedSlot { start_time: cursor, end_time: cursor + step });
        cursor += step;
    }

    if planned.is_empty() {
        return Err(AppointmentError::ValidationError(
            "Range is shorter than one slot".to_string(),
        ));
    }
    Ok(planned)
}

/// Splits `planned` into slots to create and slots that collide with
/// `existing`.
pub fn partition_planned(
    planned: Vec<PlannedSlot>,
    existing: &[DoctorSlot],
) -> (Vec<PlannedSlot>, Vec<PlannedSlot>) {
    planned.into_iter().partition(|candidate| {
        !existing.iter().any(|slot| {
            intervals_overlap(candidate.start_time, candidate.end_time, slot.start_time, slot.end_time)
        })
    })
}

pub struct SlotService {
    repository: AppointmentRepository,
    locks: SlotLockManager,
    events: ScheduleEventHub,
}

impl SlotService {
    pub fn new(state: &SchedulingState) -> Self {
        Self {
            repository: AppointmentRepository::new(&state.config),
            locks: state.locks.clone(),
            events: state.events.clone(),
        }
    }

    pub async fn generate_slots(
        &self,
        request: GenerateSlotsRequest,
        auth_token: &str,
    ) -> Result<GenerateSlotsResponse, AppointmentError> {
        if request.date < today_jst() {
            return Err(AppointmentError::ValidationError("Cannot generate slots for a past day".to_string()));
        }
        let start = parse_jst_time_of_day(&request.start)
            .map_err(|e| AppointmentError::ValidationError(e.to_string()))?;
        let end = parse_jst_time_of_day(&request.end)
            .map_err(|e| AppointmentError::ValidationError(e.to_string()))?;

        let planned = plan_slots(request.date, start, end, request.slot_minutes)?;
        let (day_start, day_end) = jst_day_bounds(request.date)?;
        let existing = self.repository
            .list_slots(day_start, day_end, Some(request.doctor_id), None, auth_token)
            .await?;

        let (fresh, skipped) = partition_planned(planned, &existing);
        debug!("Generating {} slots for doctor {} on {} ({} skipped)",
               fresh.len(), request.doctor_id, request.date, skipped.len());

        let now = Utc::now().to_rfc3339();
        let rows = fresh.iter().map(|slot| json!({
            "id": Uuid::new_v4(),
            "doctor_id": request.doctor_id,
            "start_time": slot.start_time.to_rfc3339(),
            "end_time": slot.end_time.to_rfc3339(),
            "status": SlotStatus::Open,
            "appointment_id": null,
            "patient_id": null,
            "created_at": now,
            "updated_at": now
        })).collect();

        let created = self.repository.insert_slots(rows, auth_token).await?;
        info!("Created {} slots for doctor {} on {}", created.len(), request.doctor_id, request.date);

        if !created.is_empty() {
            self.events.publish(ScheduleEvent::SlotsGenerated {
                date: request.date,
                doctor_id: request.doctor_id,
                count: created.len(),
            });
        }

        Ok(GenerateSlotsResponse { created, skipped })
    }

    pub async fn list_slots(&self, query: &SlotQuery, auth_token: &str) -> Result<Vec<DoctorSlot>, AppointmentError> {
        let (from, to) = jst_day_bounds(query.date.unwrap_or_else(today_jst))?;
        self.repository.list_slots(from, to, query.doctor_id, query.status, auth_token).await
    }

    pub async fn block_slot(&self, slot_id: Uuid, auth_token: &str) -> Result<DoctorSlot, AppointmentError> {
        self.switch_status(slot_id, SlotStatus::Open, SlotStatus::Blocked, auth_token).await
    }

    pub async fn unblock_slot(&self, slot_id: Uuid, auth_token: &str) -> Result<DoctorSlot, AppointmentError> {
        self.switch_status(slot_id, SlotStatus::Blocked, SlotStatus::Open, auth_token).await
    }

    async fn switch_status(
        &self,
        slot_id: Uuid,
        from: SlotStatus,
        to: SlotStatus,
        auth_token: &str,
    ) -> Result<DoctorSlot, AppointmentError> {
        let leases = self.locks.acquire_all(vec![slot_key(slot_id)]).await?;
        let result = self.repository.update_slot_if(
            slot_id,
            from,
            None,
            json!({ "status": to, "updated_at": Utc::now().to_rfc3339() }),
            auth_token,
        ).await;
        self.locks.release_all(leases).await;

        match result? {
            Some(slot) => {
                info!("Slot {} {} -> {}", slot_id, from, to);
                self.events.publish(ScheduleEvent::slot_changed(&slot));
                Ok(slot)
            }
            // Nothing matched: either the slot is gone or it is not in `from`.
            None => {
                let current = self.repository.get_slot(slot_id, auth_token).await?;
                Err(AppointmentError::SlotUnavailable(current.status))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{DateTime, TimeZone};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 5, 1).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn slot(start: DateTime<Utc>, minutes: i64) -> DoctorSlot {
        DoctorSlot {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            start_time: start,
            end_time: start + Duration::minutes(minutes),
            status: SlotStatus::Booked,
            appointment_id: None,
            patient_id: None,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn plans_contiguous_jst_slots() {
        let planned = plan_slots(date(), time(9, 0), time(10, 0), 20).unwrap();
        assert_eq!(planned.len(), 3);
        // 09:00 JST is midnight UTC.
        assert_eq!(planned[0].start_time, Utc.with_ymd_and_hms(2030, 5, 1, 0, 0, 0).unwrap());
        assert_eq!(planned[2].end_time, Utc.with_ymd_and_hms(2030, 5, 1, 1, 0, 0).unwrap());
        assert!(planned.windows(2).all(|w| w[0].end_time == w[1].start_time));
    }

    #[test]
    fn trailing_remainder_is_dropped() {
        let planned = plan_slots(date(), time(9, 0), time(9, 50), 20).unwrap();
        assert_eq!(planned.len(), 2);
    }

    #[test]
    fn rejects_bad_ranges() {
        assert_matches!(plan_slots(date(), time(10, 0), time(9, 0), 20), Err(AppointmentError::ValidationError(_)));
        assert_matches!(plan_slots(date(), time(9, 0), time(9, 10), 20), Err(AppointmentError::ValidationError(_)));
        assert_matches!(plan_slots(date(), time(9, 0), time(12, 0), 4), Err(AppointmentError::ValidationError(_)));
        assert_matches!(plan_slots(date(), time(9, 0), time(12, 0), 121), Err(AppointmentError::ValidationError(_)));
    }

    #[test]
    fn overlapping_candidates_are_skipped() {
        let planned = plan_slots(date(), time(9, 0), time(10, 0), 20).unwrap();
        // An existing 09:10-09:30 JST slot collides with the first two candidates.
        let existing = vec![slot(Utc.with_ymd_and_hms(2030, 5, 1, 0, 10, 0).unwrap(), 20)];

        let (fresh, skipped) = partition_planned(planned, &existing);
        assert_eq!(skipped.len(), 2);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].start_time, Utc.with_ymd_and_hms(2030, 5, 1, 0, 40, 0).unwrap());
    }
}
