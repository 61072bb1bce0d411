use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::{Appointment, AppointmentType, DoctorSlot, SlotStatus, SlotView};
use patient_cell::PatientSummary;
use shared_utils::timezone::ClinicTime;

// ==============================================================================
// WAITING LIST
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Routine,
    Soon,
    Urgent,
}

impl Priority {
    /// Urgent requests are booked as urgent consultations.
    pub fn appointment_type(self) -> AppointmentType {
        match self {
            Priority::Urgent => AppointmentType::Urgent,
            Priority::Routine | Priority::Soon => AppointmentType::GeneralConsultation,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitingStatus {
    Waiting,
    Assigned,
    Cancelled,
}

impl fmt::Display for WaitingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitingStatus::Waiting => write!(f, "waiting"),
            WaitingStatus::Assigned => write!(f, "assigned"),
            WaitingStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A patient waiting for an operator to place them in a slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingEntry {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub chief_complaint: String,
    pub preferred_date: Option<NaiveDate>,
    pub priority: Priority,
    pub status: WaitingStatus,
    pub appointment_id: Option<Uuid>,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WaitingEntry {
    /// Board order: most urgent first, then first come first served.
    pub fn board_order(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.requested_at.cmp(&other.requested_at))
    }
}

pub fn sort_for_board(entries: &mut [WaitingEntry]) {
    entries.sort_by(WaitingEntry::board_order);
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWaitingEntryRequest {
    pub patient_id: Uuid,
    pub chief_complaint: String,
    pub preferred_date: Option<NaiveDate>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoardDateQuery {
    pub date: Option<NaiveDate>,
}

// ==============================================================================
// BOARD OPERATIONS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AssignRequest {
    pub waiting_id: Uuid,
    pub slot_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnassignRequest {
    pub slot_id: Uuid,
    #[serde(default)]
    pub return_to_waiting: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveRequest {
    pub from_slot_id: Uuid,
    pub to_slot_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignOutcome {
    pub appointment: Appointment,
    pub slot: DoctorSlot,
    pub entry: WaitingEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnassignOutcome {
    pub appointment: Appointment,
    pub slot: Option<DoctorSlot>,
    pub entry: Option<WaitingEntry>,
}

// ==============================================================================
// BOARD VIEW
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct BoardSlot {
    #[serde(flatten)]
    pub slot: SlotView,
    pub patient: Option<PatientSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorColumn {
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub specialty: Option<String>,
    pub slots: Vec<BoardSlot>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BoardCounters {
    pub open: usize,
    pub booked: usize,
    pub blocked: usize,
    pub waiting: usize,
}

impl BoardCounters {
    pub fn count_slot(&mut self, status: SlotStatus) {
        match status {
            SlotStatus::Open => self.open += 1,
            SlotStatus::Booked => self.booked += 1,
            SlotStatus::Blocked => self.blocked += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardView {
    pub date: NaiveDate,
    pub generated_at: ClinicTime,
    pub columns: Vec<DoctorColumn>,
    pub waiting: Vec<WaitingEntry>,
    pub counters: BoardCounters,
}
