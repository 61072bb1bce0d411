// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate};
use std::fmt;

use shared_models::error::AppError;
use shared_utils::timezone::{jst_date_of, ClientTimestamp, ClinicTime, TimeParseError};

// ==============================================================================
// DOCTOR SLOTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Open,
    Booked,
    Blocked,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotStatus::Open => write!(f, "open"),
            SlotStatus::Booked => write!(f, "booked"),
            SlotStatus::Blocked => write!(f, "blocked"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoctorSlot {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SlotStatus,
    pub appointment_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DoctorSlot {
    /// The clinic day the slot belongs to.
    pub fn jst_date(&self) -> NaiveDate {
        jst_date_of(self.start_time)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSlotsRequest {
    pub doctor_id: Uuid,
    /// JST calendar day.
    pub date: NaiveDate,
    /// JST wall-clock `HH:MM`.
    pub start: String,
    pub end: String,
    pub slot_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateSlotsResponse {
    pub created: Vec<DoctorSlot>,
    pub skipped: Vec<PlannedSlot>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlotQuery {
    pub date: Option<NaiveDate>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<SlotStatus>,
}

/// A slot as shown to people: stored UTC instants plus their JST rendering.
#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub start: ClinicTime,
    pub end: ClinicTime,
    pub status: SlotStatus,
    pub appointment_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
}

impl From<&DoctorSlot> for SlotView {
    fn from(slot: &DoctorSlot) -> Self {
        Self {
            id: slot.id,
            doctor_id: slot.doctor_id,
            start: ClinicTime::from(slot.start_time),
            end: ClinicTime::from(slot.end_time),
            status: slot.status,
            appointment_id: slot.appointment_id,
            patient_id: slot.patient_id,
        }
    }
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Statuses that occupy the doctor's and the patient's time.
    pub const ACTIVE: [AppointmentStatus; 3] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
    ];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// PostgREST `in.(...)` list of the active statuses.
    pub fn active_filter() -> String {
        let names: Vec<String> = Self::ACTIVE.iter().map(ToString::to_string).collect();
        format!("in.({})", names.join(","))
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::InProgress => write!(f, "in_progress"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    #[serde(alias = "consultation", alias = "general")]
    GeneralConsultation,
    #[serde(alias = "followup")]
    FollowUp,
    #[serde(alias = "prescription")]
    PrescriptionRenewal,
    Urgent,
    #[serde(alias = "mental_health_consultation")]
    MentalHealth,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::GeneralConsultation => write!(f, "general_consultation"),
            AppointmentType::FollowUp => write!(f, "follow_up"),
            AppointmentType::PrescriptionRenewal => write!(f, "prescription_renewal"),
            AppointmentType::Urgent => write!(f, "urgent"),
            AppointmentType::MentalHealth => write!(f, "mental_health"),
        }
    }
}

/// Where a booking came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingSource {
    PatientPortal,
    /// Clinical staff booking outside the assignment board.
    StaffPortal,
    OperatorBoard,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub slot_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub appointment_type: AppointmentType,
    pub reason: Option<String>,
    pub doctor_notes: Option<String>,
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub prescription_issued: bool,
    pub booked_by: Uuid,
    pub source: BookingSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn jst_date(&self) -> NaiveDate {
        jst_date_of(self.start_time)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.patient_id.to_string() == user_id || self.doctor_id.to_string() == user_id
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub slot_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_type: AppointmentType,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
    pub doctor_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_slot_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConflictCheckQuery {
    pub doctor_id: Uuid,
    pub start: ClientTimestamp,
    pub end: ClientTimestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflicting_appointments: Vec<Appointment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DoctorDayQuery {
    pub date: Option<NaiveDate>,
}

/// Everything the slot claim needs to book one patient into one slot.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub slot_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_type: AppointmentType,
    pub reason: Option<String>,
    pub booked_by: Uuid,
    pub source: BookingSource,
    /// Appointment being replaced by this claim, ignored in conflict checks.
    pub replaces: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimOutcome {
    pub appointment: Appointment,
    pub slot: DoctorSlot,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseOutcome {
    pub appointment: Appointment,
    /// `None` when the slot was no longer linked to the appointment.
    pub slot: Option<DoctorSlot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveOutcome {
    pub appointment: Appointment,
    pub previous_appointment: Appointment,
    pub from_slot: Option<DoctorSlot>,
    pub to_slot: DoctorSlot,
    /// Waiting-list entry re-pointed at the new appointment, if the booking
    /// came from the queue.
    pub waiting_entry: Option<FollowedWaitingEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FollowedWaitingEntry {
    pub id: Uuid,
    pub preferred_date: Option<NaiveDate>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Slot not found")]
    SlotNotFound,

    #[error("Slot is {0}")]
    SlotUnavailable(SlotStatus),

    #[error("Slot has already started")]
    SlotInPast,

    #[error("Slot is being changed by another operator, retry shortly")]
    SlotBusy,

    #[error("Slot was taken by another booking")]
    SlotTaken,

    #[error("Doctor already has an appointment at this time")]
    DoctorConflict,

    #[error("Patient already has an appointment at this time")]
    PatientConflict,

    #[error("Cannot change appointment from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment was changed concurrently, reload and retry")]
    ConcurrentUpdate,

    #[error("Unauthorized access to appointment")]
    Unauthorized,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Lock backend error: {0}")]
    LockBackend(String),
}

impl From<TimeParseError> for AppointmentError {
    fn from(err: TimeParseError) -> Self {
        AppointmentError::ValidationError(err.to_string())
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound | AppointmentError::SlotNotFound => {
                AppError::NotFound(err.to_string())
            }
            AppointmentError::SlotUnavailable(_)
            | AppointmentError::SlotBusy
            | AppointmentError::SlotTaken
            | AppointmentError::DoctorConflict
            | AppointmentError::PatientConflict
            | AppointmentError::InvalidStatusTransition { .. }
            | AppointmentError::ConcurrentUpdate => AppError::Conflict(err.to_string()),
            AppointmentError::SlotInPast => AppError::BadRequest(err.to_string()),
            AppointmentError::Unauthorized => AppError::Forbidden(err.to_string()),
            AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
            AppointmentError::DatabaseError(msg) => AppError::Database(msg),
            AppointmentError::LockBackend(msg) => AppError::Internal(msg),
        }
    }
}
