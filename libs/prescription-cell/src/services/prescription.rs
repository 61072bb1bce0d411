use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use appointment_cell::services::AppointmentRepository;
use appointment_cell::AppointmentStatus;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::{Role, User};

use crate::models::{valid_until, IssuePrescriptionRequest, Prescription, PrescriptionError, PrescriptionStatus};

const PRESCRIPTIONS: &str = "/rest/v1/prescriptions";

pub struct PrescriptionService {
    supabase: SupabaseClient,
    appointments: AppointmentRepository,
}

impl PrescriptionService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            appointments: AppointmentRepository::new(config),
        }
    }

    /// Issues a prescription for a consultation that has started, then flags
    /// the appointment.
    #[instrument(skip(self, request, auth_token), fields(appointment_id = %request.appointment_id))]
    pub async fn issue(
        &self,
        request: IssuePrescriptionRequest,
        doctor: &User,
        auth_token: &str,
    ) -> Result<Prescription, PrescriptionError> {
        request.validate()?;

        let appointment = self.appointments.get_appointment(request.appointment_id, auth_token).await?;
        if !doctor.has_role(Role::Doctor) || !doctor.is_self(appointment.doctor_id) {
            return Err(PrescriptionError::NotPrescriber);
        }
        if !matches!(appointment.status, AppointmentStatus::InProgress | AppointmentStatus::Completed) {
            return Err(PrescriptionError::AppointmentNotEligible(appointment.status));
        }

        let issued_at = Utc::now();
        let expires_at = valid_until(issued_at)
            .map_err(|e| PrescriptionError::ValidationError(e.to_string()))?;
        let notes = request.notes.as_deref().map(str::trim).filter(|n| !n.is_empty());
        let row = json!({
            "id": Uuid::new_v4(),
            "appointment_id": appointment.id,
            "patient_id": appointment.patient_id,
            "doctor_id": appointment.doctor_id,
            "items": request.items,
            "notes": notes,
            "status": PrescriptionStatus::Active,
            "issued_at": issued_at.to_rfc3339(),
            "valid_until": expires_at.to_rfc3339(),
            "revoked_reason": null
        });

        let rows = self.supabase.write_returning(Method::POST, PRESCRIPTIONS, auth_token, row).await
            .map_err(|e| PrescriptionError::DatabaseError(e.to_string()))?;
        let prescription: Prescription = rows.into_iter().next()
            .map(parse)
            .transpose()?
            .ok_or_else(|| PrescriptionError::DatabaseError("Insert returned no row".to_string()))?;

        self.appointments.mark_prescription_issued(appointment.id, auth_token).await?;

        info!("Prescription {} issued with {} items", prescription.id, prescription.items.len());
        Ok(prescription)
    }

    pub async fn get(&self, prescription_id: Uuid, auth_token: &str) -> Result<Prescription, PrescriptionError> {
        let path = format!("{}?id=eq.{}", PRESCRIPTIONS, prescription_id);
        let row = self.supabase.select_one(&path, auth_token).await
            .map_err(|e| PrescriptionError::DatabaseError(e.to_string()))?
            .ok_or(PrescriptionError::NotFound)?;
        parse(row)
    }

    /// Newest first.
    pub async fn list_for_patient(&self, patient_id: Uuid, auth_token: &str) -> Result<Vec<Prescription>, PrescriptionError> {
        let path = format!("{}?patient_id=eq.{}&order=issued_at.desc", PRESCRIPTIONS, patient_id);
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, Some(auth_token), None).await
            .map_err(|e| PrescriptionError::DatabaseError(e.to_string()))?;
        rows.into_iter().map(parse).collect()
    }

    #[instrument(skip(self, reason, user, auth_token))]
    pub async fn revoke(
        &self,
        prescription_id: Uuid,
        reason: &str,
        user: &User,
        auth_token: &str,
    ) -> Result<Prescription, PrescriptionError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(PrescriptionError::ValidationError("A revocation reason is required".to_string()));
        }

        let current = self.get(prescription_id, auth_token).await?;
        if !user.is_self(current.doctor_id) && !user.has_role(Role::Admin) {
            return Err(PrescriptionError::NotPrescriber);
        }
        if current.status == PrescriptionStatus::Revoked {
            return Err(PrescriptionError::AlreadyRevoked);
        }

        let path = format!("{}?id=eq.{}&status=eq.active", PRESCRIPTIONS, prescription_id);
        let rows = self.supabase.write_returning(
            Method::PATCH,
            &path,
            auth_token,
            json!({ "status": PrescriptionStatus::Revoked, "revoked_reason": reason }),
        ).await
        .map_err(|e| PrescriptionError::DatabaseError(e.to_string()))?;

        match rows.into_iter().next() {
            Some(row) => {
                info!("Prescription {} revoked", prescription_id);
                parse(row)
            }
            None => {
                warn!("Prescription {} was revoked concurrently", prescription_id);
                Err(PrescriptionError::AlreadyRevoked)
            }
        }
    }
}

fn parse(row: Value) -> Result<Prescription, PrescriptionError> {
    serde_json::from_value(row).map_err(|e| PrescriptionError::DatabaseError(e.to_string()))
}
