use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;
use chrono::Utc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Patient, CreatePatientRequest, UpdatePatientRequest, PatientSearchQuery, PatientError};

pub struct PatientService {
    supabase: SupabaseClient,
}

impl PatientService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn create_patient(
        &self,
        patient_id: Uuid,
        request: CreatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Creating new patient record for: {}", request.email);

        if request.first_name.trim().is_empty() || request.last_name.trim().is_empty() {
            return Err(PatientError::ValidationError("Name must not be empty".to_string()));
        }
        if request.date_of_birth > Utc::now().date_naive() {
            return Err(PatientError::ValidationError("Date of birth is in the future".to_string()));
        }

        let existing_check_path = format!(
            "/rest/v1/patients?email=eq.{}",
            urlencoding::encode(&request.email)
        );
        let existing = self.supabase.select_one(&existing_check_path, auth_token).await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        if existing.is_some() {
            return Err(PatientError::DuplicateEmail(request.email));
        }

        let now = Utc::now().to_rfc3339();
        let patient_data = json!({
            "id": patient_id,
            "email": request.email,
            "first_name": request.first_name.trim(),
            "last_name": request.last_name.trim(),
            "first_name_kana": request.first_name_kana,
            "last_name_kana": request.last_name_kana,
            "date_of_birth": request.date_of_birth.format("%Y-%m-%d").to_string(),
            "gender": request.gender,
            "phone": request.phone,
            "address": request.address,
            "allergies": request.allergies,
            "current_medications": request.current_medications,
            "created_at": now,
            "updated_at": now
        });

        let result = self.supabase.write_returning(
            Method::POST,
            "/rest/v1/patients",
            auth_token,
            patient_data,
        ).await.map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        let patient = first_patient(result)?;
        info!("Patient record created with ID: {}", patient.id);

        Ok(patient)
    }

    pub async fn get_patient(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Fetching patient record: {}", patient_id);

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let row = self.supabase.select_one(&path, auth_token).await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?
            .ok_or(PatientError::NotFound)?;

        serde_json::from_value(row).map_err(|e| PatientError::DatabaseError(e.to_string()))
    }

    /// Batch lookup used by the board to label booked slots.
    pub async fn get_patients(
        &self,
        patient_ids: &[Uuid],
        auth_token: &str,
    ) -> Result<Vec<Patient>, PatientError> {
        if patient_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = patient_ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
        let path = format!("/rest/v1/patients?id=in.({})", ids);
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, Some(auth_token), None).await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        parse_patients(rows)
    }

    pub async fn update_patient(
        &self,
        patient_id: Uuid,
        request: UpdatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Updating patient record: {}", patient_id);

        let mut update_data = Map::new();

        if let Some(first_name) = request.first_name {
            update_data.insert("first_name".to_string(), json!(first_name.trim()));
        }
        if let Some(last_name) = request.last_name {
            update_data.insert("last_name".to_string(), json!(last_name.trim()));
        }
        if let Some(first_name_kana) = request.first_name_kana {
            update_data.insert("first_name_kana".to_string(), json!(first_name_kana));
        }
        if let Some(last_name_kana) = request.last_name_kana {
            update_data.insert("last_name_kana".to_string(), json!(last_name_kana));
        }
        if let Some(gender) = request.gender {
            update_data.insert("gender".to_string(), json!(gender));
        }
        if let Some(phone) = request.phone {
            update_data.insert("phone".to_string(), json!(phone));
        }
        if let Some(address) = request.address {
            update_data.insert("address".to_string(), json!(address));
        }
        if let Some(allergies) = request.allergies {
            update_data.insert("allergies".to_string(), json!(allergies));
        }
        if let Some(current_medications) = request.current_medications {
            update_data.insert("current_medications".to_string(), json!(current_medications));
        }

        if update_data.is_empty() {
            return Err(PatientError::ValidationError("No fields to update".to_string()));
        }

        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result = self.supabase.write_returning(
            Method::PATCH,
            &path,
            auth_token,
            Value::Object(update_data),
        ).await.map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        first_patient(result)
    }

    pub async fn search_patients(
        &self,
        query: PatientSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Patient>, PatientError> {
        debug!("Searching patients with query: {:?}", query);

        let mut query_parts = vec![];

        if let Some(name) = query.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            let pattern = urlencoding::encode(&format!("*{}*", name)).into_owned();
            query_parts.push(format!(
                "or=(first_name.ilike.{p},last_name.ilike.{p},first_name_kana.ilike.{p},last_name_kana.ilike.{p})",
                p = pattern
            ));
        }
        if let Some(email) = query.email {
            query_parts.push(format!("email=ilike.{}", urlencoding::encode(&format!("*{}*", email))));
        }
        if let Some(phone) = query.phone {
            query_parts.push(format!("phone=ilike.{}", urlencoding::encode(&format!("*{}*", phone))));
        }

        query_parts.push(format!("limit={}", query.limit.unwrap_or(50).clamp(1, 200)));
        query_parts.push(format!("offset={}", query.offset.unwrap_or(0).max(0)));
        query_parts.push("order=last_name_kana.asc".to_string());

        let path = format!("/rest/v1/patients?{}", query_parts.join("&"));
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        parse_patients(result)
    }
}

fn first_patient(rows: Vec<Value>) -> Result<Patient, PatientError> {
    let row = rows.into_iter().next().ok_or(PatientError::NotFound)?;
    serde_json::from_value(row).map_err(|e| PatientError::DatabaseError(e.to_string()))
}

fn parse_patients(rows: Vec<Value>) -> Result<Vec<Patient>, PatientError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<Patient>, _>>()
        .map_err(|e| PatientError::DatabaseError(format!("Failed to parse patients: {}", e)))
}
