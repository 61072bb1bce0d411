use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::Role;

use crate::models::{CreateWorkerRequest, UpdateWorkerRequest, Worker, WorkerError, WorkerSearchQuery};

pub struct WorkerService {
    supabase: SupabaseClient,
}

impl WorkerService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn create_worker(
        &self,
        request: CreateWorkerRequest,
        auth_token: &str,
    ) -> Result<Worker, WorkerError> {
        request.validate()?;
        debug!("Creating {} worker record for {}", request.role, request.email);

        let existing_path = format!(
            "/rest/v1/workers?email=eq.{}",
            urlencoding::encode(&request.email)
        );
        let existing = self.supabase.select_one(&existing_path, auth_token).await
            .map_err(|e| WorkerError::DatabaseError(e.to_string()))?;
        if existing.is_some() {
            return Err(WorkerError::DuplicateEmail(request.email));
        }

        let now = Utc::now().to_rfc3339();
        let body = json!({
            "id": request.id,
            "email": request.email,
            "first_name": request.first_name.trim(),
            "last_name": request.last_name.trim(),
            "role": request.role,
            "specialty": request.specialty,
            "license_number": request.license_number,
            "is_active": true,
            "created_at": now,
            "updated_at": now
        });

        let rows = self.supabase.write_returning(Method::POST, "/rest/v1/workers", auth_token, body).await
            .map_err(|e| WorkerError::DatabaseError(e.to_string()))?;

        let worker = first_worker(rows)?;
        info!("Worker {} created with role {}", worker.id, worker.role);
        Ok(worker)
    }

    pub async fn get_worker(&self, worker_id: Uuid, auth_token: &str) -> Result<Worker, WorkerError> {
        let path = format!("/rest/v1/workers?id=eq.{}", worker_id);
        let row = self.supabase.select_one(&path, auth_token).await
            .map_err(|e| WorkerError::DatabaseError(e.to_string()))?
            .ok_or(WorkerError::NotFound)?;

        serde_json::from_value(row).map_err(|e| WorkerError::DatabaseError(e.to_string()))
    }

    pub async fn list_workers(
        &self,
        query: &WorkerSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Worker>, WorkerError> {
        let mut filters = Vec::new();
        if let Some(role) = query.role {
            filters.push(format!("role=eq.{}", role));
        }
        if let Some(specialty) = &query.specialty {
            filters.push(format!("specialty=eq.{}", urlencoding::encode(specialty)));
        }
        if let Some(active) = query.active {
            filters.push(format!("is_active=eq.{}", active));
        }
        filters.push("order=last_name.asc,first_name.asc".to_string());

        let path = format!("/rest/v1/workers?{}", filters.join("&"));
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, Some(auth_token), None).await
            .map_err(|e| WorkerError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Worker>, _>>()
            .map_err(|e| WorkerError::DatabaseError(format!("Failed to parse workers: {}", e)))
    }

    /// Active doctors, the columns of the assignment board.
    pub async fn list_active_doctors(&self, auth_token: &str) -> Result<Vec<Worker>, WorkerError> {
        self.list_workers(
            &WorkerSearchQuery {
                role: Some(Role::Doctor),
                specialty: None,
                active: Some(true),
            },
            auth_token,
        ).await
    }

    pub async fn update_worker(
        &self,
        worker_id: Uuid,
        request: UpdateWorkerRequest,
        auth_token: &str,
    ) -> Result<Worker, WorkerError> {
        let mut update = Map::new();
        if let Some(first_name) = request.first_name {
            update.insert("first_name".to_string(), json!(first_name.trim()));
        }
        if let Some(last_name) = request.last_name {
            update.insert("last_name".to_string(), json!(last_name.trim()));
        }
        if let Some(specialty) = request.specialty {
            update.insert("specialty".to_string(), json!(specialty));
        }
        if let Some(license_number) = request.license_number {
            update.insert("license_number".to_string(), json!(license_number));
        }
        if update.is_empty() {
            return Err(WorkerError::ValidationError("No fields to update".to_string()));
        }
        update.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        self.patch_worker(worker_id, Value::Object(update), auth_token).await
    }

    pub async fn deactivate_worker(&self, worker_id: Uuid, auth_token: &str) -> Result<Worker, WorkerError> {
        info!("Deactivating worker {}", worker_id);
        self.patch_worker(
            worker_id,
            json!({ "is_active": false, "updated_at": Utc::now().to_rfc3339() }),
            auth_token,
        ).await
    }

    async fn patch_worker(&self, worker_id: Uuid, body: Value, auth_token: &str) -> Result<Worker, WorkerError> {
        let path = format!("/rest/v1/workers?id=eq.{}", worker_id);
        let rows = self.supabase.write_returning(Method::PATCH, &path, auth_token, body).await
            .map_err(|e| WorkerError::DatabaseError(e.to_string()))?;
        first_worker(rows)
    }
}

fn first_worker(rows: Vec<Value>) -> Result<Worker, WorkerError> {
    let row = rows.into_iter().next().ok_or(WorkerError::NotFound)?;
    serde_json::from_value(row).map_err(|e| WorkerError::DatabaseError(e.to_string()))
}
