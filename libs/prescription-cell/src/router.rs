use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn prescription_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/", post(handlers::issue_prescription))
        .route("/{prescription_id}", get(handlers::get_prescription))
        .route("/{prescription_id}/revoke", post(handlers::revoke_prescription))
        .route("/patients/{patient_id}", get(handlers::list_patient_prescriptions))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
