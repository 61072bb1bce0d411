// libs/appointment-cell/src/router.rs
use axum::{
    Router,
    routing::{get, post, patch},
    middleware,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::state::SchedulingState;

pub fn appointment_routes(state: SchedulingState) -> Router {
    let protected_routes = Router::new()
        // Slots
        .route("/slots", get(handlers::list_slots))
        .route("/slots/generate", post(handlers::generate_slots))
        .route("/slots/{slot_id}/block", post(handlers::block_slot))
        .route("/slots/{slot_id}/unblock", post(handlers::unblock_slot))

        // Appointments
        .route("/", post(handlers::book_appointment))
        .route("/conflicts", get(handlers::check_conflicts))
        .route("/patients/{patient_id}", get(handlers::get_patient_appointments))
        .route("/doctors/{doctor_id}", get(handlers::get_doctor_appointments))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/status", patch(handlers::update_appointment_status))
        .route("/{appointment_id}/transitions", get(handlers::get_allowed_transitions))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/reschedule", post(handlers::reschedule_appointment))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
