use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use appointment_cell::SchedulingState;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn board_routes(state: SchedulingState) -> Router {
    let protected_routes = Router::new()
        .route("/", get(handlers::get_board))
        .route("/live", get(handlers::live_board))
        .route("/waiting", get(handlers::list_waiting_entries).post(handlers::add_waiting_entry))
        .route("/waiting/{entry_id}/cancel", post(handlers::cancel_waiting_entry))
        .route("/assign", post(handlers::assign_patient))
        .route("/unassign", post(handlers::unassign_patient))
        .route("/move", post(handlers::move_patient))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
