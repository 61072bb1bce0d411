use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use appointment_cell::SchedulingState;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn video_routes(state: SchedulingState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::video_health));

    let protected_routes = Router::new()
        .route("/appointments/{appointment_id}", get(handlers::get_video_status))
        .route("/appointments/{appointment_id}/join", post(handlers::join_video))
        .route("/appointments/{appointment_id}/end", post(handlers::end_video))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
