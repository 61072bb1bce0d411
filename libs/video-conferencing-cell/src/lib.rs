//! Video consultations. One room per appointment, backed by a managed
//! realtime SFU: the browser posts its SDP offer, we open a realtime session
//! and hand back the answer. The doctor's first join moves the appointment
//! to `in_progress`.

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use router::video_routes;
pub use services::{RealtimeClient, VideoSessionService};
