pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::BoardError;
pub use models::*;
pub use router::board_routes;
