pub mod auth;
pub mod error;

pub use auth::{Role, User};
pub use error::AppError;
