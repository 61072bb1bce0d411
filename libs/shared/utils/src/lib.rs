pub mod extractor;
pub mod jwt;
pub mod test_utils;
pub mod timezone;
pub mod validation;

pub use extractor::{auth_middleware, require_dispatcher, require_role, require_self_or_worker, require_worker};
pub use timezone::{ClientTimestamp, ClinicTime};
