use std::sync::OnceLock;

use regex::Regex;

use shared_models::error::AppError;

fn email_regex() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").ok())
        .as_ref()
}

// Japanese numbers: +81 or a leading 0, then up to three digit groups.
fn phone_regex() -> Option<&'static Regex> {
    static PHONE: OnceLock<Option<Regex>> = OnceLock::new();
    PHONE
        .get_or_init(|| Regex::new(r"^(\+81[- ]?|0)\d{1,4}[- ]?\d{1,4}[- ]?\d{3,4}$").ok())
        .as_ref()
}

pub fn validate_email(email: &str) -> Result<(), AppError> {
    if email_regex().is_some_and(|re| re.is_match(email.trim())) {
        Ok(())
    } else {
        Err(AppError::ValidationError(format!("Invalid email address: {}", email)))
    }
}

pub fn validate_phone(phone: &str) -> Result<(), AppError> {
    if phone_regex().is_some_and(|re| re.is_match(phone.trim())) {
        Ok(())
    } else {
        Err(AppError::ValidationError(format!("Invalid phone number: {}", phone)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails() {
        assert!(validate_email("hanako.yamada@clinic.co.jp").is_ok());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("a@b").is_err());
    }

    #[test]
    fn japanese_phone_numbers() {
        assert!(validate_phone("090-1234-5678").is_ok());
        assert!(validate_phone("03-1234-5678").is_ok());
        assert!(validate_phone("+81 90-1234-5678").is_ok());
        assert!(validate_phone("12345").is_err());
    }
}
