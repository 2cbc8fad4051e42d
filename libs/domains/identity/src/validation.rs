//! Input checks run at the top of each service operation.

use crate::error::{IdentityError, IdentityResult};
use validator::Validate;

/// Run the `validator` rules declared on a request type.
pub fn validate<T: Validate>(input: &T) -> IdentityResult<()> {
    input.validate().map_err(IdentityError::from)
}

/// Canonical form used for storage and lookup: trimmed, lowercase.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Reject a missing or blank argument with `BadRequest`.
pub fn require_non_empty(field: &str, value: &str) -> IdentityResult<()> {
    if value.trim().is_empty() {
        return Err(IdentityError::BadRequest(format!("{} is required", field)));
    }
    Ok(())
}

pub const MIN_PASSWORD_LENGTH: usize = 8;

pub fn validate_password(password: &str) -> IdentityResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(IdentityError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}
