use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("User with email '{0}' already exists")]
    Conflict(String),

    #[error("User not found: {0}")]
    NotFound(Uuid),

    /// Covers both an unknown email and a wrong password.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email address has not been verified")]
    EmailNotVerified,

    /// Covers unknown, malformed, tampered and expired bearer tokens, and
    /// unknown or already-consumed verification and reset tokens.
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid input: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Forbidden")]
    Forbidden,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

impl IdentityError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::Conflict(_) => "conflict",
            IdentityError::NotFound(_) => "not_found",
            IdentityError::InvalidCredentials => "invalid_credentials",
            IdentityError::EmailNotVerified => "email_not_verified",
            IdentityError::InvalidToken => "invalid_token",
            IdentityError::ExpiredToken => "expired_token",
            IdentityError::BadRequest(_) | IdentityError::Validation(_) => "bad_request",
            IdentityError::Forbidden => "forbidden",
            IdentityError::Unavailable(_) => "unavailable",
            IdentityError::Internal(_) => "internal",
        }
    }

    /// Map a sea-orm error, treating connection loss as `Unavailable`.
    pub(crate) fn from_db(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::Conn(e) => IdentityError::Unavailable(e.to_string()),
            sea_orm::DbErr::ConnectionAcquire(e) => IdentityError::Unavailable(e.to_string()),
            other => IdentityError::Internal(format!("Database error: {}", other)),
        }
    }
}
