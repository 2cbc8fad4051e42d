//! Identity service configuration.

use core_config::{ConfigError, FromEnv, env_parse, env_required};

use crate::password::HashCost;

pub const MIN_SECRET_LENGTH: usize = 32;
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_RESET_TOKEN_TTL_SECS: u64 = 60 * 60;

/// Loaded from environment variables:
/// - `JWT_SECRET` (required, at least 32 characters)
/// - `JWT_EXPIRES_IN_SECS` (default 1 day)
/// - `PASSWORD_RESET_EXPIRES_IN_SECS` (default 1 hour)
/// - `PASSWORD_HASH_MEMORY_KIB`, `PASSWORD_HASH_ITERATIONS`,
///   `PASSWORD_HASH_PARALLELISM` (Argon2id cost)
///
/// # Example
///
/// ```ignore
/// use core_config::FromEnv;
/// use domain_identity::IdentityConfig;
///
/// let config = IdentityConfig::from_env()?;
///
/// // Manual construction (for testing)
/// let config = IdentityConfig::new("my-super-secret-key-that-is-at-least-32-chars")?;
/// ```
#[derive(Clone)]
pub struct IdentityConfig {
    pub jwt_secret: String,
    pub access_token_ttl_secs: u64,
    pub reset_token_ttl_secs: u64,
    pub hash_cost: HashCost,
}

impl IdentityConfig {
    /// Defaults for everything but the secret.
    pub fn new(jwt_secret: impl Into<String>) -> Result<Self, ConfigError> {
        let jwt_secret = jwt_secret.into();
        check_secret(&jwt_secret)?;

        Ok(Self {
            jwt_secret,
            access_token_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            reset_token_ttl_secs: DEFAULT_RESET_TOKEN_TTL_SECS,
            hash_cost: HashCost::default(),
        })
    }

    pub fn with_hash_cost(mut self, hash_cost: HashCost) -> Self {
        self.hash_cost = hash_cost;
        self
    }
}

fn check_secret(secret: &str) -> Result<(), ConfigError> {
    if secret.len() < MIN_SECRET_LENGTH {
        return Err(ConfigError::ParseError {
            key: "JWT_SECRET".to_string(),
            details: format!(
                "must be at least {} characters (got {}). Generate one with: openssl rand -base64 32",
                MIN_SECRET_LENGTH,
                secret.len()
            ),
        });
    }
    Ok(())
}

impl FromEnv for IdentityConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = env_required("JWT_SECRET")?;
        check_secret(&jwt_secret)?;

        let defaults = HashCost::default();

        Ok(Self {
            jwt_secret,
            access_token_ttl_secs: env_parse("JWT_EXPIRES_IN_SECS", DEFAULT_ACCESS_TOKEN_TTL_SECS)?,
            reset_token_ttl_secs: env_parse(
                "PASSWORD_RESET_EXPIRES_IN_SECS",
                DEFAULT_RESET_TOKEN_TTL_SECS,
            )?,
            hash_cost: HashCost {
                memory_kib: env_parse("PASSWORD_HASH_MEMORY_KIB", defaults.memory_kib)?,
                iterations: env_parse("PASSWORD_HASH_ITERATIONS", defaults.iterations)?,
                parallelism: env_parse("PASSWORD_HASH_PARALLELISM", defaults.parallelism)?,
            },
        })
    }
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("jwt_secret", &"<redacted>")
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("reset_token_ttl_secs", &self.reset_token_ttl_secs)
            .field("hash_cost", &self.hash_cost)
            .finish()
    }
}
