//! Salted, adaptive password hashing (Argon2id).

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier as _, Version};

use crate::error::{IdentityError, IdentityResult};

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    /// OWASP baseline for Argon2id.
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl HashCost {
    /// Cheapest parameters argon2 accepts. For tests only.
    pub fn minimal() -> Self {
        Self {
            memory_kib: Params::MIN_M_COST,
            iterations: Params::MIN_T_COST,
            parallelism: Params::MIN_P_COST,
        }
    }
}

/// One-way credential transform with verification.
///
/// Digests are PHC strings with the salt and parameters embedded, so a
/// digest made under an older cost still verifies after the cost changes.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    decoy: String,
}

impl PasswordHasher {
    pub fn new(cost: HashCost) -> IdentityResult<Self> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| IdentityError::Internal(format!("Invalid hash parameters: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut hasher = Self {
            argon2,
            decoy: String::new(),
        };
        hasher.decoy = hasher.hash("decoy-password-for-unknown-users")?;
        Ok(hasher)
    }

    pub fn hash(&self, plaintext: &str) -> IdentityResult<String> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| IdentityError::Internal(format!("Password hashing failed: {}", e)))
    }

    /// Constant-time check of `plaintext` against `digest`.
    ///
    /// A malformed digest means corrupted data, so it is an `Internal`
    /// error rather than a mismatch.
    pub fn verify(&self, plaintext: &str, digest: &str) -> IdentityResult<bool> {
        let parsed = PasswordHash::new(digest)
            .map_err(|e| IdentityError::Internal(format!("Invalid password digest: {}", e)))?;

        match self.argon2.verify_password(plaintext.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(IdentityError::Internal(format!(
                "Password verification failed: {}",
                e
            ))),
        }
    }

    /// Burn the same work as a real verification when there is no user,
    /// so response time does not reveal whether an email is registered.
    pub fn verify_decoy(&self, plaintext: &str) {
        let _ = self.verify(plaintext, &self.decoy);
    }
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher").finish_non_exhaustive()
    }
}
