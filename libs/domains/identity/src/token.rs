//! Bearer session tokens (HS256 JWT).

use argon2::password_hash::rand_core::{OsRng, RngCore};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::{IdentityError, IdentityResult};
use crate::models::{AuthenticatedUser, Role};

/// Random single-use token for verification and reset links (64 hex chars).
pub fn opaque_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    const_hex::encode(bytes)
}

/// Claims carried by every bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: Uuid,
    pub email: String,
    pub roles: BTreeSet<Role>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl From<TokenClaims> for AuthenticatedUser {
    fn from(claims: TokenClaims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            roles: claims.roles,
        }
    }
}

/// Signs and verifies bearer tokens with a process-wide secret.
///
/// Keys are derived once at construction; the secret is not kept.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: u64,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_secs,
        }
    }

    /// Token lifetime in seconds.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn issue(&self, id: Uuid, email: &str, roles: &BTreeSet<Role>) -> IdentityResult<String> {
        self.issue_at(id, email, roles, Utc::now())
    }

    fn issue_at(
        &self,
        id: Uuid,
        email: &str,
        roles: &BTreeSet<Role>,
        issued_at: DateTime<Utc>,
    ) -> IdentityResult<String> {
        let ttl = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);
        let expires_at = issued_at
            .checked_add_signed(Duration::seconds(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let claims = TokenClaims {
            sub: id,
            email: email.to_string(),
            roles: roles.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| IdentityError::Internal(format!("Token signing failed: {}", e)))
    }

    /// Decode and check a token.
    ///
    /// Every failure (bad signature, expired, malformed) is `InvalidToken`.
    pub fn verify(&self, token: &str) -> IdentityResult<TokenClaims> {
        decode::<TokenClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(kind = ?e.kind(), "Bearer token rejected");
                IdentityError::InvalidToken
            })
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-that-is-at-least-32-chars!!";

    fn roles() -> BTreeSet<Role> {
        BTreeSet::from([Role::User, Role::Leader])
    }

    #[test]
    fn test_opaque_tokens() {
        let a = opaque_token();
        let b = opaque_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = TokenIssuer::new(SECRET, 86_400);
        let id = Uuid::new_v4();

        let token = issuer.issue(id, "a@x.com", &roles()).unwrap();
        let claims = issuer.verify(&token).unwrap();

        assert_eq!(claims.sub, id);
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.roles, roles());
        assert_eq!(claims.exp - claims.iat, 86_400);
    }

    #[test]
    fn test_each_token_is_unique() {
        let issuer = TokenIssuer::new(SECRET, 60);
        let id = Uuid::new_v4();
        let a = issuer.issue(id, "a@x.com", &roles()).unwrap();
        let b = issuer.issue(id, "a@x.com", &roles()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_expired_token_is_invalid() {
        let issuer = TokenIssuer::new(SECRET, 60);
        let token = issuer
            .issue_at(
                Uuid::new_v4(),
                "a@x.com",
                &roles(),
                Utc::now() - Duration::seconds(120),
            )
            .unwrap();

        assert!(matches!(issuer.verify(&token), Err(IdentityError::InvalidToken)));
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let issuer = TokenIssuer::new(SECRET, 60);
        let other = TokenIssuer::new("another-secret-that-is-32-chars-long!", 60);
        let token = other.issue(Uuid::new_v4(), "a@x.com", &roles()).unwrap();

        assert!(matches!(issuer.verify(&token), Err(IdentityError::InvalidToken)));
    }

    #[test]
    fn test_garbage_is_invalid() {
        let issuer = TokenIssuer::new(SECRET, 60);
        assert!(matches!(issuer.verify("not.a.jwt"), Err(IdentityError::InvalidToken)));
        assert!(matches!(issuer.verify(""), Err(IdentityError::InvalidToken)));
    }

    #[test]
    fn test_tampered_token_is_invalid() {
        let issuer = TokenIssuer::new(SECRET, 60);
        let token = issuer.issue(Uuid::new_v4(), "a@x.com", &roles()).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged_claims = issuer
            .issue(Uuid::new_v4(), "root@x.com", &BTreeSet::from([Role::Admin]))
            .unwrap();
        let forged_payload = forged_claims.split('.').nth(1).unwrap().to_string();
        parts[1] = &forged_payload;

        assert!(matches!(
            issuer.verify(&parts.join(".")),
            Err(IdentityError::InvalidToken)
        ));
    }
}
