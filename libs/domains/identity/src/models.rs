use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::Validate;

/// Access roles. A user holds a set of them; checks test membership.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Role {
    #[default]
    User,
    Admin,
    Member,
    Leader,
    OrgAdmin,
    TeamLeader,
    Volunteer,
}

/// Build a role set, falling back to the base role when empty.
pub fn role_set(roles: impl IntoIterator<Item = Role>) -> BTreeSet<Role> {
    let mut set: BTreeSet<Role> = roles.into_iter().collect();
    if set.is_empty() {
        set.insert(Role::User);
    }
    set
}

/// A pending password reset. Token and expiry only ever exist together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordReset {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl PasswordReset {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// User record as persisted.
///
/// Deliberately not `Serialize`: outbound shapes go through
/// [`UserResponse`], which has no credential fields.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    /// Normalized (trimmed, lowercase)
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub profile_picture: Option<String>,
    pub roles: BTreeSet<Role>,
    pub is_verified: bool,
    /// Present while unverified, cleared by a successful verification
    pub verification_token: Option<String>,
    pub password_reset: Option<PasswordReset>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create an unverified user (password must already be hashed).
    pub fn new(
        email: String,
        password_hash: String,
        first_name: String,
        last_name: String,
        roles: BTreeSet<Role>,
        verification_token: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            email,
            password_hash,
            first_name,
            last_name,
            phone_number: None,
            profile_picture: None,
            roles: role_set(roles),
            is_verified: false,
            verification_token: Some(verification_token),
            password_reset: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Merge the supplied fields; omitted fields keep their values.
    pub fn apply(&mut self, changes: UserChanges) {
        if let Some(email) = changes.email {
            self.email = email;
        }
        if let Some(hash) = changes.password_hash {
            self.password_hash = hash;
        }
        if let Some(first_name) = changes.first_name {
            self.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            self.last_name = last_name;
        }
        if let Some(phone_number) = changes.phone_number {
            self.phone_number = phone_number;
        }
        if let Some(profile_picture) = changes.profile_picture {
            self.profile_picture = profile_picture;
        }
        if let Some(roles) = changes.roles {
            self.roles = role_set(roles);
        }
        if let Some(is_verified) = changes.is_verified {
            self.is_verified = is_verified;
        }
        if let Some(token) = changes.verification_token {
            self.verification_token = token;
        }
        if let Some(reset) = changes.password_reset {
            self.password_reset = reset;
        }
        if let Some(is_active) = changes.is_active {
            self.is_active = is_active;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update for [`CredentialStore::update`](crate::CredentialStore::update).
///
/// `None` leaves a field untouched. For nullable fields the inner option
/// sets or clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserChanges {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<Option<String>>,
    pub profile_picture: Option<Option<String>>,
    pub roles: Option<BTreeSet<Role>>,
    pub is_verified: Option<bool>,
    pub verification_token: Option<Option<String>>,
    pub password_reset: Option<Option<PasswordReset>>,
    pub is_active: Option<bool>,
}

/// Sanitized user shape for responses and event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub profile_picture: Option<String>,
    pub roles: Vec<Role>,
    pub is_verified: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            full_name: user.full_name(),
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            phone_number: user.phone_number,
            profile_picture: user.profile_picture,
            roles: user.roles.into_iter().collect(),
            is_verified: user.is_verified,
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Self-service registration input.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUser {
    #[validate(email, length(max = 255))]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 2, max = 100))]
    pub first_name: String,
    #[validate(length(min = 2, max = 100))]
    pub last_name: String,
    #[validate(length(max = 32))]
    pub phone_number: Option<String>,
}

/// Admin-side creation input; may carry an explicit role set.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    #[validate(email, length(max = 255))]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 2, max = 100))]
    pub first_name: String,
    #[validate(length(min = 2, max = 100))]
    pub last_name: String,
    #[validate(length(max = 32))]
    pub phone_number: Option<String>,
    #[validate(url)]
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub roles: Option<Vec<Role>>,
}

impl From<RegisterUser> for CreateUser {
    fn from(input: RegisterUser) -> Self {
        Self {
            email: input.email,
            password: input.password,
            first_name: input.first_name,
            last_name: input.last_name,
            phone_number: input.phone_number,
            profile_picture: None,
            roles: None,
        }
    }
}

/// Partial update input. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    #[validate(email, length(max = 255))]
    pub email: Option<String>,
    #[validate(length(min = 8, max = 128))]
    pub password: Option<String>,
    #[validate(length(min = 2, max = 100))]
    pub first_name: Option<String>,
    #[validate(length(min = 2, max = 100))]
    pub last_name: Option<String>,
    /// `null` clears the stored value.
    #[validate(length(max = 32))]
    #[serde(default, deserialize_with = "nullable")]
    pub phone_number: Option<Option<String>>,
    /// `null` clears the stored value.
    #[validate(url)]
    #[serde(default, deserialize_with = "nullable")]
    pub profile_picture: Option<Option<String>>,
    pub roles: Option<Vec<Role>>,
    pub is_active: Option<bool>,
}

// Absent stays `None`; an explicit `null` becomes `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl UpdateUser {
    /// Whether the update touches fields only an admin may change.
    pub fn touches_privileged_fields(&self) -> bool {
        self.roles.is_some() || self.is_active.is_some()
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email, length(max = 255))]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Successful login: sanitized user plus bearer token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: UserResponse,
    pub access_token: String,
    /// Seconds until the token expires
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Subject proven by a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: String,
    pub roles: BTreeSet<Role>,
}

impl AuthenticatedUser {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }
}
