use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::IdentityConfig;
use crate::error::{IdentityError, IdentityResult};
use crate::events::IdentityEvents;
use crate::models::{
    AuthenticatedUser, CreateUser, LoginRequest, LoginResponse, MessageResponse, PasswordReset,
    RegisterUser, Role, TokenResponse, UpdateUser, User, UserChanges, UserResponse, role_set,
};
use crate::password::PasswordHasher;
use crate::policy::{self, AuthorizationPolicy};
use crate::repository::CredentialStore;
use crate::token::{TokenIssuer, opaque_token};
use crate::validation::{normalize_email, require_non_empty, validate, validate_password};

/// Same text whether or not the email is registered.
pub const RESET_REQUESTED_MESSAGE: &str = "If your email is registered, a reset link will be sent.";

/// Orchestrates the credential lifecycle.
///
/// Every collaborator is passed in; the service owns no global state.
/// State changes are announced through [`IdentityEvents`] after the store
/// write succeeds, and a failed announcement never fails the operation.
pub struct IdentityService<S: CredentialStore> {
    store: Arc<S>,
    hasher: Arc<PasswordHasher>,
    tokens: Arc<TokenIssuer>,
    events: IdentityEvents,
    reset_token_ttl: Duration,
}

impl<S: CredentialStore> Clone for IdentityService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            hasher: Arc::clone(&self.hasher),
            tokens: Arc::clone(&self.tokens),
            events: self.events.clone(),
            reset_token_ttl: self.reset_token_ttl,
        }
    }
}

impl<S: CredentialStore> IdentityService<S> {
    pub fn new(
        store: S,
        hasher: PasswordHasher,
        tokens: TokenIssuer,
        events: IdentityEvents,
        reset_token_ttl_secs: u64,
    ) -> Self {
        let ttl = i64::try_from(reset_token_ttl_secs).unwrap_or(i64::MAX);
        Self {
            store: Arc::new(store),
            hasher: Arc::new(hasher),
            tokens: Arc::new(tokens),
            events,
            reset_token_ttl: Duration::try_seconds(ttl).unwrap_or(Duration::MAX),
        }
    }

    /// Build the hasher and token issuer from configuration.
    pub fn from_config(
        store: S,
        config: &IdentityConfig,
        events: IdentityEvents,
    ) -> IdentityResult<Self> {
        let hasher = PasswordHasher::new(config.hash_cost)?;
        let tokens = TokenIssuer::new(&config.jwt_secret, config.access_token_ttl_secs);
        Ok(Self::new(
            store,
            hasher,
            tokens,
            events,
            config.reset_token_ttl_secs,
        ))
    }

    pub fn events(&self) -> &IdentityEvents {
        &self.events
    }

    // Registration and login

    #[instrument(skip_all)]
    pub async fn register(&self, input: RegisterUser) -> IdentityResult<UserResponse> {
        validate(&input)?;
        self.create_account(input.into()).await
    }

    #[instrument(skip_all)]
    pub async fn login(&self, input: LoginRequest) -> IdentityResult<LoginResponse> {
        validate(&input)?;
        let email = normalize_email(&input.email);

        let Some(user) = self.store.find_by_email(&email).await? else {
            self.hasher.verify_decoy(&input.password);
            return Err(IdentityError::InvalidCredentials);
        };

        if !self.hasher.verify(&input.password, &user.password_hash)? {
            warn!(user_id = %user.id, "Login failed");
            return Err(IdentityError::InvalidCredentials);
        }

        if !user.is_verified {
            return Err(IdentityError::EmailNotVerified);
        }

        let access_token = self.tokens.issue(user.id, &user.email, &user.roles)?;
        info!(user_id = %user.id, "User logged in");

        Ok(LoginResponse {
            user: user.into(),
            access_token,
            expires_in: self.tokens.ttl_secs(),
        })
    }

    /// Verify a bearer token (with or without the `Bearer ` prefix).
    pub fn authenticate(&self, bearer: &str) -> IdentityResult<AuthenticatedUser> {
        let token = bearer
            .strip_prefix("Bearer ")
            .unwrap_or(bearer)
            .trim();
        self.tokens.verify(token).map(AuthenticatedUser::from)
    }

    /// The caller's identity exactly as the bearer token proved it.
    pub fn get_profile(&self, subject: &AuthenticatedUser) -> AuthenticatedUser {
        subject.clone()
    }

    #[instrument(skip_all, fields(user_id = %subject_id))]
    pub async fn refresh_token(&self, subject_id: Uuid) -> IdentityResult<TokenResponse> {
        let user = self.store.find_by_id(subject_id).await?;
        let access_token = self.tokens.issue(user.id, &user.email, &user.roles)?;

        Ok(TokenResponse {
            access_token,
            expires_in: self.tokens.ttl_secs(),
        })
    }

    // Email verification and password reset

    #[instrument(skip_all)]
    pub async fn verify_email(&self, token: &str) -> IdentityResult<UserResponse> {
        let user = self
            .store
            .find_by_verification_token(token)
            .await?
            .ok_or(IdentityError::InvalidToken)?;

        // A live token on a verified user is a corrupt prior state.
        if user.is_verified {
            warn!(user_id = %user.id, "Verification token present on verified user");
            return Err(IdentityError::InvalidToken);
        }

        let updated = self
            .store
            .update(
                user.id,
                UserChanges {
                    is_verified: Some(true),
                    verification_token: Some(None),
                    ..Default::default()
                },
            )
            .await?;

        info!(user_id = %updated.id, "Email verified");
        self.events.user_verified(updated.id);
        Ok(updated.into())
    }

    #[instrument(skip_all)]
    pub async fn request_password_reset(&self, email: &str) -> IdentityResult<MessageResponse> {
        require_non_empty("email", email)?;
        let email = normalize_email(email);

        if let Some(user) = self.store.find_by_email(&email).await? {
            let reset = PasswordReset {
                token: opaque_token(),
                expires_at: Utc::now()
                    .checked_add_signed(self.reset_token_ttl)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            };
            self.store
                .update(
                    user.id,
                    UserChanges {
                        password_reset: Some(Some(reset)),
                        ..Default::default()
                    },
                )
                .await?;
            info!(user_id = %user.id, "Password reset requested");
        }

        Ok(MessageResponse::new(RESET_REQUESTED_MESSAGE))
    }

    #[instrument(skip_all)]
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> IdentityResult<UserResponse> {
        require_non_empty("token", token)?;
        require_non_empty("password", new_password)?;
        validate_password(new_password)?;

        let user = self
            .store
            .find_by_reset_token(token)
            .await?
            .ok_or(IdentityError::InvalidToken)?;

        let expired = user
            .password_reset
            .as_ref()
            .is_none_or(|reset| reset.is_expired_at(Utc::now()));
        if expired {
            return Err(IdentityError::ExpiredToken);
        }

        let password_hash = self.hasher.hash(new_password)?;
        let updated = self
            .store
            .update(
                user.id,
                UserChanges {
                    password_hash: Some(password_hash),
                    password_reset: Some(None),
                    ..Default::default()
                },
            )
            .await?;

        info!(user_id = %updated.id, "Password reset completed");
        self.events.password_reset(updated.id);
        Ok(updated.into())
    }

    // Record management

    #[instrument(skip_all, fields(user_id = %id))]
    pub async fn get(&self, id: Uuid) -> IdentityResult<UserResponse> {
        Ok(self.store.find_by_id(id).await?.into())
    }

    #[instrument(skip_all, fields(user_id = %id))]
    pub async fn update(&self, id: Uuid, input: UpdateUser) -> IdentityResult<UserResponse> {
        validate(&input)?;

        let email = input.email.as_deref().map(normalize_email);
        if let Some(ref email) = email {
            if let Some(existing) = self.store.find_by_email(email).await? {
                if existing.id != id {
                    return Err(IdentityError::Conflict(email.clone()));
                }
            }
        }

        let password_hash = match input.password {
            Some(ref password) => Some(self.hasher.hash(password)?),
            None => None,
        };

        let changes = UserChanges {
            email,
            password_hash,
            first_name: input.first_name,
            last_name: input.last_name,
            phone_number: input.phone_number,
            profile_picture: input.profile_picture,
            roles: input.roles.map(role_set),
            is_active: input.is_active,
            ..Default::default()
        };

        let updated: UserResponse = self.store.update(id, changes).await?.into();
        self.events.user_updated(&updated);
        Ok(updated)
    }

    #[instrument(skip_all, fields(user_id = %id))]
    pub async fn remove(&self, id: Uuid) -> IdentityResult<()> {
        self.store.delete(id).await?;
        info!(user_id = %id, "User removed");
        self.events.user_deleted(id);
        Ok(())
    }

    #[instrument(skip_all, fields(user_id = %id))]
    pub async fn add_admin_role(&self, id: Uuid) -> IdentityResult<UserResponse> {
        let user = self.store.find_by_id(id).await?;
        if user.has_role(Role::Admin) {
            return Ok(user.into());
        }

        let mut roles = user.roles;
        roles.insert(Role::Admin);
        self.change_roles(id, roles).await
    }

    #[instrument(skip_all, fields(user_id = %id))]
    pub async fn remove_admin_role(&self, id: Uuid) -> IdentityResult<UserResponse> {
        let user = self.store.find_by_id(id).await?;
        if !user.has_role(Role::Admin) {
            return Ok(user.into());
        }

        let mut roles = user.roles;
        roles.remove(&Role::Admin);
        self.change_roles(id, role_set(roles)).await
    }

    // Gated entry points

    #[instrument(skip_all, fields(subject = %subject.id))]
    pub async fn list_users(&self, subject: &AuthenticatedUser) -> IdentityResult<Vec<UserResponse>> {
        AuthorizationPolicy::ensure(subject, policy::LIST_USERS)?;
        let users = self.store.list().await?;
        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    #[instrument(skip_all, fields(subject = %subject.id))]
    pub async fn create_user(
        &self,
        subject: &AuthenticatedUser,
        input: CreateUser,
    ) -> IdentityResult<UserResponse> {
        AuthorizationPolicy::ensure(subject, policy::CREATE_USER)?;
        validate(&input)?;
        self.create_account(input).await
    }

    pub async fn get_user(
        &self,
        subject: &AuthenticatedUser,
        id: Uuid,
    ) -> IdentityResult<UserResponse> {
        AuthorizationPolicy::ensure_can_access_user(subject, id)?;
        self.get(id).await
    }

    pub async fn update_user(
        &self,
        subject: &AuthenticatedUser,
        id: Uuid,
        input: UpdateUser,
    ) -> IdentityResult<UserResponse> {
        AuthorizationPolicy::ensure_can_access_user(subject, id)?;
        if input.touches_privileged_fields() && !subject.is_admin() {
            warn!(user_id = %subject.id, "Non-admin tried to change roles or status");
            return Err(IdentityError::Forbidden);
        }
        self.update(id, input).await
    }

    pub async fn delete_user(&self, subject: &AuthenticatedUser, id: Uuid) -> IdentityResult<()> {
        AuthorizationPolicy::ensure(subject, policy::DELETE_USER)?;
        self.remove(id).await
    }

    // Helpers

    async fn create_account(&self, input: CreateUser) -> IdentityResult<UserResponse> {
        let email = normalize_email(&input.email);

        if self.store.find_by_email(&email).await?.is_some() {
            return Err(IdentityError::Conflict(email));
        }

        let password_hash = self.hasher.hash(&input.password)?;
        let roles = role_set(input.roles.unwrap_or_default());

        let mut user = User::new(
            email,
            password_hash,
            input.first_name,
            input.last_name,
            roles,
            opaque_token(),
        );
        user.phone_number = input.phone_number;
        user.profile_picture = input.profile_picture;

        let created: UserResponse = self.store.create(user).await?.into();
        info!(user_id = %created.id, "User registered");

        self.events.user_created(&created);
        Ok(created)
    }

    async fn change_roles(
        &self,
        id: Uuid,
        roles: std::collections::BTreeSet<Role>,
    ) -> IdentityResult<UserResponse> {
        let changes = UserChanges {
            roles: Some(roles),
            ..Default::default()
        };
        let updated: UserResponse = self.store.update(id, changes).await?.into();

        info!(user_id = %id, roles = ?updated.roles, "Roles changed");
        self.events.user_updated(&updated);
        Ok(updated)
    }
}
