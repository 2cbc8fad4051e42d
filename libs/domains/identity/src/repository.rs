use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{IdentityError, IdentityResult};
use crate::models::{User, UserChanges};

/// Persistence for user records, keyed by id and by email.
///
/// Emails are stored in normalized form; callers normalize before lookup.
/// Every operation may also fail with `Unavailable` when the backing store
/// cannot be reached.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Persist a new user. `Conflict` if the email is taken.
    async fn create(&self, user: User) -> IdentityResult<User>;

    /// `NotFound` if no user has this id.
    async fn find_by_id(&self, id: Uuid) -> IdentityResult<User>;

    /// Absence is not an error.
    async fn find_by_email(&self, email: &str) -> IdentityResult<Option<User>>;

    /// All users, newest first.
    async fn list(&self) -> IdentityResult<Vec<User>>;

    /// Merge `changes` into the stored record and bump `updated_at`.
    async fn update(&self, id: Uuid, changes: UserChanges) -> IdentityResult<User>;

    /// Hard delete. `NotFound` if absent.
    async fn delete(&self, id: Uuid) -> IdentityResult<()>;

    async fn find_by_verification_token(&self, token: &str) -> IdentityResult<Option<User>>;

    async fn find_by_reset_token(&self, token: &str) -> IdentityResult<Option<User>>;
}

/// In-memory implementation of CredentialStore (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryCredentialStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn create(&self, mut user: User) -> IdentityResult<User> {
        let mut users = self.users.write().await;

        if users.values().any(|u| u.email == user.email) {
            return Err(IdentityError::Conflict(user.email));
        }

        let now = Utc::now();
        user.created_at = now;
        user.updated_at = now;
        users.insert(user.id, user.clone());

        tracing::debug!(user_id = %user.id, "Stored user");
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> IdentityResult<User> {
        let users = self.users.read().await;
        users.get(&id).cloned().ok_or(IdentityError::NotFound(id))
    }

    async fn find_by_email(&self, email: &str) -> IdentityResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn list(&self) -> IdentityResult<Vec<User>> {
        let users = self.users.read().await;
        let mut result: Vec<User> = users.values().cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> IdentityResult<User> {
        let mut users = self.users.write().await;

        if let Some(ref email) = changes.email {
            if users.values().any(|u| u.id != id && &u.email == email) {
                return Err(IdentityError::Conflict(email.clone()));
            }
        }

        let user = users.get_mut(&id).ok_or(IdentityError::NotFound(id))?;
        user.apply(changes);
        Ok(user.clone())
    }

    async fn delete(&self, id: Uuid) -> IdentityResult<()> {
        let mut users = self.users.write().await;
        users
            .remove(&id)
            .map(|_| ())
            .ok_or(IdentityError::NotFound(id))
    }

    async fn find_by_verification_token(&self, token: &str) -> IdentityResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.verification_token.as_deref() == Some(token))
            .cloned())
    }

    async fn find_by_reset_token(&self, token: &str) -> IdentityResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| {
                u.password_reset
                    .as_ref()
                    .is_some_and(|reset| reset.token == token)
            })
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PasswordReset, Role};
    use std::collections::BTreeSet;

    fn user(email: &str) -> User {
        User::new(
            email.to_string(),
            "$argon2id$digest".to_string(),
            "Ada".to_string(),
            "Byron".to_string(),
            BTreeSet::new(),
            format!("verify-{}", email),
        )
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_email() {
        let store = InMemoryCredentialStore::new();
        let first = store.create(user("a@x.com")).await.unwrap();

        let result = store.create(user("a@x.com")).await;
        assert!(matches!(result, Err(IdentityError::Conflict(ref e)) if e == "a@x.com"));

        let kept = store.find_by_id(first.id).await.unwrap();
        assert_eq!(kept.verification_token, first.verification_token);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_id_missing() {
        let store = InMemoryCredentialStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.find_by_id(id).await,
            Err(IdentityError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_find_by_email_absent_is_none() {
        let store = InMemoryCredentialStore::new();
        assert!(store.find_by_email("nobody@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_merges_and_bumps_timestamp() {
        let store = InMemoryCredentialStore::new();
        let created = store.create(user("a@x.com")).await.unwrap();

        let updated = store
            .update(
                created.id,
                UserChanges {
                    roles: Some(BTreeSet::from([Role::User, Role::Admin])),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(updated.has_role(Role::Admin));
        assert_eq!(updated.first_name, "Ada");
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_update_to_taken_email_conflicts() {
        let store = InMemoryCredentialStore::new();
        store.create(user("a@x.com")).await.unwrap();
        let b = store.create(user("b@x.com")).await.unwrap();

        let result = store
            .update(
                b.id,
                UserChanges {
                    email: Some("a@x.com".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(IdentityError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_update_missing_user() {
        let store = InMemoryCredentialStore::new();
        let result = store.update(Uuid::new_v4(), UserChanges::default()).await;
        assert!(matches!(result, Err(IdentityError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryCredentialStore::new();
        let created = store.create(user("a@x.com")).await.unwrap();

        store.delete(created.id).await.unwrap();
        assert!(matches!(
            store.delete(created.id).await,
            Err(IdentityError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_token_lookups() {
        let store = InMemoryCredentialStore::new();
        let created = store.create(user("a@x.com")).await.unwrap();

        let found = store
            .find_by_verification_token("verify-a@x.com")
            .await
            .unwrap();
        assert_eq!(found.map(|u| u.id), Some(created.id));
        assert!(store.find_by_reset_token("reset").await.unwrap().is_none());

        store
            .update(
                created.id,
                UserChanges {
                    password_reset: Some(Some(PasswordReset {
                        token: "reset".to_string(),
                        expires_at: Utc::now(),
                    })),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let found = store.find_by_reset_token("reset").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(created.id));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = InMemoryCredentialStore::new();
        let first = store.create(user("a@x.com")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = store.create(user("b@x.com")).await.unwrap();

        let ids: Vec<Uuid> = store.list().await.unwrap().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }
}
