use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, DbErr, FromQueryResult, Statement,
    TransactionTrait,
};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{IdentityError, IdentityResult};
use crate::models::{PasswordReset, Role, User, UserChanges, role_set};
use crate::repository::CredentialStore;

/// PostgreSQL implementation of CredentialStore using SeaORM raw statements
#[derive(Clone)]
pub struct PostgresCredentialStore {
    db: DatabaseConnection,
}

impl PostgresCredentialStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

/// Row shape of `identity_users`
#[derive(Debug, FromQueryResult)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    phone_number: Option<String>,
    profile_picture: Option<String>,
    roles: Vec<String>, // PostgreSQL text array
    is_verified: bool,
    verification_token: Option<String>,
    password_reset_token: Option<String>,
    password_reset_expires: Option<DateTime<Utc>>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let roles = role_set(row.roles.iter().filter_map(|s| Role::from_str(s).ok()));

        let password_reset = match (row.password_reset_token, row.password_reset_expires) {
            (Some(token), Some(expires_at)) => Some(PasswordReset { token, expires_at }),
            _ => None,
        };

        User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            first_name: row.first_name,
            last_name: row.last_name,
            phone_number: row.phone_number,
            profile_picture: row.profile_picture,
            roles,
            is_verified: row.is_verified,
            verification_token: row.verification_token,
            password_reset,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn roles_array(user: &User) -> Vec<String> {
    user.roles.iter().map(|r| r.to_string()).collect()
}

fn is_unique_violation(err: &DbErr) -> bool {
    let msg = err.to_string();
    msg.contains("duplicate key") || msg.contains("unique constraint")
}

impl PostgresCredentialStore {
    async fn find_one(&self, sql: &str, value: sea_orm::Value) -> IdentityResult<Option<User>> {
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [value]);

        let row = UserRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(IdentityError::from_db)?;

        Ok(row.map(|r| r.into()))
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    async fn create(&self, user: User) -> IdentityResult<User> {
        let sql = r#"
            INSERT INTO identity_users (
                id, email, password_hash, first_name, last_name, phone_number,
                profile_picture, roles, is_verified, verification_token,
                password_reset_token, password_reset_expires, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
        "#;

        let (reset_token, reset_expires) = match &user.password_reset {
            Some(reset) => (Some(reset.token.clone()), Some(reset.expires_at)),
            None => (None, None),
        };

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                user.id.into(),
                user.email.clone().into(),
                user.password_hash.clone().into(),
                user.first_name.clone().into(),
                user.last_name.clone().into(),
                user.phone_number.clone().into(),
                user.profile_picture.clone().into(),
                roles_array(&user).into(),
                user.is_verified.into(),
                user.verification_token.clone().into(),
                reset_token.into(),
                reset_expires.into(),
                user.is_active.into(),
            ],
        );

        let row = UserRow::find_by_statement(stmt)
            .one(&self.db)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    IdentityError::Conflict(user.email.clone())
                } else {
                    IdentityError::from_db(e)
                }
            })?
            .ok_or_else(|| IdentityError::Internal("Failed to create user".to_string()))?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: Uuid) -> IdentityResult<User> {
        self.find_one("SELECT * FROM identity_users WHERE id = $1", id.into())
            .await?
            .ok_or(IdentityError::NotFound(id))
    }

    async fn find_by_email(&self, email: &str) -> IdentityResult<Option<User>> {
        self.find_one("SELECT * FROM identity_users WHERE email = $1", email.into())
            .await
    }

    async fn list(&self) -> IdentityResult<Vec<User>> {
        let sql = "SELECT * FROM identity_users ORDER BY created_at DESC";

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, []);

        let rows = UserRow::find_by_statement(stmt)
            .all(&self.db)
            .await
            .map_err(IdentityError::from_db)?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Read-modify-write under a row lock, so concurrent updates to the same
    /// user apply one after the other.
    async fn update(&self, id: Uuid, changes: UserChanges) -> IdentityResult<User> {
        let txn = self.db.begin().await.map_err(IdentityError::from_db)?;

        let select = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT * FROM identity_users WHERE id = $1 FOR UPDATE",
            [id.into()],
        );
        let mut user: User = UserRow::find_by_statement(select)
            .one(&txn)
            .await
            .map_err(IdentityError::from_db)?
            .ok_or(IdentityError::NotFound(id))?
            .into();

        let new_email = changes.email.clone();
        user.apply(changes);

        let (reset_token, reset_expires) = match &user.password_reset {
            Some(reset) => (Some(reset.token.clone()), Some(reset.expires_at)),
            None => (None, None),
        };

        let sql = r#"
            UPDATE identity_users
            SET email = $2, password_hash = $3, first_name = $4, last_name = $5,
                phone_number = $6, profile_picture = $7, roles = $8, is_verified = $9,
                verification_token = $10, password_reset_token = $11,
                password_reset_expires = $12, is_active = $13, updated_at = $14
            WHERE id = $1
            RETURNING *
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                user.id.into(),
                user.email.clone().into(),
                user.password_hash.clone().into(),
                user.first_name.clone().into(),
                user.last_name.clone().into(),
                user.phone_number.clone().into(),
                user.profile_picture.clone().into(),
                roles_array(&user).into(),
                user.is_verified.into(),
                user.verification_token.clone().into(),
                reset_token.into(),
                reset_expires.into(),
                user.is_active.into(),
                user.updated_at.into(),
            ],
        );

        let row = UserRow::find_by_statement(stmt)
            .one(&txn)
            .await
            .map_err(|e| match new_email {
                Some(ref email) if is_unique_violation(&e) => {
                    IdentityError::Conflict(email.clone())
                }
                _ => IdentityError::from_db(e),
            })?
            .ok_or(IdentityError::NotFound(id))?;

        txn.commit().await.map_err(IdentityError::from_db)?;

        Ok(row.into())
    }

    async fn delete(&self, id: Uuid) -> IdentityResult<()> {
        let sql = "DELETE FROM identity_users WHERE id = $1";

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [id.into()]);

        let result = self
            .db
            .execute_raw(stmt)
            .await
            .map_err(IdentityError::from_db)?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::NotFound(id));
        }
        Ok(())
    }

    async fn find_by_verification_token(&self, token: &str) -> IdentityResult<Option<User>> {
        self.find_one(
            "SELECT * FROM identity_users WHERE verification_token = $1",
            token.into(),
        )
        .await
    }

    async fn find_by_reset_token(&self, token: &str) -> IdentityResult<Option<User>> {
        self.find_one(
            "SELECT * FROM identity_users WHERE password_reset_token = $1",
            token.into(),
        )
        .await
    }
}
