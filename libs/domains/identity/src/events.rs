//! Identity events announced on the bus.

use messaging::EventPublisher;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::models::UserResponse;

pub const USER_CREATED: &str = "auth.user.created";
pub const USER_UPDATED: &str = "auth.user.updated";
pub const USER_DELETED: &str = "auth.user.deleted";
pub const USER_VERIFIED: &str = "auth.user.verified";
pub const USER_PASSWORD_RESET: &str = "auth.user.password_reset";

/// Keys that must never leave the service in any payload.
const CREDENTIAL_KEYS: &[&str] = &[
    "passwordHash",
    "password",
    "passwordResetToken",
    "passwordResetExpires",
    "verificationToken",
];

/// Payload for events that only identify the user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdPayload {
    pub user_id: Uuid,
}

/// Typed front for the identity topics.
#[derive(Debug, Clone)]
pub struct IdentityEvents {
    publisher: EventPublisher,
}

impl IdentityEvents {
    pub fn new(publisher: EventPublisher) -> Self {
        Self { publisher }
    }

    pub fn user_created(&self, user: &UserResponse) {
        self.publish_user(USER_CREATED, user);
    }

    pub fn user_updated(&self, user: &UserResponse) {
        self.publish_user(USER_UPDATED, user);
    }

    pub fn user_deleted(&self, user_id: Uuid) {
        self.publisher.publish(USER_DELETED, &UserIdPayload { user_id });
    }

    pub fn user_verified(&self, user_id: Uuid) {
        self.publisher.publish(USER_VERIFIED, &UserIdPayload { user_id });
    }

    pub fn password_reset(&self, user_id: Uuid) {
        self.publisher
            .publish(USER_PASSWORD_RESET, &UserIdPayload { user_id });
    }

    /// Wait until previously announced events have been attempted.
    pub async fn flush(&self) {
        self.publisher.flush().await;
    }

    fn publish_user(&self, topic: &str, user: &UserResponse) {
        match serde_json::to_value(user) {
            Ok(value) => self.publisher.publish(topic, &sanitize(value)),
            Err(e) => tracing::error!(topic, error = %e, "Failed to encode user event"),
        }
    }
}

/// Drop credential keys from a user-shaped payload.
pub fn sanitize(mut value: Value) -> Value {
    if let Value::Object(ref mut map) = value {
        for key in CREDENTIAL_KEYS {
            map.remove(*key);
        }
    }
    value
}
