use chrono::{Duration, Utc};
use domain_identity::events::{
    USER_CREATED, USER_DELETED, USER_PASSWORD_RESET, USER_UPDATED, USER_VERIFIED,
};
use domain_identity::service::RESET_REQUESTED_MESSAGE;
use domain_identity::validation::normalize_email;
use domain_identity::{
    AuthenticatedUser, CredentialStore, HashCost, IdentityConfig, IdentityError, IdentityEvents,
    IdentityService, InMemoryCredentialStore, LoginRequest, PasswordReset, RegisterUser, Role,
    UpdateUser, UserChanges,
};
use messaging::{EventDispatcher, FailingBus, RecordingBus};
use uuid::Uuid;

const SECRET: &str = "integration-test-secret-with-32-chars!!";

struct Harness {
    service: IdentityService<InMemoryCredentialStore>,
    store: InMemoryCredentialStore,
    bus: RecordingBus,
    dispatcher: EventDispatcher,
}

impl Harness {
    fn new() -> Self {
        let store = InMemoryCredentialStore::new();
        let bus = RecordingBus::new();
        let (publisher, dispatcher) = EventDispatcher::spawn(bus.clone(), 64);
        let config = IdentityConfig::new(SECRET)
            .unwrap()
            .with_hash_cost(HashCost::minimal());

        let service =
            IdentityService::from_config(store.clone(), &config, IdentityEvents::new(publisher))
                .unwrap();

        Self {
            service,
            store,
            bus,
            dispatcher,
        }
    }

    async fn flush(&self) {
        self.service.events().flush().await;
    }

    async fn verification_token(&self, email: &str) -> String {
        self.store
            .find_by_email(&normalize_email(email))
            .await
            .unwrap()
            .and_then(|u| u.verification_token)
            .expect("user should have a verification token")
    }

    async fn reset_token(&self, email: &str) -> String {
        self.store
            .find_by_email(&normalize_email(email))
            .await
            .unwrap()
            .and_then(|u| u.password_reset)
            .map(|r| r.token)
            .expect("user should have a reset token")
    }

    /// Register and verify, returning the user id.
    async fn verified_user(&self, email: &str, password: &str) -> Uuid {
        let created = self.service.register(registration(email, password)).await.unwrap();
        let token = self.verification_token(email).await;
        self.service.verify_email(&token).await.unwrap();
        created.id
    }

    async fn login(&self, email: &str, password: &str) -> Result<String, IdentityError> {
        self.service
            .login(LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await
            .map(|r| r.access_token)
    }
}

fn registration(email: &str, password: &str) -> RegisterUser {
    RegisterUser {
        email: email.to_string(),
        password: password.to_string(),
        first_name: "Al".to_string(),
        last_name: "Bo".to_string(),
        phone_number: None,
    }
}

#[tokio::test]
async fn test_end_to_end_register_verify_login() {
    let h = Harness::new();

    let created = h
        .service
        .register(registration("a@x.com", "password123"))
        .await
        .unwrap();
    assert!(!created.is_verified);

    let err = h.login("a@x.com", "password123").await.unwrap_err();
    assert!(matches!(err, IdentityError::EmailNotVerified));

    let token = h.verification_token("a@x.com").await;
    let verified = h.service.verify_email(&token).await.unwrap();
    assert!(verified.is_verified);

    let response = h
        .service
        .login(LoginRequest {
            email: "a@x.com".to_string(),
            password: "password123".to_string(),
        })
        .await
        .unwrap();
    assert!(!response.access_token.is_empty());
    assert_eq!(response.expires_in, 86_400);

    let body = serde_json::to_value(&response).unwrap();
    let user = body["user"].as_object().unwrap();
    assert!(!user.contains_key("passwordHash"));
    assert!(!user.contains_key("verificationToken"));
    assert!(!user.contains_key("passwordResetToken"));
    assert_eq!(user["email"], "a@x.com");

    let subject = h.service.authenticate(&response.access_token).unwrap();
    assert_eq!(subject.id, created.id);
    assert_eq!(h.service.get_profile(&subject).email, "a@x.com");

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_stored_hash_never_contains_plaintext() {
    let h = Harness::new();
    let passwords = ["password123", "correct horse battery", "ÜñíçødéPass"];

    for (i, password) in passwords.iter().enumerate() {
        let email = format!("user{}@x.com", i);
        h.service.register(registration(&email, password)).await.unwrap();

        let stored = h.store.find_by_email(&email).await.unwrap().unwrap();
        assert_ne!(stored.password_hash, *password);
        assert!(!stored.password_hash.contains(password));
    }

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_registration_conflicts_and_keeps_first() {
    let h = Harness::new();

    let first = h
        .service
        .register(registration("a@x.com", "password123"))
        .await
        .unwrap();
    let before = h.store.find_by_id(first.id).await.unwrap();

    let err = h
        .service
        .register(registration("A@X.COM", "different-password"))
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::Conflict(_)));

    let after = h.store.find_by_id(first.id).await.unwrap();
    assert_eq!(after.password_hash, before.password_hash);
    assert_eq!(after.verification_token, before.verification_token);
    assert_eq!(h.store.list().await.unwrap().len(), 1);

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let h = Harness::new();
    h.verified_user("a@x.com", "password123").await;

    let wrong_password = h.login("a@x.com", "password124").await.unwrap_err();
    let unknown_email = h.login("ghost@x.com", "password123").await.unwrap_err();

    assert!(matches!(wrong_password, IdentityError::InvalidCredentials));
    assert!(matches!(unknown_email, IdentityError::InvalidCredentials));
    assert_eq!(wrong_password.code(), unknown_email.code());
    assert_eq!(wrong_password.to_string(), unknown_email.to_string());

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_login_is_case_insensitive_on_email() {
    let h = Harness::new();
    let id = h.verified_user("Mixed.Case@X.com", "password123").await;

    let stored = h.store.find_by_id(id).await.unwrap();
    assert_eq!(stored.email, "mixed.case@x.com");
    assert!(stored.is_verified);

    assert!(h.login("mixed.case@x.com", "password123").await.is_ok());
    assert!(h.login("MIXED.CASE@X.COM", "password123").await.is_ok());

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_verification_token_is_single_use() {
    let h = Harness::new();
    let created = h
        .service
        .register(registration("a@x.com", "password123"))
        .await
        .unwrap();

    assert!(matches!(
        h.service.verify_email("not-a-real-token").await,
        Err(IdentityError::InvalidToken)
    ));

    let token = h.verification_token("a@x.com").await;
    h.service.verify_email(&token).await.unwrap();

    let stored = h.store.find_by_id(created.id).await.unwrap();
    assert!(stored.is_verified);
    assert!(stored.verification_token.is_none());

    assert!(matches!(
        h.service.verify_email(&token).await,
        Err(IdentityError::InvalidToken)
    ));

    h.flush().await;
    let verified = h.bus.published_on(USER_VERIFIED);
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].payload["userId"], created.id.to_string());

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_password_reset_flow() {
    let h = Harness::new();
    let id = h.verified_user("a@x.com", "password123").await;

    let response = h.service.request_password_reset("a@x.com").await.unwrap();
    assert_eq!(response.message, RESET_REQUESTED_MESSAGE);

    h.flush().await;
    assert!(h.bus.published_on(USER_PASSWORD_RESET).is_empty());

    let token = h.reset_token("a@x.com").await;
    let pending = h.store.find_by_id(id).await.unwrap().password_reset.unwrap();
    let ttl = pending.expires_at - Utc::now();
    assert!(ttl > Duration::minutes(59) && ttl <= Duration::hours(1));

    h.service.reset_password(&token, "brand-new-pass").await.unwrap();

    assert!(matches!(
        h.login("a@x.com", "password123").await,
        Err(IdentityError::InvalidCredentials)
    ));
    assert!(h.login("a@x.com", "brand-new-pass").await.is_ok());

    let stored = h.store.find_by_id(id).await.unwrap();
    assert!(stored.password_reset.is_none());

    assert!(matches!(
        h.service.reset_password(&token, "another-pass-1").await,
        Err(IdentityError::InvalidToken)
    ));

    h.flush().await;
    let resets = h.bus.published_on(USER_PASSWORD_RESET);
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].payload["userId"], id.to_string());

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_expired_reset_token() {
    let h = Harness::new();
    let id = h.verified_user("a@x.com", "password123").await;

    h.store
        .update(
            id,
            UserChanges {
                password_reset: Some(Some(PasswordReset {
                    token: "stale-token".to_string(),
                    expires_at: Utc::now() - Duration::seconds(1),
                })),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(matches!(
        h.service.reset_password("stale-token", "brand-new-pass").await,
        Err(IdentityError::ExpiredToken)
    ));
    assert!(h.login("a@x.com", "password123").await.is_ok());

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_reset_request_does_not_disclose_registration() {
    let h = Harness::new();
    h.verified_user("a@x.com", "password123").await;

    let known = h.service.request_password_reset("a@x.com").await.unwrap();
    let unknown = h.service.request_password_reset("ghost@x.com").await.unwrap();
    assert_eq!(known, unknown);

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_list_users_is_role_gated() {
    let h = Harness::new();
    let id = h.verified_user("a@x.com", "password123").await;

    let token = h.login("a@x.com", "password123").await.unwrap();
    let subject = h.service.authenticate(&token).unwrap();
    assert!(matches!(
        h.service.list_users(&subject).await,
        Err(IdentityError::Forbidden)
    ));

    h.service.add_admin_role(id).await.unwrap();

    // The old token still carries the old roles.
    assert!(h.service.list_users(&subject).await.is_err());

    let refreshed = h.service.refresh_token(id).await.unwrap();
    let admin = h.service.authenticate(&refreshed.access_token).unwrap();
    assert!(admin.is_admin());
    assert_eq!(h.service.list_users(&admin).await.unwrap().len(), 1);

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_org_admin_may_list_but_not_delete() {
    let h = Harness::new();
    let id = h.verified_user("lead@x.com", "password123").await;
    let other = h.verified_user("b@x.com", "password123").await;

    let org_admin = AuthenticatedUser {
        id,
        email: "lead@x.com".to_string(),
        roles: [Role::OrgAdmin].into_iter().collect(),
    };

    assert_eq!(h.service.list_users(&org_admin).await.unwrap().len(), 2);
    assert!(matches!(
        h.service.delete_user(&org_admin, other).await,
        Err(IdentityError::Forbidden)
    ));

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_registration_succeeds_with_bus_down() {
    let store = InMemoryCredentialStore::new();
    let bus = FailingBus::new();
    let (publisher, dispatcher) = EventDispatcher::spawn(bus.clone(), 8);
    let config = IdentityConfig::new(SECRET)
        .unwrap()
        .with_hash_cost(HashCost::minimal());
    let service =
        IdentityService::from_config(store.clone(), &config, IdentityEvents::new(publisher))
            .unwrap();

    let created = service
        .register(registration("a@x.com", "password123"))
        .await
        .unwrap();
    assert!(store.find_by_id(created.id).await.is_ok());

    service.events().flush().await;
    assert_eq!(bus.attempts(), 1);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_user_created_event_is_sanitized() {
    let h = Harness::new();
    let created = h
        .service
        .register(registration("a@x.com", "password123"))
        .await
        .unwrap();

    h.flush().await;
    let events = h.bus.published_on(USER_CREATED);
    assert_eq!(events.len(), 1);

    let payload = events[0].payload.as_object().unwrap();
    assert_eq!(payload["id"], created.id.to_string());
    for key in ["passwordHash", "password", "verificationToken", "passwordResetToken"] {
        assert!(!payload.contains_key(key), "{} leaked", key);
    }

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_admin_role_changes_publish_only_on_change() {
    let h = Harness::new();
    let id = h.verified_user("a@x.com", "password123").await;

    let first = h.service.add_admin_role(id).await.unwrap();
    let second = h.service.add_admin_role(id).await.unwrap();
    assert!(first.roles.contains(&Role::Admin));
    assert_eq!(first.updated_at, second.updated_at);

    h.flush().await;
    assert_eq!(h.bus.published_on(USER_UPDATED).len(), 1);

    let removed = h.service.remove_admin_role(id).await.unwrap();
    assert_eq!(removed.roles, vec![Role::User]);
    h.service.remove_admin_role(id).await.unwrap();

    h.flush().await;
    assert_eq!(h.bus.published_on(USER_UPDATED).len(), 2);

    h.dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admin_grants_last_writer_wins() {
    let h = Harness::new();
    let id = h.verified_user("a@x.com", "password123").await;

    let calls = (0..4).map(|_| {
        let service = h.service.clone();
        async move { service.add_admin_role(id).await }
    });
    let results = futures::future::join_all(calls).await;

    // Every racer succeeds; how many saw the role missing is not defined.
    assert!(results.iter().all(|r| r.is_ok()));
    let stored = h.store.find_by_id(id).await.unwrap();
    assert!(stored.has_role(Role::Admin));

    h.flush().await;
    let updates = h.bus.published_on(USER_UPDATED).len();
    assert!((1..=4).contains(&updates));

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_update_merges_partial_fields() {
    let h = Harness::new();
    let id = h.verified_user("a@x.com", "password123").await;

    let updated = h
        .service
        .update(
            id,
            UpdateUser {
                first_name: Some("Alice".to_string()),
                profile_picture: Some(Some("https://example.com/me.png".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.first_name, "Alice");
    assert_eq!(updated.last_name, "Bo");
    assert_eq!(updated.full_name, "Alice Bo");
    assert_eq!(
        updated.profile_picture.as_deref(),
        Some("https://example.com/me.png")
    );
    assert!(updated.is_verified);
    assert!(h.login("a@x.com", "password123").await.is_ok());

    h.flush().await;
    assert_eq!(h.bus.published_on(USER_UPDATED).len(), 1);

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_update_clears_optional_fields() {
    let h = Harness::new();
    let id = h.verified_user("a@x.com", "password123").await;

    h.service
        .update(
            id,
            UpdateUser {
                phone_number: Some(Some("+15550100".to_string())),
                profile_picture: Some(Some("https://example.com/me.png".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let cleared = h
        .service
        .update(
            id,
            UpdateUser {
                phone_number: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(cleared.phone_number, None);
    assert_eq!(
        cleared.profile_picture.as_deref(),
        Some("https://example.com/me.png")
    );

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_update_password_rehashes() {
    let h = Harness::new();
    let id = h.verified_user("a@x.com", "password123").await;

    h.service
        .update(
            id,
            UpdateUser {
                password: Some("rotated-password".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let stored = h.store.find_by_id(id).await.unwrap();
    assert!(!stored.password_hash.contains("rotated-password"));
    assert!(h.login("a@x.com", "rotated-password").await.is_ok());

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_update_to_taken_email_conflicts() {
    let h = Harness::new();
    h.verified_user("a@x.com", "password123").await;
    let b = h.verified_user("b@x.com", "password123").await;

    let err = h
        .service
        .update(
            b,
            UpdateUser {
                email: Some("A@x.com".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::Conflict(_)));

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_self_service_access() {
    let h = Harness::new();
    let me = h.verified_user("a@x.com", "password123").await;
    let other = h.verified_user("b@x.com", "password123").await;

    let token = h.login("a@x.com", "password123").await.unwrap();
    let subject = h.service.authenticate(&token).unwrap();

    assert!(h.service.get_user(&subject, me).await.is_ok());
    assert!(matches!(
        h.service.get_user(&subject, other).await,
        Err(IdentityError::Forbidden)
    ));

    let updated = h
        .service
        .update_user(
            &subject,
            me,
            UpdateUser {
                phone_number: Some(Some("+15550100".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.phone_number.as_deref(), Some("+15550100"));

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_admin_creates_and_deletes_users() {
    let h = Harness::new();
    let admin_id = h.verified_user("root@x.com", "password123").await;
    h.service.add_admin_role(admin_id).await.unwrap();
    let admin = h
        .service
        .authenticate(&h.login("root@x.com", "password123").await.unwrap())
        .unwrap();

    let created = h
        .service
        .create_user(
            &admin,
            domain_identity::CreateUser {
                email: "volunteer@x.com".to_string(),
                password: "password123".to_string(),
                first_name: "Val".to_string(),
                last_name: "Unteer".to_string(),
                phone_number: None,
                profile_picture: Some("https://example.com/val.png".to_string()),
                roles: Some(vec![Role::Volunteer, Role::Member]),
            },
        )
        .await
        .unwrap();
    assert_eq!(created.roles, vec![Role::Member, Role::Volunteer]);
    assert_eq!(
        created.profile_picture.as_deref(),
        Some("https://example.com/val.png")
    );

    h.service.delete_user(&admin, created.id).await.unwrap();
    assert!(matches!(
        h.service.delete_user(&admin, created.id).await,
        Err(IdentityError::NotFound(_))
    ));

    h.flush().await;
    let deleted = h.bus.published_on(USER_DELETED);
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].payload["userId"], created.id.to_string());

    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_refresh_token_requires_existing_user() {
    let h = Harness::new();
    let id = h.verified_user("a@x.com", "password123").await;

    let refreshed = h.service.refresh_token(id).await.unwrap();
    let subject = h.service.authenticate(&refreshed.access_token).unwrap();
    assert_eq!(subject.id, id);

    h.service.remove(id).await.unwrap();
    assert!(matches!(
        h.service.refresh_token(id).await,
        Err(IdentityError::NotFound(missing)) if missing == id
    ));

    h.dispatcher.shutdown().await;
}
