//! Identity Domain
//!
//! Users, password credentials, email verification, password reset, bearer
//! tokens and role-based access, with state changes announced on an event
//! bus.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ IdentityService  │  ← Orchestration, validation, authorization
//! └──┬──┬──┬──┬──┬───┘
//!    │  │  │  │  └───────────▶ IdentityEvents ──▶ messaging::EventPublisher
//!    │  │  │  └──────────────▶ AuthorizationPolicy
//!    │  │  └─────────────────▶ TokenIssuer (HS256)
//!    │  └────────────────────▶ PasswordHasher (Argon2id)
//!    └───────────────────────▶ CredentialStore (in-memory / PostgreSQL)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use core_config::FromEnv;
//! use domain_identity::{
//!     IdentityConfig, IdentityEvents, IdentityService, InMemoryCredentialStore, RegisterUser,
//! };
//! use messaging::{EventDispatcher, RecordingBus};
//!
//! let config = IdentityConfig::from_env()?;
//! let (publisher, dispatcher) = EventDispatcher::spawn(RecordingBus::new(), 1024);
//! let service = IdentityService::from_config(
//!     InMemoryCredentialStore::new(),
//!     &config,
//!     IdentityEvents::new(publisher),
//! )?;
//!
//! let user = service.register(input).await?;
//!
//! // On shutdown
//! dispatcher.shutdown().await;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod password;
pub mod policy;
pub mod postgres_repository_impl;
pub mod repository;
pub mod service;
pub mod token;
pub mod validation;

// Re-export commonly used types
pub use config::IdentityConfig;
pub use error::{IdentityError, IdentityResult};
pub use events::IdentityEvents;
pub use models::{
    AuthenticatedUser, CreateUser, LoginRequest, LoginResponse, MessageResponse, PasswordReset,
    RegisterUser, Role, TokenResponse, UpdateUser, User, UserChanges, UserResponse,
};
pub use password::{HashCost, PasswordHasher};
pub use policy::AuthorizationPolicy;
pub use postgres_repository_impl::PostgresCredentialStore;
pub use repository::{CredentialStore, InMemoryCredentialStore};
pub use service::IdentityService;
pub use token::{TokenClaims, TokenIssuer};
