//! Records Service
//!
//! User profile and contact request records for the roster site. Every user
//! is addressed by an opaque key that names both its database row and its
//! media directory, so the two are created, replaced and removed together.
//!
//! ## Features
//!
//! - **Key Addressing**: random keys minted per user, retried on collision
//! - **Per-User Storage**: `<static_root>/<users_dir>/<key>/{photos,videos}`
//!   provisioned with the row and removed with it
//! - **Media Ingestion**: single or multiple uploads per category, stored
//!   under collision-free names
//! - **Contact Requests**: persisted and announced to a Telegram chat
//! - **Chat Relay**: optional forwarding of a source chat's messages to the
//!   notification chat
//!
//! ## Architecture
//!
//! ```text
//! HTTP (axum)                 Filesystem                PostgreSQL
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ /users/*     │           │ users/       │          │ users        │
//! │ /requests/*  │           │   {key}/     │          │ requests     │
//! │ /static/*    │◀──────────│   photos/    │          └──────────────┘
//! └──────────────┘           │   videos/    │                 ▲
//!        │                   └──────────────┘                 │
//!        ▼                          ▲                         │
//! ┌──────────────┐           ┌──────────────┐                 │
//! │ User         │──────────▶│ Provisioner  │                 │
//! │ Lifecycle    │           │ + Ingestor   │                 │
//! │ Service      │───────────┴──────────────┴─────────────────┤
//! └──────────────┘                                            │
//! ┌──────────────┐           ┌──────────────┐                 │
//! │ Request      │──────────▶│ Notifier     │                 │
//! │ Service      │───────────┴──────────────┴─────────────────┘
//! └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod key_generator;
pub mod media;
pub mod notifier;
pub mod provisioner;
pub mod relay;
pub mod request_service;
pub mod request_store;
pub mod user_service;
pub mod user_store;
pub mod validation;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::{LifecycleError, Stage};
pub use key_generator::{KeyGenerator, UserKey, UuidKeyGenerator};
pub use media::{Category, MediaBatch, MediaIngestor, UploadedFile};
pub use notifier::{LogNotifier, Notifier, TelegramNotifier};
pub use provisioner::{StorageLayout, StorageProvisioner};
pub use relay::TelegramRelay;
pub use request_service::RequestService;
pub use request_store::{NewRequest, PgRequestStore, RequestRecord, RequestStore};
pub use user_service::{CreatedUser, UpdatedUser, UserLifecycleService};
pub use user_store::{PgUserStore, Profile, ProfilePatch, UserRecord, UserStore};
