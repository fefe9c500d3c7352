//! # Oobforge Core
//!
//! Core library for email-link account registration.
//!
//! This crate provides:
//! - A five-stage registration pipeline with resumable, persisted progress
//! - An HTTP client that falls back to a forward proxy exactly once
//! - Round-robin API key rotation shared across concurrent runs
//! - Verification link extraction from raw email bodies
//! - JSON file and in-memory credential stores
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use oobforge_core::{
//!     Endpoints, HttpOptions, JsonFileStore, KeyRotator, PipelineConfig, PipelineContext,
//!     RegistrationPipeline, ResilientHttpClient, StaticCode,
//! };
//!
//! async fn register(email: &str, code: &str) -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = PipelineContext::new(
//!         Arc::new(ResilientHttpClient::new(&HttpOptions::default())?),
//!         Arc::new(KeyRotator::new(["key-a", "key-b"])?),
//!         Endpoints::new("https://api.example.com/onboarding", "https://app.example.com/token"),
//!         PipelineConfig::new("https://app.example.com/login"),
//!     );
//!     let store = JsonFileStore::new(JsonFileStore::default_path()?);
//!
//!     let mut pipeline = RegistrationPipeline::new(ctx, store, email);
//!     println!("{}", pipeline.run(&StaticCode::new(code)).await);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod claims;
pub mod endpoints;
pub mod error;
pub mod extract;
pub mod http;
pub mod keys;
pub mod pipeline;
pub mod record;
pub mod source;
pub mod store;

// Re-export commonly used types at crate root
pub use claims::{
    ClaimsError,
    TokenClaims,
};

pub use endpoints::Endpoints;

pub use error::ConfigError;

pub use extract::{
    ExtractorConfig,
    LinkExtractor,
    Strategy,
    VerificationLink,
};

pub use http::{
    HttpOptions,
    HttpRequest,
    HttpResponse,
    RequestOutcome,
    ResilientHttpClient,
    Route,
    TransportError,
};

pub use keys::KeyRotator;

pub use pipeline::{
    PipelineConfig,
    PipelineContext,
    PipelineError,
    PipelineState,
    RecoveryAction,
    RegistrationPipeline,
    RunOutcome,
    Stage,
};

pub use record::{
    AppToken,
    CredentialRecord,
    Secret,
};

pub use source::{
    CodeSource,
    MailboxCodeSource,
    MessageFeed,
    QueuedMessages,
    SourceError,
    StaticCode,
};

pub use store::{
    CredentialStore,
    JsonFileStore,
    MemoryStore,
    StoreError,
};
