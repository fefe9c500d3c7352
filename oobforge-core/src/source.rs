//! Pluggable sources for the verification code.
//!
//! The pipeline suspends between requesting a code and exchanging it. What
//! it waits on is a [`CodeSource`]: an operator typing the code, a fixed code
//! handed in by a script, or a [`MailboxCodeSource`] running the
//! [`LinkExtractor`] over bodies pulled from a [`MessageFeed`].
//!
//! Mailbox protocols are not implemented here. A feed only has to hand over
//! raw message bodies, with whatever polling and backoff it likes.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::extract::LinkExtractor;

/// Error type for code sources.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No message or input is available.
    #[error("no verification email available: {message}")]
    Unavailable { message: String },

    /// A message was available but held no usable code.
    #[error("no verification code found in email body")]
    NoCode,

    /// The operator entered nothing.
    #[error("empty verification code")]
    Empty,

    /// Input ended before a code arrived.
    #[error("input closed before a code was entered")]
    Closed,

    /// I/O error reading input.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability to obtain the next verification code.
#[async_trait]
pub trait CodeSource: Send + Sync {
    /// Wait for the code sent to `email`.
    ///
    /// May wait indefinitely; the pipeline bounds the wait and dropping the
    /// future abandons it.
    async fn next_code(&self, email: &str) -> Result<String, SourceError>;
}

/// Capability to obtain raw email bodies.
#[async_trait]
pub trait MessageFeed: Send + Sync {
    /// The next candidate message body, or `None` if there is none.
    async fn next_body(&self) -> Result<Option<String>, SourceError>;
}

/// A code known up front.
#[derive(Clone)]
pub struct StaticCode(String);

impl StaticCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }
}

impl std::fmt::Debug for StaticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StaticCode([REDACTED])")
    }
}

#[async_trait]
impl CodeSource for StaticCode {
    async fn next_code(&self, _email: &str) -> Result<String, SourceError> {
        let code = self.0.trim();
        if code.is_empty() {
            return Err(SourceError::Empty);
        }
        Ok(code.to_string())
    }
}

/// Extracts the code from bodies supplied by a [`MessageFeed`].
///
/// Each call consumes one body. A body without a code is an error rather
/// than a reason to read further: the code is single-use, so a body without
/// one means the wrong email was fetched.
pub struct MailboxCodeSource<F> {
    feed: F,
    extractor: LinkExtractor,
}

impl<F: MessageFeed> MailboxCodeSource<F> {
    pub fn new(feed: F, extractor: LinkExtractor) -> Self {
        Self { feed, extractor }
    }
}

#[async_trait]
impl<F: MessageFeed> CodeSource for MailboxCodeSource<F> {
    async fn next_code(&self, email: &str) -> Result<String, SourceError> {
        let body = self
            .feed
            .next_body()
            .await?
            .ok_or_else(|| SourceError::Unavailable {
                message: format!("no message for {}", email),
            })?;

        let link = self.extractor.extract(&body).ok_or(SourceError::NoCode)?;
        tracing::info!(strategy = %link.strategy, "verification code extracted from email");
        Ok(link.code)
    }
}

/// A feed backed by an in-memory queue of bodies.
#[derive(Debug, Default)]
pub struct QueuedMessages {
    bodies: Mutex<VecDeque<String>>,
}

impl QueuedMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a body for delivery.
    pub fn push(&self, body: impl Into<String>) {
        self.bodies.lock().push_back(body.into());
    }
}

#[async_trait]
impl MessageFeed for QueuedMessages {
    async fn next_body(&self) -> Result<Option<String>, SourceError> {
        Ok(self.bodies.lock().pop_front())
    }
}
