//! The registration state machine.
//!
//! # Flow Overview
//!
//! 1. Ask the identity provider to email a sign-in code
//! 2. Wait for the code from a [`CodeSource`]
//! 3. Exchange email + code for identity tokens
//! 4. Activate the application account with the identity token
//! 5. Redeem the refresh token for an application token
//!
//! Each stage persists the record through the [`CredentialStore`] before the
//! next one starts. A pipeline built from a stored record starts from the
//! state its populated fields imply, so completed stages are never repeated.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use oobforge_core::{
//!     Endpoints, HttpOptions, KeyRotator, MemoryStore, PipelineConfig, PipelineContext,
//!     RegistrationPipeline, ResilientHttpClient, RunOutcome, StaticCode,
//! };
//!
//! let ctx = PipelineContext::new(
//!     Arc::new(ResilientHttpClient::new(&HttpOptions::default())?),
//!     Arc::new(KeyRotator::new(["api-key"])?),
//!     Endpoints::new("https://api.example.com/onboarding", "https://app.example.com/token"),
//!     PipelineConfig::new("https://app.example.com/login"),
//! );
//!
//! let mut pipeline = RegistrationPipeline::new(ctx, MemoryStore::new(), "a@b.com");
//! match pipeline.run(&StaticCode::new("code-from-email")).await {
//!     RunOutcome::Completed(record) => println!("done for {:?}", record.email),
//!     other => eprintln!("{}", other),
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::api::{
    self, ActivationRequest, AppTokenResponse, RejectionKind, SendOobCodeRequest,
    SendOobCodeResponse, SignInRequest, SignInResponse,
};
use crate::endpoints::Endpoints;
use crate::error::ConfigError;
use crate::http::{
    HttpRequest, HttpResponse, RequestOutcome, ResilientHttpClient, TransportError,
    TransportErrorKind,
};
use crate::keys::KeyRotator;
use crate::record::{CredentialRecord, Secret};
use crate::source::{CodeSource, SourceError};
use crate::store::{CredentialStore, StoreError};

/// How long an emailed sign-in code stays usable.
pub const CODE_VALIDITY_SECS: u64 = 600;

/// Default wait for a verification code, the provider's validity window.
pub const DEFAULT_CODE_WAIT_SECS: u64 = CODE_VALIDITY_SECS;

/// One network interaction in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    RequestCode,
    AwaitCode,
    ExchangeCode,
    Activate,
    IssueAppToken,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::RequestCode => "request-code",
            Stage::AwaitCode => "await-code",
            Stage::ExchangeCode => "exchange-code",
            Stage::Activate => "activate",
            Stage::IssueAppToken => "issue-app-token",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a pipeline stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    CodeRequested,
    CodeObtained,
    SignedIn,
    Activated,
    Completed,
    /// Absorbing failure state.
    Failed { stage: Stage, cause: String },
}

impl PipelineState {
    /// The state implied by a record's populated fields.
    ///
    /// A verification code is never persisted. A record whose code request
    /// is still inside the validity window maps to `CodeRequested`, so the
    /// emailed code can still be used; an older one maps to `Idle`.
    pub fn from_record(record: &CredentialRecord) -> Self {
        Self::from_record_at(record, Utc::now())
    }

    /// [`from_record`](Self::from_record) evaluated at `now`.
    pub fn from_record_at(record: &CredentialRecord, now: DateTime<Utc>) -> Self {
        if record.has_application_token() {
            PipelineState::Completed
        } else if record.is_activated() {
            PipelineState::Activated
        } else if record.is_signed_in() {
            PipelineState::SignedIn
        } else {
            match record.code_requested_at {
                Some(at) if (now - at).num_seconds() < CODE_VALIDITY_SECS as i64 => {
                    PipelineState::CodeRequested
                }
                _ => PipelineState::Idle,
            }
        }
    }

    /// The stage that runs from this state, if any.
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Idle => Some(Stage::RequestCode),
            PipelineState::CodeRequested => Some(Stage::AwaitCode),
            PipelineState::CodeObtained => Some(Stage::ExchangeCode),
            PipelineState::SignedIn => Some(Stage::Activate),
            PipelineState::Activated => Some(Stage::IssueAppToken),
            PipelineState::Completed | PipelineState::Failed { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::CodeRequested => "CodeRequested",
            PipelineState::CodeObtained => "CodeObtained",
            PipelineState::SignedIn => "SignedIn",
            PipelineState::Activated => "Activated",
            PipelineState::Completed => "Completed",
            PipelineState::Failed { .. } => "Failed",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Failed { stage, cause } => write!(f, "Failed({}, {})", stage, cause),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// What the operator must do after a recoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Request a new code; the old one is dead.
    ResendCode,
    /// Enter the code again; the one given was wrong.
    ReenterCode,
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryAction::ResendCode => write!(f, "request a new verification code"),
            RecoveryAction::ReenterCode => write!(f, "re-enter the verification code"),
        }
    }
}

/// Error type for pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An endpoint could not be built from configuration.
    #[error("{stage}: configuration error: {source}")]
    Config { stage: Stage, source: ConfigError },

    /// Connection-level failure on every route.
    #[error("{stage}: network failure: {source}")]
    TransientNetwork { stage: Stage, source: TransportError },

    /// The request could not be built or sent on any route.
    #[error("{stage}: request could not be sent: {source}")]
    RequestFailed { stage: Stage, source: TransportError },

    /// An upstream API answered with an error.
    #[error(
        "{stage}: HTTP {status}, {kind} ({})",
        .code.as_deref().unwrap_or("no error code")
    )]
    ProviderRejected {
        stage: Stage,
        status: u16,
        code: Option<String>,
        kind: RejectionKind,
    },

    /// The email body held no usable code.
    #[error("no verification code found in email body; request a new email")]
    ExtractionFailed,

    /// The code source failed.
    #[error("verification code unavailable: {0}")]
    CodeUnavailable(SourceError),

    /// No code arrived within the validity window.
    #[error("no verification code arrived within {}s", .waited.as_secs())]
    CodeTimeout { waited: Duration },

    /// A success response lacked required fields.
    #[error("{stage}: malformed response: {message}")]
    MalformedResponse { stage: Stage, message: String },

    /// The record could not be updated or persisted.
    #[error("{stage}: failed to persist record: {source}")]
    Store { stage: Stage, source: StoreError },

    /// A stage was invoked from the wrong state.
    #[error("{stage}: cannot run from state {state}")]
    InvalidTransition { stage: Stage, state: String },

    /// The record lacks a field this stage needs.
    #[error("{stage}: missing {field}")]
    MissingField { stage: Stage, field: &'static str },

    /// The pipeline failed earlier and cannot continue.
    #[error("{stage}: pipeline already failed: {cause}")]
    AlreadyFailed { stage: Stage, cause: String },
}

impl PipelineError {
    /// The stage the error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Config { stage, .. }
            | PipelineError::TransientNetwork { stage, .. }
            | PipelineError::RequestFailed { stage, .. }
            | PipelineError::ProviderRejected { stage, .. }
            | PipelineError::MalformedResponse { stage, .. }
            | PipelineError::Store { stage, .. }
            | PipelineError::InvalidTransition { stage, .. }
            | PipelineError::MissingField { stage, .. }
            | PipelineError::AlreadyFailed { stage, .. } => *stage,
            PipelineError::ExtractionFailed
            | PipelineError::CodeUnavailable(_)
            | PipelineError::CodeTimeout { .. } => Stage::AwaitCode,
        }
    }

    /// Where to restart, for failures that are not fatal.
    ///
    /// Only the code exchange and the code wait have recoverable failures:
    /// an expired code needs a resend, an invalid one needs re-entry, and a
    /// wait that outlived the validity window starts over from `Idle`.
    pub fn recovery(&self) -> Option<(PipelineState, RecoveryAction)> {
        match self {
            PipelineError::ProviderRejected {
                stage: Stage::ExchangeCode,
                kind: RejectionKind::Expired,
                ..
            } => Some((PipelineState::CodeRequested, RecoveryAction::ResendCode)),
            PipelineError::ProviderRejected {
                stage: Stage::ExchangeCode,
                kind: RejectionKind::Invalid,
                ..
            } => Some((PipelineState::CodeRequested, RecoveryAction::ReenterCode)),
            PipelineError::CodeTimeout { .. } => {
                Some((PipelineState::Idle, RecoveryAction::ResendCode))
            }
            _ => None,
        }
    }
}

/// Result of [`RegistrationPipeline::run`].
#[derive(Debug)]
pub enum RunOutcome {
    /// Every stage finished.
    Completed(CredentialRecord),

    /// The account is activated but no application token was issued; it can
    /// be retried later with the stored refresh token.
    PartialSuccess {
        record: CredentialRecord,
        error: PipelineError,
    },

    /// Not fatal: restart from `restart_from` after taking `action`.
    RestartRequired {
        restart_from: PipelineState,
        action: RecoveryAction,
        error: PipelineError,
    },

    /// Fatal for this run.
    Failed { stage: Stage, error: PipelineError },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed(_) => write!(f, "registration completed"),
            RunOutcome::PartialSuccess { error, .. } => write!(
                f,
                "account activated, application token not issued ({}); retry later with the stored refresh token",
                error
            ),
            RunOutcome::RestartRequired {
                restart_from,
                action,
                error,
            } => write!(
                f,
                "restart required from {}: {} ({})",
                restart_from, action, error
            ),
            RunOutcome::Failed { stage, error } => write!(f, "failed at {}: {}", stage, error),
        }
    }
}

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Where the emailed link sends the user after sign-in.
    pub continue_url: String,

    /// Bound on the code wait; `None` waits forever.
    pub code_wait_timeout: Option<Duration>,
}

impl PipelineConfig {
    pub fn new(continue_url: impl Into<String>) -> Self {
        Self {
            continue_url: continue_url.into(),
            code_wait_timeout: Some(Duration::from_secs(DEFAULT_CODE_WAIT_SECS)),
        }
    }

    pub fn with_code_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.code_wait_timeout = timeout;
        self
    }
}

/// Collaborators shared by pipelines.
///
/// Cloning is cheap; the client and key pool are reference counted so
/// pipelines for different accounts can run side by side.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub http: Arc<ResilientHttpClient>,
    pub keys: Arc<KeyRotator>,
    pub endpoints: Endpoints,
    pub config: PipelineConfig,
}

impl PipelineContext {
    pub fn new(
        http: Arc<ResilientHttpClient>,
        keys: Arc<KeyRotator>,
        endpoints: Endpoints,
        config: PipelineConfig,
    ) -> Self {
        Self {
            http,
            keys,
            endpoints,
            config,
        }
    }
}

/// Drives one account through the five stages.
pub struct RegistrationPipeline<S> {
    ctx: PipelineContext,
    store: S,
    record: CredentialRecord,
    state: PipelineState,
    code: Option<Secret>,
}

impl<S: CredentialStore> RegistrationPipeline<S> {
    /// Start a fresh run for `email`.
    ///
    /// Nothing is written until the first stage succeeds.
    pub fn new(ctx: PipelineContext, store: S, email: impl Into<String>) -> Self {
        Self::from_record(ctx, store, CredentialRecord::new(email))
    }

    /// Continue from an existing record.
    pub fn from_record(ctx: PipelineContext, store: S, record: CredentialRecord) -> Self {
        let state = PipelineState::from_record(&record);
        Self {
            ctx,
            store,
            record,
            state,
            code: None,
        }
    }

    /// Continue from whatever `store` holds.
    ///
    /// Returns `Ok(None)` if the store is empty.
    pub async fn resume(ctx: PipelineContext, store: S) -> Result<Option<Self>, StoreError> {
        let Some(record) = store.load().await? else {
            return Ok(None);
        };

        let pipeline = Self::from_record(ctx, store, record);
        tracing::info!(state = %pipeline.state, "resuming from stored record");
        Ok(Some(pipeline))
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn record(&self) -> &CredentialRecord {
        &self.record
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn email(&self) -> Option<&str> {
        self.record.email.as_deref()
    }

    /// Run every remaining stage, taking the code from `source` when needed.
    pub async fn run(&mut self, source: &dyn CodeSource) -> RunOutcome {
        loop {
            let step = match self.state.clone() {
                PipelineState::Idle => self.request_code().await,
                PipelineState::CodeRequested => self.obtain_code(source).await,
                PipelineState::CodeObtained => self.sign_in().await,
                PipelineState::SignedIn => self.activate().await,
                PipelineState::Activated => self.issue_app_token().await,
                PipelineState::Completed => return RunOutcome::Completed(self.record.clone()),
                PipelineState::Failed { stage, cause } => {
                    return RunOutcome::Failed {
                        stage,
                        error: PipelineError::AlreadyFailed { stage, cause },
                    };
                }
            };

            if let Err(error) = step {
                return self.outcome(error);
            }
        }
    }

    fn outcome(&self, error: PipelineError) -> RunOutcome {
        if error.stage() == Stage::IssueAppToken && self.record.is_activated() {
            tracing::warn!(error = %error, "account activated but application token not issued");
            return RunOutcome::PartialSuccess {
                record: self.record.clone(),
                error,
            };
        }

        if let Some((restart_from, action)) = error.recovery() {
            tracing::warn!(error = %error, restart_from = %restart_from, "restart required");
            return RunOutcome::RestartRequired {
                restart_from,
                action,
                error,
            };
        }

        tracing::error!(stage = %error.stage(), error = %error, "registration failed");
        RunOutcome::Failed {
            stage: error.stage(),
            error,
        }
    }

    /// `Idle → CodeRequested`: ask the provider to email a sign-in code.
    ///
    /// Also valid from `CodeRequested`/`CodeObtained` to resend; any code
    /// held in memory is discarded.
    pub async fn request_code(&mut self) -> Result<(), PipelineError> {
        self.expect_state(
            Stage::RequestCode,
            &[
                PipelineState::Idle,
                PipelineState::CodeRequested,
                PipelineState::CodeObtained,
            ],
        )?;
        let result = self.send_code_email().await;
        self.settle(result)
    }

    /// `CodeRequested → CodeObtained`: wait for the code from `source`.
    pub async fn obtain_code(&mut self, source: &dyn CodeSource) -> Result<(), PipelineError> {
        self.expect_state(Stage::AwaitCode, &[PipelineState::CodeRequested])?;
        let result = self.wait_for_code(source).await;
        self.settle(result)
    }

    /// `CodeRequested → CodeObtained` with a code already in hand.
    pub fn supply_code(&mut self, code: impl Into<String>) -> Result<(), PipelineError> {
        self.expect_state(Stage::AwaitCode, &[PipelineState::CodeRequested])?;
        let result = self.accept_code(code.into());
        self.settle(result)
    }

    /// `CodeObtained → SignedIn`: exchange email and code for tokens.
    pub async fn sign_in(&mut self) -> Result<(), PipelineError> {
        self.expect_state(Stage::ExchangeCode, &[PipelineState::CodeObtained])?;
        let result = self.exchange_code().await;
        self.settle(result)
    }

    /// `SignedIn → Activated`: activate the application account.
    pub async fn activate(&mut self) -> Result<(), PipelineError> {
        self.expect_state(Stage::Activate, &[PipelineState::SignedIn])?;
        let result = self.activate_account().await;
        self.settle(result)
    }

    /// `Activated → Completed`: redeem the refresh token.
    pub async fn issue_app_token(&mut self) -> Result<(), PipelineError> {
        self.expect_state(Stage::IssueAppToken, &[PipelineState::Activated])?;
        let result = self.redeem_refresh_token().await;
        self.settle(result)
    }

    async fn send_code_email(&mut self) -> Result<PipelineState, PipelineError> {
        let stage = Stage::RequestCode;
        let email = self.require_email(stage)?;

        let url = self
            .ctx
            .endpoints
            .send_oob_code_url(self.ctx.keys.next_key())
            .map_err(|source| PipelineError::Config { stage, source })?;

        let body = SendOobCodeRequest::email_sign_in(&email, &self.ctx.config.continue_url);
        let request = HttpRequest::post(url)
            .json(&body)
            .map_err(|e| encode_error(stage, e))?;

        let response = self.dispatch(stage, &request).await?;
        if response.status != 200 {
            return Err(rejected(stage, &response));
        }

        let echoed = response
            .json::<SendOobCodeResponse>()
            .unwrap_or_default()
            .email;
        tracing::info!(email = %echoed.as_deref().unwrap_or(&email), "sign-in email sent");

        self.code = None;
        self.record
            .mark_code_requested()
            .map_err(|e| PipelineError::Store {
                stage,
                source: StoreError::Invalid(e),
            })?;
        self.persist(stage).await?;
        Ok(PipelineState::CodeRequested)
    }

    async fn wait_for_code(
        &mut self,
        source: &dyn CodeSource,
    ) -> Result<PipelineState, PipelineError> {
        let email = self.require_email(Stage::AwaitCode)?;
        tracing::info!("waiting for verification code");

        let wait = source.next_code(&email);
        let received = match self.ctx.config.code_wait_timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(received) => received,
                Err(_) => {
                    self.forget_code_request(Stage::AwaitCode).await;
                    return Err(PipelineError::CodeTimeout { waited: limit });
                }
            },
            None => wait.await,
        };

        let code = received.map_err(|e| match e {
            SourceError::NoCode => PipelineError::ExtractionFailed,
            other => PipelineError::CodeUnavailable(other),
        })?;

        self.accept_code(code)
    }

    fn accept_code(&mut self, code: String) -> Result<PipelineState, PipelineError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(PipelineError::CodeUnavailable(SourceError::Empty));
        }
        self.code = Some(Secret::new(code));
        Ok(PipelineState::CodeObtained)
    }

    async fn exchange_code(&mut self) -> Result<PipelineState, PipelineError> {
        let stage = Stage::ExchangeCode;
        let email = self.require_email(stage)?;
        let code = self.code.take().ok_or(PipelineError::MissingField {
            stage,
            field: "oobCode",
        })?;

        let url = self
            .ctx
            .endpoints
            .sign_in_url(self.ctx.keys.next_key())
            .map_err(|source| PipelineError::Config { stage, source })?;

        let body = SignInRequest {
            email: &email,
            oob_code: code.expose(),
        };
        let request = HttpRequest::post(url)
            .json(&body)
            .map_err(|e| encode_error(stage, e))?;

        let response = self.dispatch(stage, &request).await?;
        if response.status != 200 {
            let error = rejected(stage, &response);
            if matches!(
                error,
                PipelineError::ProviderRejected {
                    kind: RejectionKind::Expired,
                    ..
                }
            ) {
                self.forget_code_request(stage).await;
            }
            return Err(error);
        }

        let tokens: SignInResponse = response
            .json()
            .map_err(|e| PipelineError::MalformedResponse {
                stage,
                message: e.to_string(),
            })?;

        if let Some(returned) = tokens.email.as_deref() {
            if !returned.eq_ignore_ascii_case(&email) {
                tracing::warn!(expected = %email, returned = %returned, "provider signed in a different email");
            }
        }

        self.record
            .mark_signed_in(
                tokens.local_id,
                tokens.id_token,
                tokens.refresh_token,
                tokens.expires_in,
            )
            .map_err(|e| PipelineError::Store {
                stage,
                source: StoreError::Invalid(e),
            })?;

        tracing::info!(local_id = ?self.record.local_id, "signed in");
        self.persist(stage).await?;
        Ok(PipelineState::SignedIn)
    }

    async fn activate_account(&mut self) -> Result<PipelineState, PipelineError> {
        let stage = Stage::Activate;
        let id_token = self.record.id_token.clone().ok_or(PipelineError::MissingField {
            stage,
            field: "idToken",
        })?;
        self.warn_if_id_token_stale();

        let url = self
            .ctx
            .endpoints
            .activation_url()
            .map_err(|source| PipelineError::Config { stage, source })?;

        let request = HttpRequest::post(url)
            .bearer(id_token.expose())
            .json(&ActivationRequest::accept_all())
            .map_err(|e| encode_error(stage, e))?;

        let response = self.dispatch(stage, &request).await?;
        match response.status {
            200 => tracing::info!("account activated"),
            409 => tracing::info!("account was already activated"),
            _ => return Err(rejected(stage, &response)),
        }

        self.record
            .mark_activated()
            .map_err(|e| PipelineError::Store {
                stage,
                source: StoreError::Invalid(e),
            })?;
        self.persist(stage).await?;
        Ok(PipelineState::Activated)
    }

    async fn redeem_refresh_token(&mut self) -> Result<PipelineState, PipelineError> {
        let stage = Stage::IssueAppToken;
        let refresh_token = self
            .record
            .refresh_token
            .clone()
            .ok_or(PipelineError::MissingField {
                stage,
                field: "refreshToken",
            })?;

        let url = self
            .ctx
            .endpoints
            .token_url(self.ctx.keys.next_key())
            .map_err(|source| PipelineError::Config { stage, source })?;

        let mut request = HttpRequest::post(url).form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose()),
        ]);
        for (name, value) in &self.ctx.endpoints.token_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = self.dispatch(stage, &request).await?;
        if response.status != 200 {
            return Err(rejected(stage, &response));
        }

        let token: AppTokenResponse =
            response
                .json()
                .map_err(|e| PipelineError::MalformedResponse {
                    stage,
                    message: e.to_string(),
                })?;

        self.record
            .set_application_token(token.into())
            .map_err(|e| PipelineError::Store {
                stage,
                source: StoreError::Invalid(e),
            })?;

        tracing::info!(expires_in = ?self.record.application_token_expiry, "application token issued");
        self.persist(stage).await?;
        Ok(PipelineState::Completed)
    }

    async fn dispatch(
        &self,
        stage: Stage,
        request: &HttpRequest,
    ) -> Result<HttpResponse, PipelineError> {
        match self.ctx.http.send(request).await {
            RequestOutcome::Success(response) => {
                tracing::debug!(%stage, status = response.status, route = %response.route, "stage response");
                Ok(response)
            }
            RequestOutcome::TransientFailure(source) => {
                Err(PipelineError::TransientNetwork { stage, source })
            }
            RequestOutcome::PermanentFailure(source) => {
                Err(PipelineError::RequestFailed { stage, source })
            }
        }
    }

    async fn persist(&self, stage: Stage) -> Result<(), PipelineError> {
        self.store
            .save(&self.record)
            .await
            .map_err(|source| PipelineError::Store { stage, source })
    }

    /// Drop the stored code request once its code is known to be dead, so a
    /// later resume sends a new email.
    async fn forget_code_request(&mut self, stage: Stage) {
        if !self.record.is_code_requested() {
            return;
        }
        self.record.clear_code_request();
        if let Err(error) = self.persist(stage).await {
            tracing::warn!(%stage, error = %error, "failed to clear stored code request");
        }
    }

    fn settle(&mut self, result: Result<PipelineState, PipelineError>) -> Result<(), PipelineError> {
        match result {
            Ok(next) => {
                tracing::info!(from = %self.state, to = %next, "stage complete");
                self.state = next;
                Ok(())
            }
            Err(error) => {
                self.state = match error.recovery() {
                    Some((restart_from, _)) => restart_from,
                    None => PipelineState::Failed {
                        stage: error.stage(),
                        cause: error.to_string(),
                    },
                };
                Err(error)
            }
        }
    }

    fn expect_state(&self, stage: Stage, allowed: &[PipelineState]) -> Result<(), PipelineError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PipelineError::InvalidTransition {
                stage,
                state: self.state.to_string(),
            })
        }
    }

    fn require_email(&self, stage: Stage) -> Result<String, PipelineError> {
        self.record
            .email
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or(PipelineError::MissingField {
                stage,
                field: "email",
            })
    }

    fn warn_if_id_token_stale(&self) {
        let (Some(signed_in_at), Some(lifetime)) =
            (self.record.signed_in_at, self.record.token_expiry)
        else {
            return;
        };

        let age = Utc::now() - signed_in_at;
        if age.num_seconds() > lifetime as i64 {
            tracing::warn!(
                age_secs = age.num_seconds(),
                lifetime_secs = lifetime,
                "identity token has probably expired; activation may be rejected"
            );
        }
    }
}

impl<S> std::fmt::Debug for RegistrationPipeline<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationPipeline")
            .field("state", &self.state)
            .field("email", &self.record.email)
            .field("has_code", &self.code.is_some())
            .finish()
    }
}

fn rejected(stage: Stage, response: &HttpResponse) -> PipelineError {
    let code = api::provider_error_code(&response.body);
    let kind = code
        .as_deref()
        .map(RejectionKind::classify)
        .unwrap_or(RejectionKind::Other);

    tracing::warn!(
        %stage,
        status = response.status,
        code = code.as_deref().unwrap_or("-"),
        "provider rejected request"
    );

    PipelineError::ProviderRejected {
        stage,
        status: response.status,
        code,
        kind,
    }
}

fn encode_error(stage: Stage, err: serde_json::Error) -> PipelineError {
    PipelineError::RequestFailed {
        stage,
        source: TransportError::new(TransportErrorKind::Build, err.to_string()),
    }
}
