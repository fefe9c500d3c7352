//! Oobforge CLI
//!
//! Command-line interface for email-link account registration.
//!
//! # Usage
//!
//! ```bash
//! # Register an account, pasting the emailed link when prompted
//! oobforge register someone@example.com
//!
//! # Register using a saved copy of the sign-in email
//! oobforge register someone@example.com --body-file mail.html
//!
//! # Continue an interrupted run
//! oobforge resume
//!
//! # Show what has been stored so far
//! oobforge status --format json
//! ```

mod config;
mod input;
mod report;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use oobforge_core::{
    CredentialStore, JsonFileStore, LinkExtractor, PipelineError, PipelineState, RecoveryAction,
    RegistrationPipeline, RunOutcome,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::input::CodeInput;
use crate::report::StatusReport;

/// Attempts at the code stages before giving up in interactive mode.
const MAX_CODE_ATTEMPTS: usize = 3;

/// Exit status when the account is usable but has no application token.
const EXIT_PARTIAL: u8 = 2;

/// Exit status when the run must be restarted by the operator.
const EXIT_RESTART: u8 = 3;

/// Exit status after Ctrl+C.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "oobforge")]
#[command(about = "Register accounts through email-link sign-in")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new account from scratch
    Register {
        /// Email address to register
        email: String,

        /// Saved sign-in email to extract the code from
        #[arg(short, long)]
        body_file: Option<PathBuf>,

        /// Verification code, if already known
        #[arg(long)]
        code: Option<String>,
    },

    /// Continue from the stored record
    Resume {
        /// Saved sign-in email to extract the code from
        #[arg(short, long)]
        body_file: Option<PathBuf>,

        /// Verification code, if already known
        #[arg(long)]
        code: Option<String>,
    },

    /// Extract the verification code from a saved email
    Extract {
        /// Path to the raw email body
        path: PathBuf,
    },

    /// Show the stored record and inferred state
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete the stored record
    Reset {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    init_logging(&config.log_level, cli.verbose);

    match cli.command {
        Commands::Register {
            email,
            body_file,
            code,
        } => register(&config, &email, code, body_file).await,
        Commands::Resume { body_file, code } => resume(&config, code, body_file).await,
        Commands::Extract { path } => extract(&config, &path).await,
        Commands::Status { format } => status(&config, &format).await,
        Commands::Reset { force } => reset(&config, force).await,
    }
}

fn init_logging(level: &str, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { level }));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn code_input(
    config: &AppConfig,
    code: Option<String>,
    body_file: Option<PathBuf>,
) -> Result<CodeInput> {
    let extractor = LinkExtractor::new(&config.extractor_config())?;
    Ok(CodeInput::from_flags(code, body_file, extractor))
}

async fn register(
    config: &AppConfig,
    email: &str,
    code: Option<String>,
    body_file: Option<PathBuf>,
) -> Result<ExitCode> {
    let ctx = config.pipeline_context()?;
    let input = code_input(config, code, body_file)?;
    let store = JsonFileStore::new(config.record_path()?);

    if let Some(existing) = store.load().await? {
        warn!(
            email = existing.email.as_deref().unwrap_or("-"),
            state = %PipelineState::from_record(&existing),
            "replacing stored record at {:?}",
            store.path()
        );
    }

    info!(%email, "starting registration");
    let pipeline = RegistrationPipeline::new(ctx, store, email);
    drive(pipeline, &input).await
}

async fn resume(
    config: &AppConfig,
    code: Option<String>,
    body_file: Option<PathBuf>,
) -> Result<ExitCode> {
    let ctx = config.pipeline_context()?;
    let input = code_input(config, code, body_file)?;
    let store = JsonFileStore::new(config.record_path()?);
    let path = store.path().to_path_buf();

    let Some(pipeline) = RegistrationPipeline::resume(ctx, store).await? else {
        bail!(
            "No stored record at {:?}; run `oobforge register <email>` first",
            path
        );
    };

    drive(pipeline, &input).await
}

/// Run to an outcome, re-prompting for recoverable code errors when the
/// operator is at the console.
async fn drive(
    mut pipeline: RegistrationPipeline<JsonFileStore>,
    input: &CodeInput,
) -> Result<ExitCode> {
    let mut attempts = 0;

    loop {
        attempts += 1;

        let outcome = tokio::select! {
            outcome = pipeline.run(input.source()) => outcome,
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted; completed stages are saved, use `oobforge resume`");
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            }
        };

        if let RunOutcome::RestartRequired { action, error, .. } = &outcome {
            if input.is_interactive() && attempts < MAX_CODE_ATTEMPTS {
                eprintln!("{}", error);
                if *action == RecoveryAction::ResendCode
                    && pipeline.state() == &PipelineState::CodeRequested
                {
                    let resent = tokio::select! {
                        resent = pipeline.request_code() => resent,
                        _ = tokio::signal::ctrl_c() => {
                            warn!("interrupted; completed stages are saved, use `oobforge resume`");
                            return Ok(ExitCode::from(EXIT_INTERRUPTED));
                        }
                    };
                    if let Err(error) = resent {
                        return Ok(report_outcome(&resend_failed(error), pipeline.store()));
                    }
                }
                continue;
            }
        }

        return Ok(report_outcome(&outcome, pipeline.store()));
    }
}

/// A failed resend ends the run like any other stage failure.
fn resend_failed(error: PipelineError) -> RunOutcome {
    RunOutcome::Failed {
        stage: error.stage(),
        error,
    }
}

fn report_outcome(outcome: &RunOutcome, store: &JsonFileStore) -> ExitCode {
    match outcome {
        RunOutcome::Completed(record) => {
            println!(
                "Registration complete for {}",
                record.email.as_deref().unwrap_or("-")
            );
            println!("Credentials saved to {}", store.path().display());
            ExitCode::SUCCESS
        }
        RunOutcome::PartialSuccess { .. } => {
            eprintln!("{}", outcome);
            eprintln!("Run `oobforge resume` to retry the token exchange.");
            ExitCode::from(EXIT_PARTIAL)
        }
        RunOutcome::RestartRequired { action, .. } => {
            eprintln!("{}", outcome);
            match action {
                RecoveryAction::ResendCode => {
                    eprintln!("Run `oobforge resume` to send a new sign-in email.")
                }
                RecoveryAction::ReenterCode => {
                    eprintln!("Run `oobforge resume` and enter the code exactly as emailed.")
                }
            }
            ExitCode::from(EXIT_RESTART)
        }
        RunOutcome::Failed { .. } => {
            eprintln!("{}", outcome);
            ExitCode::FAILURE
        }
    }
}

async fn extract(config: &AppConfig, path: &Path) -> Result<ExitCode> {
    let body = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read email body from {:?}", path))?;

    let extractor = LinkExtractor::new(&config.extractor_config())?;
    match extractor.extract(&body) {
        Some(link) => {
            println!("Strategy: {}", link.strategy);
            println!("Code:     {}", link.code);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("No verification link found in {:?}", path);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn status(config: &AppConfig, format: &str) -> Result<ExitCode> {
    let store = JsonFileStore::new(config.record_path()?);
    let record = store.load().await?;
    let report = StatusReport::new(store.path(), record.as_ref(), chrono::Utc::now());

    match format {
        "json" => println!("{}", report.to_json()?),
        _ => print!("{}", report.to_text()),
    }
    Ok(ExitCode::SUCCESS)
}

async fn reset(config: &AppConfig, force: bool) -> Result<ExitCode> {
    let store = JsonFileStore::new(config.record_path()?);

    if !store.path().exists() {
        println!("Nothing to reset at {}", store.path().display());
        return Ok(ExitCode::SUCCESS);
    }

    if !force {
        eprint!("Delete stored record at {}? [y/N] ", store.path().display());
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let answer = lines.next_line().await?.unwrap_or_default();
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted");
            return Ok(ExitCode::SUCCESS);
        }
    }

    store.clear().await?;
    println!("Removed {}", store.path().display());
    Ok(ExitCode::SUCCESS)
}
