//! echo-verify: WebSocket echo sequence verification
//!
//! Two modes:
//! - `verify`: connect to a WebSocket server, send each configured message,
//!   require it to be echoed back in order, then require the server to
//!   close the connection, all within a single deadline
//! - `serve`: run the matching echo server
//!
//! Features:
//! - Exactly one pass/fail outcome per run
//! - Optional layout-test style transcript on stdout
//! - Configuration via CLI arguments or TOML file

mod client;
mod config;
mod error;
mod report;
mod server;
mod step;
mod verifier;

use config::{Config, Mode, ServeConfig, VerifyConfig};
use report::{LogReporter, Tee, Transcript};
use server::BoxError;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode, BoxError> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.mode {
        Mode::Verify(verify) => run_verify(verify),
        Mode::Serve(serve) => run_serve(serve),
    }
}

/// Run one verification on a single-threaded runtime
fn run_verify(config: VerifyConfig) -> Result<ExitCode, BoxError> {
    info!(
        url = %config.url,
        steps = config.steps.len(),
        deadline_ms = config.deadline.as_millis() as u64,
        "Starting echo verification"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let reporter = Tee(LogReporter::new(&config.url), Transcript::default());
    let (outcome, Tee(_, transcript)) = runtime.block_on(client::verify(&config, reporter))?;

    if config.transcript {
        print!("{}", transcript.render());
    }

    Ok(if outcome.is_pass() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Run the echo server on the multi-threaded runtime
fn run_serve(config: ServeConfig) -> Result<ExitCode, BoxError> {
    info!(
        listen = %config.listen,
        close_after = ?config.close_after,
        max_connections = config.max_connections,
        "Starting echo server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(server::serve(config))?;
    Ok(ExitCode::SUCCESS)
}
