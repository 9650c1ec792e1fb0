//! Administrative CLI for an Airlock deployment.
//!
//! Works directly against the service's store; intended for operators
//! inside the enclave, not for researchers or reviewers.

mod cli;

use std::process::ExitCode;

use clap::Parser;

use cli::{Cli, run};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.kind().exit_code() as u8)
        }
    }
}
