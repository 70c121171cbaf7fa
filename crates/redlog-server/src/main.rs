//! Main entry point for the Redlog operator CLI.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use redlog_core::TracingAuditSink;
use redlog_server::{
    command::{self, Cli},
    model::Configuration,
    startup::{self, Services},
};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let configuration = Configuration::load(&cli.config, &cli.overrides())?;

    let _logging_guard = startup::init_logging(&configuration.logging_config())?;

    let persistence = startup::open_persistence(&configuration).await?;
    info!(mode = %persistence.storage_mode(), "Storage ready");

    let services = Services::new(
        persistence,
        configuration.ingest_config()?,
        Arc::new(TracingAuditSink),
    );

    match command::execute(&services, cli.command).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = ?e, "Command failed");
            println!("{}", serde_json::to_string_pretty(&command::error_body(&e))?);
            Ok(ExitCode::FAILURE)
        }
    }
}
