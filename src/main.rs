use clap::Parser;
use openapi_extractor::cli::{commands, Cli};
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting openapi-extractor v{}", openapi_extractor::VERSION);

    match commands::execute(cli).await {
        Ok(outcome) => {
            if let Some(e) = &outcome.primary_error {
                error!("Failed to extract OpenAPI: {}", e);
            }
            process::exit(outcome.exit_code());
        }
        Err(e) => {
            error!("Failed to extract OpenAPI: {:#}", e);
            process::exit(1);
        }
    }
}
