use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use tagwise::infrastructure::config::AppConfig;
use tagwise::interfaces::cli;
use tagwise::interfaces::cli::commands::Cli;

#[actix_web::main]
async fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Bad configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    match cli::dispatch(config, cli.command).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            std::process::ExitCode::FAILURE
        }
    }
}
