//! Recipe Proxy - caching proxy for the recipe API
//!
//! Keeps the API key on the server and caches upstream responses.

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error, info};

use recipe_proxy::{
    cli::{Cli, Command},
    config::Config,
    gateway::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    // .env must be loaded before clap reads PORT and friends
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match dotenv {
        Ok(path) => info!("Loaded env file: {}", path.display()),
        Err(e) => debug!("No .env file loaded: {e}"),
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Config) => print_config(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Print the effective configuration (API key redacted)
fn print_config(config: &Config) -> ExitCode {
    match serde_yaml::to_string(config) {
        Ok(yaml) => {
            print!("{yaml}");
            match config.upstream.require_api_key() {
                Ok(_) => println!("# API key: present"),
                Err(e) => println!("# API key: MISSING ({e})"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to serialize configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the proxy server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting recipe proxy"
    );

    let server = match Server::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("FATAL: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Recipe proxy shutdown complete");
    ExitCode::SUCCESS
}
