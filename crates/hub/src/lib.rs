//! U-WBP v2 hub: session, routing and resilience engine.
//!
//! ```bash
//! # Run with default configuration
//! hub
//!
//! # Specify a custom configuration file
//! hub --config production.toml
//!
//! # Override bind address and logging
//! hub --bind 0.0.0.0:9000 --log-level debug --json-logs
//! ```
//!
//! Configuration loads from a TOML file (default `hub.toml`); a default
//! file is created if none exists. Shuts down gracefully on SIGINT/SIGTERM
//! (Ctrl+C on Windows), running the service coordinator's reverse-order
//! stop sequence.

use tracing::error;

mod app;
mod cli;
mod config;
mod coordinator;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;

pub use config::{AppConfig, CacheSettings, DegradationSettings, LoggingSettings, ProtocolSettings, RetrySettings, SecuritySettings, ServerSettings};
pub use coordinator::{Component, Health, ServiceCoordinator};
pub use wbp_protocol::ShutdownState;

/// Entry point called from `#[tokio::main]` in `main.rs`.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config = AppConfig::load_from_file(&args.config_path).await.unwrap_or_default();

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("failed to set up logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }
}
