use std::sync::Arc;

use tracing::{error, info};

use filevault::{start_reapers, Config, Vault};

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {CONFIG_PATH}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    // Initialize logging
    if let Err(e) = filevault::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        filevault::logging::init_console_only(&config.logging.level);
    }

    info!("filevault - personal file storage core");

    let vault = match Vault::open(config).await {
        Ok(vault) => Arc::new(vault),
        Err(e) => {
            error!(error = %e, "failed to open vault");
            std::process::exit(1);
        }
    };

    let (uploads, recycle_bin) = start_reapers(Arc::clone(&vault));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");
    uploads.abort();
    recycle_bin.abort();
}
