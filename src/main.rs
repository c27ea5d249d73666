mod config;
mod core;
mod error;
mod memory;
mod models;
mod policy;
mod providers;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::core::runtime::Runtime;

fn init_logging(log_file: &Path) -> Result<(), anyhow::Error> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let dotenv_result = dotenv();
    init_logging(&config::log_file())?;
    if let Err(e) = dotenv_result {
        warn!("Error loading .env file: {}", e);
    }

    let config = Config::from_env()?;
    info!("Data directory: {:?}", config.data_dir);

    Runtime::from_config(config).run().await
}
