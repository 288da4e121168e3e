//! Showtime Bot - Main entry point.

use anyhow::Result;
use showtime_bot::start_service;
use showtime_common::config::Config;
use showtime_common::logging::init_logging_with_exclusions;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration, environment wins over the file
    let config = Config::load_with_env()?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Showtime Bot v{}", env!("CARGO_PKG_VERSION"));

    start_service(&config).await
}
