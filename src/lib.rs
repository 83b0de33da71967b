pub mod adwords;
pub mod batch;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod state;
pub mod storage;

use std::path::Path;

use tracing::info;

use crate::config::Config;
use crate::error::AppError;
use crate::state::AppState;

// ── Startup ───────────────────────────────────────────────────────────────────

/// Loads the TOML config at `config_path`, installs logging and opens the
/// state every command runs against.
pub async fn start<P: AsRef<Path>>(config_path: P) -> Result<AppState, AppError> {
    let config = Config::from_file(config_path)?;
    start_with(config).await
}

/// Same as [`start`] with an already built configuration.
pub async fn start_with(config: Config) -> Result<AppState, AppError> {
    logging::init(&config.logging);

    let state = AppState::open(config).await?;
    state.db.health_check().await?;

    info!(
        "[STARTUP] database at {}, ledger {}",
        state.db.db_path().display(),
        state.config.dispatch.ledger_name
    );

    Ok(state)
}
