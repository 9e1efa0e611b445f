pub mod settings;

pub use settings::Config;

use crate::error::ScanError;
use std::sync::Arc;

/// Loads `.env` (if present), reads the environment and validates the result.
/// Runs before logging is up, so the caller logs the summary afterwards with
/// `Config::validate_and_log`.
pub fn load_config() -> Result<Arc<Config>, ScanError> {
    dotenv::dotenv().ok();

    let config = Config::from_env();
    config.validate()?;

    Ok(Arc::new(config))
}
