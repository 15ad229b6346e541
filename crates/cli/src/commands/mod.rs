//! Command implementations.

mod decode;
mod info;
mod serve;
mod simulate;
mod validate;

pub use decode::run_decode;
pub use info::run_info;
pub use serve::run_serve;
pub use simulate::run_simulate;
pub use validate::run_validate;

use anyhow::{Context, Result};
use contracts::GatewayConfig;
use std::path::Path;

/// Load the configuration at `path`, or defaults when none is given
pub(crate) fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Configuration file not found: {}", path.display());
            }
            config_loader::ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => Ok(GatewayConfig::default()),
    }
}
