//! Command handlers: bridge CLI args -> core supervisor -> output formatting.

pub mod config_cmd;
pub mod simulate;

use std::path::PathBuf;

use tether_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file in effect: `--config` / `TETHER_CONFIG`, else the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(tether_config::config_path)
}

pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(tether_config::load_config_from(&config_file(global))?)
}
