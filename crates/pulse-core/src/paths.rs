//! Application directory layout.
//!
//! Everything lives under one application directory (`$XDG_CONFIG_HOME/pulse`
//! by default): `config.toml`, a `state/` directory, a `logs/` directory and
//! the relay's `port` file. `PULSE_CONFIG_DIR` overrides the location.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Environment variable that overrides the application directory.
pub const APP_DIR_ENV: &str = "PULSE_CONFIG_DIR";

/// Root application directory.
pub fn pulse_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(APP_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let xdg_dirs = xdg::BaseDirectories::new()?;
    Ok(xdg_dirs.get_config_home().join("pulse"))
}

pub fn state_dir() -> Result<PathBuf> {
    Ok(pulse_dir()?.join("state"))
}

pub fn logs_dir() -> Result<PathBuf> {
    Ok(pulse_dir()?.join("logs"))
}

/// File where the relay publishes its listening port for browser extensions.
pub fn port_file() -> Result<PathBuf> {
    Ok(pulse_dir()?.join("port"))
}

/// Create the application, state and logs directories.
pub fn ensure_dirs() -> Result<()> {
    for dir in [pulse_dir()?, state_dir()?, logs_dir()?] {
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    }
    Ok(())
}
