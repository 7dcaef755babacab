//! Where the config file lives, and writing the commented template.

use std::path::{Path, PathBuf};

use tracing::info;
use voxmesh_common::ConfigError;

use super::template::default_config_toml;

/// Environment variable that points at a config file directly.
pub const CONFIG_ENV: &str = "VOXMESH_CONFIG";

/// `$VOXMESH_CONFIG` when set, else `<config dir>/voxmesh/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("voxmesh").join("config.toml"))
        .ok_or_else(|| ConfigError::ParseError("no platform config directory".into()))
}

/// Write the template to `path`, creating parent directories.
/// An existing file is left alone.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Ok(());
    }
    let io_err = |what: &str, p: &Path, e: std::io::Error| {
        ConfigError::ParseError(format!("{what} {}: {e}", p.display()))
    };

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| io_err("cannot create", dir, e))?;
    }
    std::fs::write(path, default_config_toml()).map_err(|e| io_err("cannot write", path, e))?;

    info!(path = %path.display(), "Wrote default config");
    Ok(())
}
