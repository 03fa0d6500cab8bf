use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::{Path, PathBuf};

use super::{types::Config, ConfigError};

/// Prefix of environment overrides, e.g. `RESIGNER_SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "RESIGNER_";

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "RESIGNER_CONFIG";

/// Config file path: `$RESIGNER_CONFIG`, or `config.toml`.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

/// Load configuration from file with environment variable overrides.
///
/// Nested keys are separated by a double underscore so snake_case keys
/// survive: `RESIGNER_SCHEDULER__ADVANCE_DAYS=2`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).ignore(&["CONFIG"]).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
