//! Gateway config loader (strict parsing).

pub mod schema;

use std::fs;

use sessioncast_core::error::{Result, SessionCastError};

pub use schema::{BroadcastSection, BroadcastSettings, GatewayConfig, GatewaySection};

/// Environment variable naming an alternative config path.
pub const CONFIG_PATH_ENV: &str = "SESSIONCAST_CONFIG";
/// Default config path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "sessioncast.yaml";

pub fn load_from_file(path: &str) -> Result<GatewayConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| SessionCastError::Internal(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<GatewayConfig> {
    let cfg: GatewayConfig = serde_yaml::from_str(s)
        .map_err(|e| SessionCastError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Resolve the config path from the environment, falling back to the default.
pub fn config_path() -> String {
    std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}
