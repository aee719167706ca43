use std::time::Duration;

use serde::Deserialize;
use sessioncast_core::error::{Result, SessionCastError};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub broadcast: BroadcastSection,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(SessionCastError::UnsupportedVersion);
        }
        self.gateway.validate()?;
        self.broadcast.validate()?;
        Ok(())
    }

    /// Apply the `PORT` override the hosting platform may set.
    pub fn apply_port_override(&mut self, port: Option<&str>) -> Result<()> {
        let Some(port) = port else { return Ok(()) };
        let port: u16 = port
            .parse()
            .map_err(|_| SessionCastError::BadRequest(format!("PORT must be a u16, got {port:?}")))?;
        let host = self
            .gateway
            .listen
            .rsplit_once(':')
            .map(|(h, _)| h.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        self.gateway.listen = format!("{host}:{port}");
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ws_path: default_ws_path(),
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        if !self.ws_path.starts_with('/') {
            return Err(SessionCastError::BadRequest(
                "gateway.ws_path must start with '/'".into(),
            ));
        }
        if !(5000..=120000).contains(&self.ping_interval_ms) {
            return Err(SessionCastError::BadRequest(
                "gateway.ping_interval_ms must be between 5000 and 120000".into(),
            ));
        }
        if !(10000..=600000).contains(&self.idle_timeout_ms) {
            return Err(SessionCastError::BadRequest(
                "gateway.idle_timeout_ms must be between 10000 and 600000".into(),
            ));
        }
        if self.idle_timeout_ms <= self.ping_interval_ms {
            return Err(SessionCastError::BadRequest(
                "gateway.idle_timeout_ms must be greater than ping_interval_ms".into(),
            ));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:3002".into()
}
fn default_ws_path() -> String {
    "/v1/ws".into()
}
fn default_ping_interval_ms() -> u64 {
    20000
}
fn default_idle_timeout_ms() -> u64 {
    60000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastSection {
    /// Per-connection outbound queue depth.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound on live connections; 0 disables the check.
    #[serde(default)]
    pub max_connections: usize,
}

impl Default for BroadcastSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_connections: 0,
        }
    }
}

impl BroadcastSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=65536).contains(&self.queue_capacity) {
            return Err(SessionCastError::BadRequest(
                "broadcast.queue_capacity must be between 1 and 65536".into(),
            ));
        }
        Ok(())
    }
}

fn default_queue_capacity() -> usize {
    256
}

/// Runtime knobs handed to the broadcast layer.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    pub ws_path: String,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
    pub queue_capacity: usize,
    pub max_connections: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self::from(&GatewayConfig {
            version: 1,
            gateway: GatewaySection::default(),
            broadcast: BroadcastSection::default(),
        })
    }
}

impl From<&GatewayConfig> for BroadcastSettings {
    fn from(cfg: &GatewayConfig) -> Self {
        Self {
            ws_path: cfg.gateway.ws_path.clone(),
            ping_interval: Duration::from_millis(cfg.gateway.ping_interval_ms),
            idle_timeout: Duration::from_millis(cfg.gateway.idle_timeout_ms),
            queue_capacity: cfg.broadcast.queue_capacity,
            max_connections: cfg.broadcast.max_connections,
        }
    }
}
