//! Where the directory service lives and how to talk to it.
//!
//! `MasterServerConfig` derives `Deserialize` with per-field defaults so it
//! can sit inside any serde-backed server configuration. `from_env` overlays
//! `MASTER_SERVER_*` variables on the defaults.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::http::DEFAULT_PORT;
use crate::transport::TcpTransport;

pub const DEFAULT_HOST: &str = "api.rigsofrods.org";
pub const DEFAULT_HEARTBEAT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MasterServerConfig {
    pub host: String,
    pub port: u16,
    /// Path segment placed before every endpoint. Empty means none.
    pub url_prefix: String,
    pub connect_timeout_secs: Option<u64>,
    pub io_timeout_secs: Option<u64>,
    pub heartbeat_interval_secs: u64,
}

impl Default for MasterServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            url_prefix: String::new(),
            connect_timeout_secs: Some(10),
            io_timeout_secs: Some(10),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_SECS,
        }
    }
}

impl MasterServerConfig {
    /// Defaults overlaid with `MASTER_SERVER_HOST`, `MASTER_SERVER_PORT`,
    /// `MASTER_SERVER_URL_PREFIX` and `MASTER_SERVER_HEARTBEAT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(host) = lookup("MASTER_SERVER_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("MASTER_SERVER_PORT") {
            config.port = parse_number("MASTER_SERVER_PORT", port)?;
        }
        if let Some(prefix) = lookup("MASTER_SERVER_URL_PREFIX") {
            config.url_prefix = prefix;
        }
        if let Some(secs) = lookup("MASTER_SERVER_HEARTBEAT_SECS") {
            config.heartbeat_interval_secs = parse_number("MASTER_SERVER_HEARTBEAT_SECS", secs)?;
            if config.heartbeat_interval_secs == 0 {
                return Err(ConfigError::Zero {
                    var: "MASTER_SERVER_HEARTBEAT_SECS",
                });
            }
        }
        Ok(config)
    }

    /// Absolute path of `endpoint` under the configured prefix.
    pub fn endpoint(&self, endpoint: &str) -> String {
        let prefix = self.url_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("/{endpoint}")
        } else {
            format!("/{prefix}/{endpoint}")
        }
    }

    /// Time between ticks of `HeartbeatService::spawn`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// A `TcpTransport` with this configuration's timeouts.
    pub fn tcp_transport(&self) -> TcpTransport {
        let mut transport = TcpTransport::new();
        if let Some(secs) = self.connect_timeout_secs {
            transport = transport.with_connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.io_timeout_secs {
            transport = transport.with_io_timeout(Duration::from_secs(secs));
        }
        transport
    }
}

fn parse_number<N: std::str::FromStr>(var: &'static str, value: String) -> Result<N, ConfigError> {
    let parsed = value.trim().parse();
    parsed.map_err(|_| ConfigError::InvalidNumber { var, value })
}
