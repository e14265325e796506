//! Payloads exchanged with the directory service.
//!
//! # Design
//! `ServerInfo` travels in the register query string, not in a body.
//! `HeartbeatPayload` is the only JSON body the client sends. The register
//! reply is validated by hand in `client` because the directory's
//! `verified-level` may be any JSON number.

use serde::{Deserialize, Serialize};

/// What the relay server advertises about itself when registering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Address clients should connect to.
    pub ip: String,
    pub port: u16,
    pub name: String,
    pub terrain_name: String,
    pub max_clients: u32,
    /// Network protocol version string, e.g. `RoRnet_2.44`.
    pub version: String,
    /// Public/private listing flag, sent as `pw`.
    #[serde(default = "listed_publicly")]
    pub is_public: bool,
}

fn listed_publicly() -> bool {
    true
}

impl ServerInfo {
    /// Form-urlencoded register query: `ip, port, name, terrain-name,
    /// max-clients, version, pw`.
    pub fn to_query(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("ip", &self.ip)
            .append_pair("port", &self.port.to_string())
            .append_pair("name", &self.name)
            .append_pair("terrain-name", &self.terrain_name)
            .append_pair("max-clients", &self.max_clients.to_string())
            .append_pair("version", &self.version)
            .append_pair("pw", if self.is_public { "1" } else { "0" })
            .finish()
    }
}

/// Body of a heartbeat PUT.
#[derive(Debug, Serialize)]
pub struct HeartbeatPayload<'a, U> {
    pub challenge: &'a str,
    pub users: &'a [U],
}

/// Snapshot of a client's registration, as reported by the heartbeat service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationStatus {
    pub registered: bool,
    pub trust_level: i32,
}
