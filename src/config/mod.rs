use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;

use crate::protocol::{
    WireOptions, DEFAULT_MAX_PAYLOAD_BYTES, FRAME_HEADER_LEN, MSG_DISTANCE, MSG_DISTANCE_SCALAR,
    MSG_FRAME, MSG_POINT, MSG_POINT_PAIR,
};
use crate::server::ClientPolicy;
use crate::viewport::ClickMode;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9999;

/// Viewer settings. Every field has a default, so a config file only needs
/// the values it changes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub network: NetworkConfig,
    pub protocol: ProtocolConfig,
    pub viewer: ViewerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// Where `"x,y"` legacy taps go. Required for the legacy click mode;
    /// must not be our own listen address.
    pub legacy_target: Option<String>,
    pub client_policy: ClientPolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            legacy_target: None,
            client_policy: ClientPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    pub max_payload_bytes: usize,
    pub vector_distance_type: Option<i32>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            vector_distance_type: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewerConfig {
    pub click_mode: ClickMode,
    /// Force a terminal graphics protocol instead of auto-detecting.
    pub graphics: Option<String>,
}

impl Config {
    /// Load from a JSON file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)?;
        Ok(config)
    }

    /// Reject settings that can only fail later.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.network.port != 0, "network.port must be non-zero");
        anyhow::ensure!(!self.network.host.is_empty(), "network.host must be set");
        anyhow::ensure!(
            self.protocol.max_payload_bytes > FRAME_HEADER_LEN,
            "protocol.max_payload_bytes must leave room for a frame header"
        );
        if let Some(tag) = self.protocol.vector_distance_type {
            let reserved = [
                MSG_FRAME,
                MSG_DISTANCE,
                MSG_POINT,
                MSG_POINT_PAIR,
                MSG_DISTANCE_SCALAR,
            ];
            anyhow::ensure!(
                !reserved.contains(&tag),
                "protocol.vector_distance_type {} collides with a built-in message type",
                tag
            );
        }
        if self.viewer.click_mode == ClickMode::Legacy {
            anyhow::ensure!(
                self.network.legacy_target.is_some(),
                "viewer.click_mode legacy needs network.legacy_target"
            );
        }
        if let Some(target) = &self.network.legacy_target {
            anyhow::ensure!(
                !self.is_own_listener(target),
                "network.legacy_target {} is this viewer's own listen address",
                target
            );
        }
        Ok(())
    }

    /// Whether `target` would connect back to our own listener.
    fn is_own_listener(&self, target: &str) -> bool {
        let Some((host, port)) = target.rsplit_once(':') else {
            return false;
        };
        if port.parse::<u16>().ok() != Some(self.network.port) {
            return false;
        }
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let listen = self.network.host.trim_start_matches('[').trim_end_matches(']');
        if host.eq_ignore_ascii_case(listen) {
            return true;
        }
        let listen_ip = listen.parse::<IpAddr>().ok();
        if listen_ip.is_some_and(|ip| ip.is_unspecified()) {
            return true;
        }
        is_loopback_host(listen) && is_loopback_host(host)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.network.host, self.network.port)
    }

    pub fn legacy_target(&self) -> Option<String> {
        self.network.legacy_target.clone()
    }

    pub fn wire_options(&self) -> WireOptions {
        WireOptions {
            max_payload_bytes: self.protocol.max_payload_bytes,
            vector_distance_type: self.protocol.vector_distance_type,
        }
    }
}

fn is_loopback_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
