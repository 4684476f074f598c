//! Client connection settings.

use serde::{Deserialize, Serialize};

/// Stock listen address of the simulator's command socket.
pub const DEFAULT_ADDRESS: &str = "localhost";
pub const DEFAULT_PORT: u32 = 8181;

/// Connection settings for [`crate::Simulator::connect`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub address: String,
    pub port: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ClientConfig {
    pub fn new(address: impl Into<String>, port: u32) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Build from `SIMLINK_ADDRESS` / `SIMLINK_PORT`, falling back to the
    /// defaults. An unparseable port is left at the default; range checking
    /// happens when the transport connects.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(address) = std::env::var("SIMLINK_ADDRESS") {
            if !address.is_empty() {
                config.address = address;
            }
        }
        if let Ok(port) = std::env::var("SIMLINK_PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_stock_simulator() {
        let config = ClientConfig::default();
        assert_eq!(config.address, "localhost");
        assert_eq!(config.port, 8181);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ClientConfig = serde_json::from_str("{\"port\": 9090}").expect("parse");
        assert_eq!(config.address, "localhost");
        assert_eq!(config.port, 9090);
    }
}
