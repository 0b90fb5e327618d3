use super::TcpConfig;
use crate::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Startup configuration for the simulator binary
///
/// # Examples
///
/// ```
/// use tcpsim::SimulatorConfig;
///
/// let config: SimulatorConfig = serde_json::from_str(r#"{
///     "hostLabel": "sim-1",
///     "listeners": [
///         {"port": 9000, "echoResponseSize": 4},
///         {"port": 9001, "conversation": true}
///     ]
/// }"#).unwrap();
/// assert_eq!(config.listeners.len(), 2);
/// ```
///
/// Using the default configuration:
///
/// ```
/// use tcpsim::SimulatorConfig;
///
/// let config = SimulatorConfig::default();
/// assert_eq!(config.listeners[0].port, 8080);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorConfig {
    /// Label prefixed to protocol messages as `[<label>]`
    #[serde(default = "default_host_label")]
    pub host_label: String,
    /// Address the listeners bind on
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    pub listeners: Vec<TcpConfig>,
}

fn default_host_label() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "tcpsim".to_string())
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            host_label: default_host_label(),
            bind_host: default_bind_host(),
            listeners: vec![TcpConfig::new(8080)],
        }
    }
}

impl SimulatorConfig {
    /// Reads a JSON config file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: SimulatorConfig = serde_json::from_str(&raw)?;
        if config.listeners.is_empty() {
            return Err(SimError::InvalidConfig(format!(
                "{} declares no listeners",
                path.display()
            )));
        }
        Ok(config)
    }
}
