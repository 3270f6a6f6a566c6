//! Configuration for the Brickflow runtime

use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Peer address of the RPC router. Overridden by the APP_SOCKET
    /// environment variable.
    #[serde(default = "default_app_socket")]
    pub app_socket: String,

    // Bridge timing
    #[serde(default = "default_reconnect_delay")]
    pub bridge_reconnect_delay_secs: u64,
    #[serde(default = "default_call_timeout")]
    pub bridge_call_timeout_secs: u64,

    // App controller
    #[serde(default = "default_worker_join_timeout")]
    pub worker_join_timeout_secs: u64,
}

fn default_app_socket() -> String {
    crate::bridge::DEFAULT_ADDRESS.to_string()
}

fn default_reconnect_delay() -> u64 {
    3
}

fn default_call_timeout() -> u64 {
    10
}

fn default_worker_join_timeout() -> u64 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_socket: default_app_socket(),
            bridge_reconnect_delay_secs: default_reconnect_delay(),
            bridge_call_timeout_secs: default_call_timeout(),
            worker_join_timeout_secs: default_worker_join_timeout(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // Load .env file
        dotenvy::dotenv().ok();

        // Build config from environment
        let config = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        let cfg: AppConfig = config.try_deserialize()?;
        Ok(cfg)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.bridge_reconnect_delay_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_call_timeout_secs)
    }

    pub fn worker_join_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_join_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = AppConfig::default();

        assert_eq!(config.app_socket, "unix:///var/run/arduino-router.sock");
        assert_eq!(config.bridge_reconnect_delay_secs, 3);
        assert_eq!(config.bridge_call_timeout_secs, 10);
        assert_eq!(config.worker_join_timeout_secs, 5);
    }
}
