use serde::{Deserialize, Serialize};
use skein::TransportConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub name: String,
    pub ping_port: u16,
    /// Seconds to wait for discovery answers.
    pub discovery_time: f64,
    pub tick_rate: u32,
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "player".to_string(),
            ping_port: skein::DEFAULT_PING_PORT,
            discovery_time: 1.0,
            tick_rate: 60,
            transport: TransportConfig::default(),
        }
    }
}
