use serde::{Deserialize, Serialize};
use skein::TransportConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub port: u16,
    pub ping_port: u16,
    pub max_peers: usize,
    pub tick_rate: u32,
    /// Seconds between statistics lines. Zero disables them.
    pub stats_interval: f64,
    pub transport: TransportConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "skein relay".to_string(),
            port: skein::DEFAULT_PORT,
            ping_port: skein::DEFAULT_PING_PORT,
            max_peers: 32,
            tick_rate: 60,
            stats_interval: 10.0,
            transport: TransportConfig::default(),
        }
    }
}
