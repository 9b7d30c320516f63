use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::simulator::LossSimulation;

pub const DEFAULT_UPDATE_PERIOD: f64 = 1.0 / 20.0;
pub const DEFAULT_CHANNEL_COUNT: u8 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Seconds between application sends, see `Transport::needs_update`.
    pub update_period: f64,
    /// Simulated one-way latency in seconds added to every event.
    pub fake_lag: f64,
    pub channel_count: u8,
    pub host: HostConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            update_period: DEFAULT_UPDATE_PERIOD,
            fake_lag: 0.0,
            channel_count: DEFAULT_CHANNEL_COUNT,
            host: HostConfig::default(),
        }
    }
}

/// Settings for `UdpHost`. Timers are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub connect_retry: f64,
    pub connect_timeout: f64,
    pub disconnect_timeout: f64,
    pub peer_timeout: f64,
    pub keepalive_interval: f64,
    pub resend_min: f64,
    /// Applied to every datagram the host sends.
    pub simulation: LossSimulation,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            connect_retry: 0.5,
            connect_timeout: 5.0,
            disconnect_timeout: 3.0,
            peer_timeout: 10.0,
            keepalive_interval: 1.0,
            resend_min: 0.1,
            simulation: LossSimulation::default(),
        }
    }
}

impl HostConfig {
    pub fn connect_retry(&self) -> Duration {
        secs(self.connect_retry)
    }

    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        secs(self.disconnect_timeout)
    }

    pub fn peer_timeout(&self) -> Duration {
        secs(self.peer_timeout)
    }

    pub fn keepalive_interval(&self) -> Duration {
        secs(self.keepalive_interval)
    }

    pub fn resend_min(&self) -> Duration {
        secs(self.resend_min)
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}
