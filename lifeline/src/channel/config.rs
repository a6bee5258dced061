//! Channel client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Reconnect attempts before giving up and going offline.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Delay between reconnect attempts in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Buffer size for each subscriber's event channel.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Buffer size for the client command channel.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_subscriber_buffer() -> usize {
    32
}

fn default_command_buffer() -> usize {
    64
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            subscriber_buffer: default_subscriber_buffer(),
            command_buffer: default_command_buffer(),
        }
    }
}

impl ChannelConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.reconnect_attempts, 10);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: ChannelConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.reconnect_attempts, 10);
        assert_eq!(config.subscriber_buffer, 32);
    }
}
