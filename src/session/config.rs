//! Session configuration.

use std::time::Duration;

use crate::core::{
    ConfigError, DEFAULT_BROADCAST_INTERVAL, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_RETRIES,
    DEFAULT_MIN_RSSI, DEFAULT_REINIT_DELAY, DEFAULT_RETRY_INTERVAL, DEFAULT_RETRY_JITTER,
};

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Application protocol identifier carried in every outbound packet.
    pub mode_id: u8,

    /// Identifier accepted on receive instead of `mode_id` (asymmetric mode).
    pub incoming_mode_id: Option<u8>,

    /// Connect broadcasts weaker than this (dBm) are ignored.
    pub min_rssi: i8,

    /// Base delay between retransmissions of the in-flight message.
    pub retry_interval: Duration,

    /// Upper bound of the random delay added to every retry and broadcast.
    pub retry_jitter: Duration,

    /// Retransmissions allowed after the first transmission.
    pub max_retries: u8,

    /// Base delay between Connect broadcasts.
    pub broadcast_interval: Duration,

    /// Time allowed for a handshake to reach Connected.
    pub handshake_timeout: Duration,

    /// Delay before a lost handshake starts over.
    pub reinit_delay: Duration,

    /// Restart the handshake automatically after it is lost.
    pub reconnect_on_lost: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode_id: 0,
            incoming_mode_id: None,
            min_rssi: DEFAULT_MIN_RSSI,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            retry_jitter: DEFAULT_RETRY_JITTER,
            max_retries: DEFAULT_MAX_RETRIES,
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reinit_delay: DEFAULT_REINIT_DELAY,
            reconnect_on_lost: true,
        }
    }
}

impl SessionConfig {
    /// Start building a configuration for `mode_id`.
    pub fn builder(mode_id: u8) -> SessionConfigBuilder {
        SessionConfigBuilder::new(mode_id)
    }

    /// Mode identifier that inbound packets must carry.
    pub fn receive_mode_id(&self) -> u8 {
        self.incoming_mode_id.unwrap_or(self.mode_id)
    }

    /// Upper bound on the time spent retrying a single message.
    pub fn all_retries_timeout(&self) -> Duration {
        (self.retry_interval + self.retry_jitter) * (u32::from(self.max_retries) + 1)
    }

    /// Check that the configuration can drive a session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("retry_interval", self.retry_interval),
            ("broadcast_interval", self.broadcast_interval),
            ("handshake_timeout", self.handshake_timeout),
            ("reinit_delay", self.reinit_delay),
        ];
        if let Some((name, _)) = durations.into_iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroDuration(name));
        }

        if self.max_retries == 0 {
            return Err(ConfigError::NoRetries);
        }

        Ok(())
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a builder with default timings for `mode_id`.
    pub fn new(mode_id: u8) -> Self {
        Self {
            config: SessionConfig {
                mode_id,
                ..SessionConfig::default()
            },
        }
    }

    /// Accept `mode_id` on receive instead of the session's own identifier.
    pub fn incoming_mode_id(mut self, mode_id: u8) -> Self {
        self.config.incoming_mode_id = Some(mode_id);
        self
    }

    /// Set the minimum signal strength for Connect broadcasts.
    pub fn min_rssi(mut self, rssi: i8) -> Self {
        self.config.min_rssi = rssi;
        self
    }

    /// Set the retry interval.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    /// Set the retry and broadcast jitter.
    pub fn retry_jitter(mut self, jitter: Duration) -> Self {
        self.config.retry_jitter = jitter;
        self
    }

    /// Set the retransmission budget.
    pub fn max_retries(mut self, retries: u8) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the Connect broadcast interval.
    pub fn broadcast_interval(mut self, interval: Duration) -> Self {
        self.config.broadcast_interval = interval;
        self
    }

    /// Set the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the delay before a lost handshake restarts.
    pub fn reinit_delay(mut self, delay: Duration) -> Self {
        self.config.reinit_delay = delay;
        self
    }

    /// Enable or disable automatic reconnection.
    pub fn reconnect_on_lost(mut self, enabled: bool) -> Self {
        self.config.reconnect_on_lost = enabled;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 5);
        assert!(config.reconnect_on_lost);
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::builder(b'h')
            .incoming_mode_id(b'c')
            .min_rssi(-80)
            .max_retries(3)
            .reconnect_on_lost(false)
            .build()
            .unwrap();

        assert_eq!(config.mode_id, b'h');
        assert_eq!(config.receive_mode_id(), b'c');
        assert_eq!(config.min_rssi, -80);
        assert_eq!(config.max_retries, 3);
        assert!(!config.reconnect_on_lost);
    }

    #[test]
    fn test_receive_mode_defaults_to_own() {
        let config = SessionConfig::builder(7).build().unwrap();
        assert_eq!(config.receive_mode_id(), 7);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let err = SessionConfig::builder(1)
            .retry_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroDuration("retry_interval"));

        let err = SessionConfig::builder(1).max_retries(0).build().unwrap_err();
        assert_eq!(err, ConfigError::NoRetries);
    }

    #[test]
    fn test_all_retries_timeout() {
        let config = SessionConfig::builder(1)
            .retry_interval(Duration::from_millis(40))
            .retry_jitter(Duration::from_millis(10))
            .max_retries(5)
            .build()
            .unwrap();
        assert_eq!(config.all_retries_timeout(), Duration::from_millis(300));
    }
}
