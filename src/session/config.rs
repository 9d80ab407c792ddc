// SPDX-License-Identifier: MPL-2.0

//! Per-session configuration.
//!
//! Loaded once at session start, either programmatically (builder) or from
//! the process environment via [`SessionConfig::from_env`]. Environment keys
//! use the units of the broker's documented settings (seconds/hours); the
//! struct itself stores milliseconds for test-friendly precision.

use std::time::Duration;

use crate::session::mqueue::DropPolicy;

/// Environment variable prefix for [`SessionConfig::from_env`].
const ENV_PREFIX: &str = "FLOWBROKER_";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionConfig {
    /// Max unacked QoS 1/2 deliveries to the client (0 = unbounded).
    pub max_inflight: usize,
    /// Max in-progress inbound QoS 2 publishes (0 = unbounded).
    pub max_awaiting_rel: usize,
    /// Timeout awaiting PUBREL / PUBCOMP, in milliseconds.
    pub await_rel_timeout_ms: u64,
    /// Retransmit interval for unacked QoS 1/2 deliveries, in milliseconds.
    pub unack_retry_interval_ms: u64,
    /// Persistent-session TTL after disconnect, in milliseconds.
    pub expired_after_ms: u64,
    /// Stats publication interval in milliseconds (0 = off).
    pub collect_interval_ms: u64,
    /// Caller-side deadline for the synchronous QoS 2 publish, in
    /// milliseconds.
    pub publish_deadline_ms: u64,
    /// Capacity of the pending-message queue (0 = unbounded).
    pub mqueue_capacity: usize,
    /// What the pending-message queue sheds when full.
    pub mqueue_policy: DropPolicy,
    /// Capacity of the session command mailbox channel.
    pub command_queue_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_inflight: 0,                            // unbounded
            max_awaiting_rel: 100,
            await_rel_timeout_ms: 8_000,                // 8 seconds
            unack_retry_interval_ms: 20_000,            // 20 seconds
            expired_after_ms: 48 * 3_600_000,           // 48 hours
            collect_interval_ms: 0,                     // off
            publish_deadline_ms: 60_000,                // 60 seconds
            mqueue_capacity: 1000,
            mqueue_policy: DropPolicy::DropOldest,
            command_queue_size: 128,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration builder.
    ///
    /// # Example
    /// ```
    /// use flowbroker::session::SessionConfig;
    ///
    /// let config = SessionConfig::builder()
    ///     .max_inflight(32)
    ///     .unack_retry_interval_ms(5_000)
    ///     .build();
    /// assert_eq!(config.max_inflight, 32);
    /// ```
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Read configuration from the process environment.
    ///
    /// Recognized keys (unset or unparsable keys keep their default):
    /// - `FLOWBROKER_MAX_INFLIGHT`
    /// - `FLOWBROKER_MAX_AWAITING_REL`
    /// - `FLOWBROKER_AWAIT_REL_TIMEOUT` (seconds)
    /// - `FLOWBROKER_UNACK_RETRY_INTERVAL` (seconds)
    /// - `FLOWBROKER_EXPIRED_AFTER` (hours)
    /// - `FLOWBROKER_COLLECT_INTERVAL` (seconds)
    /// - `FLOWBROKER_MQUEUE_CAPACITY`
    /// - `FLOWBROKER_MQUEUE_POLICY` (`drop_oldest` | `drop_newest`)
    pub fn from_env() -> Self {
        let mut config = SessionConfig::default();

        if let Some(v) = env_parse::<usize>("MAX_INFLIGHT") {
            config.max_inflight = v;
        }
        if let Some(v) = env_parse::<usize>("MAX_AWAITING_REL") {
            config.max_awaiting_rel = v;
        }
        if let Some(v) = env_parse::<u64>("AWAIT_REL_TIMEOUT") {
            if v > 0 {
                config.await_rel_timeout_ms = v * 1_000;
            } else {
                tracing::warn!("await_rel_timeout must be positive, keeping default");
            }
        }
        if let Some(v) = env_parse::<u64>("UNACK_RETRY_INTERVAL") {
            if v > 0 {
                config.unack_retry_interval_ms = v * 1_000;
            } else {
                tracing::warn!("unack_retry_interval must be positive, keeping default");
            }
        }
        if let Some(v) = env_parse::<u64>("EXPIRED_AFTER") {
            if v > 0 {
                config.expired_after_ms = v * 3_600_000;
            } else {
                tracing::warn!("expired_after must be positive, keeping default");
            }
        }
        if let Some(v) = env_parse::<u64>("COLLECT_INTERVAL") {
            config.collect_interval_ms = v * 1_000;
        }
        if let Some(v) = env_parse::<usize>("MQUEUE_CAPACITY") {
            config.mqueue_capacity = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}MQUEUE_POLICY")) {
            match v.as_str() {
                "drop_oldest" => config.mqueue_policy = DropPolicy::DropOldest,
                "drop_newest" => config.mqueue_policy = DropPolicy::DropNewest,
                other => tracing::warn!(value = other, "unknown mqueue policy, keeping default"),
            }
        }

        config
    }

    pub fn await_rel_timeout(&self) -> Duration {
        Duration::from_millis(self.await_rel_timeout_ms)
    }

    pub fn unack_retry_interval(&self) -> Duration {
        Duration::from_millis(self.unack_retry_interval_ms)
    }

    pub fn expired_after(&self) -> Duration {
        Duration::from_millis(self.expired_after_ms)
    }

    /// `None` when stats collection is off.
    pub fn collect_interval(&self) -> Option<Duration> {
        (self.collect_interval_ms > 0).then(|| Duration::from_millis(self.collect_interval_ms))
    }

    pub fn publish_deadline(&self) -> Duration {
        Duration::from_millis(self.publish_deadline_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(format!("{ENV_PREFIX}{key}")).ok()?.parse().ok()
}

/// Builder for [`SessionConfig`] with fluent setters over the defaults.
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    pub fn max_inflight(mut self, max: usize) -> Self {
        self.config.max_inflight = max;
        self
    }

    pub fn max_awaiting_rel(mut self, max: usize) -> Self {
        self.config.max_awaiting_rel = max;
        self
    }

    pub fn await_rel_timeout_ms(mut self, ms: u64) -> Self {
        self.config.await_rel_timeout_ms = ms;
        self
    }

    pub fn unack_retry_interval_ms(mut self, ms: u64) -> Self {
        self.config.unack_retry_interval_ms = ms;
        self
    }

    pub fn expired_after_ms(mut self, ms: u64) -> Self {
        self.config.expired_after_ms = ms;
        self
    }

    pub fn collect_interval_ms(mut self, ms: u64) -> Self {
        self.config.collect_interval_ms = ms;
        self
    }

    pub fn publish_deadline_ms(mut self, ms: u64) -> Self {
        self.config.publish_deadline_ms = ms;
        self
    }

    pub fn mqueue_capacity(mut self, capacity: usize) -> Self {
        self.config.mqueue_capacity = capacity;
        self
    }

    pub fn mqueue_policy(mut self, policy: DropPolicy) -> Self {
        self.config.mqueue_policy = policy;
        self
    }

    pub fn command_queue_size(mut self, size: usize) -> Self {
        self.config.command_queue_size = size;
        self
    }

    /// Validate and return the configuration.
    ///
    /// # Panics
    ///
    /// Panics when an interval that must be positive is zero
    /// (`await_rel_timeout_ms`, `unack_retry_interval_ms`,
    /// `expired_after_ms`, `publish_deadline_ms`) or when
    /// `command_queue_size` is zero.
    pub fn build(self) -> SessionConfig {
        assert!(
            self.config.await_rel_timeout_ms > 0,
            "await_rel_timeout_ms must be positive"
        );
        assert!(
            self.config.unack_retry_interval_ms > 0,
            "unack_retry_interval_ms must be positive"
        );
        assert!(
            self.config.expired_after_ms > 0,
            "expired_after_ms must be positive"
        );
        assert!(
            self.config.publish_deadline_ms > 0,
            "publish_deadline_ms must be positive"
        );
        assert!(
            self.config.command_queue_size > 0,
            "command_queue_size must be positive"
        );
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = SessionConfig::default();
        assert_eq!(config.max_inflight, 0);
        assert_eq!(config.max_awaiting_rel, 100);
        assert_eq!(config.await_rel_timeout(), Duration::from_secs(8));
        assert_eq!(config.unack_retry_interval(), Duration::from_secs(20));
        assert_eq!(config.expired_after(), Duration::from_secs(48 * 3600));
        assert_eq!(config.collect_interval(), None);
        assert_eq!(config.publish_deadline(), Duration::from_secs(60));
    }

    #[test]
    fn test_builder_overrides() {
        let config = SessionConfig::builder()
            .max_inflight(4)
            .max_awaiting_rel(2)
            .await_rel_timeout_ms(50)
            .collect_interval_ms(25)
            .mqueue_policy(DropPolicy::DropNewest)
            .build();

        assert_eq!(config.max_inflight, 4);
        assert_eq!(config.max_awaiting_rel, 2);
        assert_eq!(config.await_rel_timeout(), Duration::from_millis(50));
        assert_eq!(config.collect_interval(), Some(Duration::from_millis(25)));
        assert_eq!(config.mqueue_policy, DropPolicy::DropNewest);
    }

    #[test]
    fn test_from_env_reads_documented_units() {
        std::env::set_var("FLOWBROKER_MAX_INFLIGHT", "16");
        std::env::set_var("FLOWBROKER_AWAIT_REL_TIMEOUT", "3");
        std::env::set_var("FLOWBROKER_EXPIRED_AFTER", "2");
        std::env::set_var("FLOWBROKER_MQUEUE_POLICY", "drop_newest");

        let config = SessionConfig::from_env();
        assert_eq!(config.max_inflight, 16);
        assert_eq!(config.await_rel_timeout(), Duration::from_secs(3));
        assert_eq!(config.expired_after(), Duration::from_secs(2 * 3600));
        assert_eq!(config.mqueue_policy, DropPolicy::DropNewest);
        // Unset keys keep their defaults.
        assert_eq!(config.max_awaiting_rel, 100);

        std::env::remove_var("FLOWBROKER_MAX_INFLIGHT");
        std::env::remove_var("FLOWBROKER_AWAIT_REL_TIMEOUT");
        std::env::remove_var("FLOWBROKER_EXPIRED_AFTER");
        std::env::remove_var("FLOWBROKER_MQUEUE_POLICY");
    }

    #[test]
    #[should_panic(expected = "await_rel_timeout_ms must be positive")]
    fn test_builder_rejects_zero_rel_timeout() {
        SessionConfig::builder().await_rel_timeout_ms(0).build();
    }

    #[test]
    #[should_panic(expected = "unack_retry_interval_ms must be positive")]
    fn test_builder_rejects_zero_retry_interval() {
        SessionConfig::builder().unack_retry_interval_ms(0).build();
    }

    #[test]
    #[should_panic(expected = "command_queue_size must be positive")]
    fn test_builder_rejects_zero_command_queue() {
        SessionConfig::builder().command_queue_size(0).build();
    }

    #[test]
    fn test_from_env_zero_interval_keeps_default() {
        std::env::set_var("FLOWBROKER_UNACK_RETRY_INTERVAL", "0");
        let config = SessionConfig::from_env();
        assert_eq!(config.unack_retry_interval(), Duration::from_secs(20));
        std::env::remove_var("FLOWBROKER_UNACK_RETRY_INTERVAL");
    }

    #[test]
    fn test_invalid_env_value_keeps_default() {
        std::env::set_var("FLOWBROKER_MAX_AWAITING_REL", "not-a-number");
        let config = SessionConfig::from_env();
        assert_eq!(config.max_awaiting_rel, 100);
        std::env::remove_var("FLOWBROKER_MAX_AWAITING_REL");
    }
}
