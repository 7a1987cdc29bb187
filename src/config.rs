//! Client configuration.
//!
//! `TelemetryConfig` deserializes from camelCase JSON; every field is optional and falls back to
//! its default. Durations are whole milliseconds on the wire.
//!
//! ```rust
//! use searchtrail::TelemetryConfig;
//! use std::time::Duration;
//!
//! let config = TelemetryConfig::from_json_str(r#"{"bufferCapacity": 100, "flushTimeoutMs": 250}"#)
//!     .unwrap();
//! assert_eq!(config.buffer_capacity, 100);
//! assert_eq!(config.flush_timeout, Duration::from_millis(250));
//! assert_eq!(config.batch_size, 50);
//! ```

use crate::backoff::Backoff;
use crate::buffer::{OverflowPolicy, DEFAULT_CAPACITY};
use crate::dead_letter::{DEFAULT_ALERT_THRESHOLD, DEFAULT_DEAD_LETTER_CAPACITY};
use crate::error::ConfigError;
use crate::jitter::Jitter;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRIES: usize = 5;
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;
pub const DEFAULT_ORPHAN_WINDOW: usize = 1_024;

fn millis<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Max buffered events.
    pub buffer_capacity: usize,
    /// Max events per sink call.
    pub batch_size: usize,
    #[serde(rename = "retryBaseDelayMs", deserialize_with = "millis")]
    pub retry_base_delay: Duration,
    #[serde(rename = "retryMaxDelayMs", deserialize_with = "millis")]
    pub retry_max_delay: Duration,
    /// Retries after the first send; exhausting them dead-letters the batch.
    pub max_retries: usize,
    /// Deadline for `flush` and the final flush on shutdown.
    #[serde(rename = "flushTimeoutMs", deserialize_with = "millis")]
    pub flush_timeout: Duration,
    /// Period of the background delivery loop.
    #[serde(rename = "flushIntervalMs", deserialize_with = "millis")]
    pub flush_interval: Duration,
    pub overflow_policy: OverflowPolicy,
    /// Proportional jitter on retry delays, in `[0, 1)`.
    pub jitter_ratio: f64,
    pub dead_letter_capacity: usize,
    /// Dead-lettered batches after which a single escalation is raised.
    pub dead_letter_alert_threshold: u64,
    /// Recent search ids remembered for orphan-click detection.
    pub orphan_window: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            overflow_policy: OverflowPolicy::default(),
            jitter_ratio: DEFAULT_JITTER_RATIO,
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
            dead_letter_alert_threshold: DEFAULT_ALERT_THRESHOLD,
            orphan_window: DEFAULT_ORPHAN_WINDOW,
        }
    }
}

impl TelemetryConfig {
    /// Parse and validate.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("bufferCapacity", self.buffer_capacity == 0),
            ("batchSize", self.batch_size == 0),
            ("retryBaseDelay", self.retry_base_delay.is_zero()),
            ("flushTimeout", self.flush_timeout.is_zero()),
            ("flushInterval", self.flush_interval.is_zero()),
            ("deadLetterCapacity", self.dead_letter_capacity == 0),
            ("deadLetterAlertThreshold", self.dead_letter_alert_threshold == 0),
            ("orphanWindow", self.orphan_window == 0),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Zero { field: *field });
        }
        if self.retry_max_delay < self.retry_base_delay {
            return Err(ConfigError::MaxDelayBelowBase {
                base: self.retry_base_delay,
                max: self.retry_max_delay,
            });
        }
        if Jitter::proportional(self.jitter_ratio).is_err() {
            return Err(ConfigError::JitterRatio(self.jitter_ratio));
        }
        Ok(())
    }

    /// Exponential retry schedule from `retryBaseDelay`, capped at `retryMaxDelay`.
    pub fn backoff(&self) -> Backoff {
        let base = Backoff::exponential(self.retry_base_delay);
        base.with_max(self.retry_max_delay).unwrap_or(base)
    }

    pub fn jitter(&self) -> Jitter {
        Jitter::proportional(self.jitter_ratio).unwrap_or_default()
    }
}
