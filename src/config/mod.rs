//! # Scheduler Configuration
//!
//! Configuration for the moderation queue scheduler. Values come from
//! `config/moderation-queue.yaml` with an optional per-environment section merged on top
//! (see [`ConfigManager`]); every section has working defaults so the scheduler can also
//! run without any file.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use moderation_queue::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let lease_timeout = manager.config().lease.timeout();
//! let max_attempts = manager.config().retry.max_attempts;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration for the scheduler
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ModerationQueueConfig {
    pub database: DatabaseConfig,
    pub lease: LeaseConfig,
    pub retry: RetryConfig,
    pub claim: ClaimConfig,
    pub maintenance: MaintenanceConfig,
    pub estimation: EstimationConfig,
    pub events: EventsConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://moderation_queue.db".to_string(),
            max_connections: 8,
            busy_timeout_ms: 5000,
            acquire_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

/// Worker lease settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// A PROCESSING item older than this is handed back to the queue
    pub timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 300, // 5 minutes
            sweep_interval_seconds: 30,
        }
    }
}

impl LeaseConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Retry policy for transient evaluation failures
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the next attempt after `attempts` failures (1-based)
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(32) as i32;
        let delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClaimConfig {
    /// Guarded updates a single claim call may lose before giving up with an empty result
    pub max_attempts: u32,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub reconcile_interval_seconds: u64,
    pub reconcile_batch_size: i64,
    pub reconcile_lookback_hours: i64,
    pub position_refresh_interval_seconds: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_seconds: 300,
            reconcile_batch_size: 100,
            reconcile_lookback_hours: 24,
            position_refresh_interval_seconds: 60,
        }
    }
}

impl MaintenanceConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }

    pub fn position_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.position_refresh_interval_seconds)
    }
}

/// Inputs to wait-time estimates
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EstimationConfig {
    /// Used when nothing completed inside the window
    pub default_processing_seconds: f64,
    pub completion_window_minutes: i64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            default_processing_seconds: 30.0,
            completion_window_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub worker_id_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            worker_id_prefix: "modq-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ModerationQueueConfig {
    /// Reject values the scheduler cannot operate with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "database.url",
                "",
                "database url must not be empty",
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "at least one connection is required",
            ));
        }
        if self.lease.timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "lease.timeout_seconds",
                "0",
                "a zero lease would requeue every claimed item immediately",
            ));
        }
        for (key, seconds) in [
            ("lease.sweep_interval_seconds", self.lease.sweep_interval_seconds),
            (
                "maintenance.reconcile_interval_seconds",
                self.maintenance.reconcile_interval_seconds,
            ),
            (
                "maintenance.position_refresh_interval_seconds",
                self.maintenance.position_refresh_interval_seconds,
            ),
        ] {
            if seconds == 0 {
                return Err(ConfigurationError::invalid_value(
                    key,
                    "0",
                    "maintenance intervals must be positive",
                ));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                "0",
                "at least one attempt is required",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.backoff_multiplier",
                self.retry.backoff_multiplier.to_string(),
                "multiplier must be >= 1.0",
            ));
        }
        if self.claim.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "claim.max_attempts",
                "0",
                "at least one claim attempt is required",
            ));
        }
        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "broadcast channels need a positive capacity",
            ));
        }
        Ok(())
    }
}
