//! Configuration for the admission engine.
//!
//! Loads configuration from environment variables with sensible defaults.

use admission_runtime::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Notification delivery
    pub notifications: NotificationConfig,
    /// Service lifecycle
    pub service: ServiceConfig,
    /// Logging
    pub logging: LoggingConfig,
    /// Demo binary
    pub demo: DemoConfig,
}

/// Notification delivery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Retries after the first failed delivery attempt
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for a single retry delay in milliseconds
    pub max_delay_ms: u64,
}

impl NotificationConfig {
    /// Retry policy for notification delivery
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.max_retries)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .build()
    }
}

/// Service lifecycle configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Seconds to wait for in-flight commits and notifications on shutdown
    pub shutdown_timeout: u64,
}

impl ServiceConfig {
    /// Shutdown timeout as a `Duration`
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (`RUST_LOG` syntax)
    pub level: String,
}

/// Demo binary configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Capacity of the demo event
    pub capacity: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Falls back to defaults for any variable that is missing or does not parse.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            notifications: NotificationConfig {
                max_retries: parsed("ADMISSION_NOTIFY_MAX_RETRIES")
                    .unwrap_or(defaults.notifications.max_retries),
                initial_delay_ms: parsed("ADMISSION_NOTIFY_INITIAL_DELAY_MS")
                    .unwrap_or(defaults.notifications.initial_delay_ms),
                max_delay_ms: parsed("ADMISSION_NOTIFY_MAX_DELAY_MS")
                    .unwrap_or(defaults.notifications.max_delay_ms),
            },
            service: ServiceConfig {
                shutdown_timeout: parsed("ADMISSION_SHUTDOWN_TIMEOUT")
                    .unwrap_or(defaults.service.shutdown_timeout),
            },
            logging: LoggingConfig {
                level: env::var("RUST_LOG").unwrap_or(defaults.logging.level),
            },
            demo: DemoConfig {
                capacity: parsed("ADMISSION_DEMO_CAPACITY").unwrap_or(defaults.demo.capacity),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            notifications: NotificationConfig {
                max_retries: 3,
                initial_delay_ms: 100,
                max_delay_ms: 5_000,
            },
            service: ServiceConfig {
                shutdown_timeout: 30,
            },
            logging: LoggingConfig {
                level: "info,admission_engine=debug".to_string(),
            },
            demo: DemoConfig { capacity: 8 },
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}
