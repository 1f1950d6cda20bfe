//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::completion::WaitOptions;

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bucket-level settings.
    pub bucket: BucketConfig,

    /// Defaults for waiting on async futures.
    pub futures: FutureConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Bucket configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Bucket name, used in log events.
    pub name: String,

    /// Per-operation timeout for blocking calls in milliseconds.
    pub operation_timeout_ms: u64,
}

impl BucketConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            operation_timeout_ms: 2500,
        }
    }
}

/// Wait policy applied when a caller waits on a future with the bucket's
/// defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FutureConfig {
    /// Bound on a future wait in milliseconds (absent = wait indefinitely).
    pub wait_timeout_ms: Option<u64>,

    /// Cancel the in-flight operation when a bounded wait expires.
    pub cancel_on_timeout: bool,
}

impl FutureConfig {
    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            timeout: self.wait_timeout_ms.map(Duration::from_millis),
            cancel_on_timeout: self.cancel_on_timeout,
        }
    }
}

impl Default for FutureConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: Some(5000),
            cancel_on_timeout: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9095".to_string(),
        }
    }
}
