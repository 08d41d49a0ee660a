//! Driver configuration loading and defaults

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Physical connection mode of the bridge module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnMode {
    Serial,
    Can,
    Ble,
}

impl Default for ConnMode {
    fn default() -> Self {
        Self::Serial
    }
}

/// Timing and behavior knobs of the executor and facade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Executor tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// How often health-check broadcasts go out
    #[serde(default = "default_health_interval")]
    pub health_interval_ms: i64,
    /// How often topology-request broadcasts go out
    #[serde(default = "default_topology_interval")]
    pub topology_interval_ms: i64,
    /// Silence after which a module is marked Disconnected
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_ms: i64,
    /// Collection window of the initial discovery handshake
    #[serde(default = "default_init_window")]
    pub init_window_ms: u64,
    /// No-new-edges settling time for topology completeness
    #[serde(default = "default_topology_quiet")]
    pub topology_quiet_ms: i64,
    /// End the discovery window early once this many modules announced
    #[serde(default)]
    pub expected_modules: Option<usize>,
    /// Depth of the raw-packet queue behind `Bus::recv`
    #[serde(default = "default_user_queue_depth")]
    pub user_queue_depth: usize,
    /// Deadline when joining worker threads on close
    #[serde(default = "default_join_timeout")]
    pub join_timeout_ms: u64,
    /// Abort the process if the transport worker dies unexpectedly
    #[serde(default = "default_true")]
    pub fail_fast: bool,
    /// Log every dispatched packet at debug level
    #[serde(default)]
    pub verbose: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            health_interval_ms: default_health_interval(),
            topology_interval_ms: default_topology_interval(),
            liveness_timeout_ms: default_liveness_timeout(),
            init_window_ms: default_init_window(),
            topology_quiet_ms: default_topology_quiet(),
            expected_modules: None,
            user_queue_depth: default_user_queue_depth(),
            join_timeout_ms: default_join_timeout(),
            fail_fast: default_true(),
            verbose: false,
        }
    }
}

fn default_tick_interval() -> u64 {
    1
}

fn default_health_interval() -> i64 {
    500
}

fn default_topology_interval() -> i64 {
    1000
}

fn default_liveness_timeout() -> i64 {
    2000
}

fn default_init_window() -> u64 {
    10_000
}

fn default_topology_quiet() -> i64 {
    500
}

fn default_user_queue_depth() -> usize {
    64
}

fn default_join_timeout() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl DriverConfig {
    /// Defaults adjusted for the connection mode: a wired link settles
    /// much faster than a wireless one.
    pub fn for_mode(mode: ConnMode) -> Self {
        let mut config = Self::default();
        config.init_window_ms = match mode {
            ConnMode::Serial | ConnMode::Can => 5_000,
            ConnMode::Ble => 10_000,
        };
        config
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Load configuration from a TOML file, falling back to defaults when
/// the file does not exist
pub fn load_config(path: &Path) -> anyhow::Result<DriverConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: DriverConfig = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded driver configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(DriverConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_dependent_init_window() {
        assert_eq!(DriverConfig::for_mode(ConnMode::Serial).init_window_ms, 5_000);
        assert_eq!(DriverConfig::for_mode(ConnMode::Ble).init_window_ms, 10_000);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: DriverConfig = toml::from_str("liveness_timeout_ms = 750").unwrap();
        assert_eq!(config.liveness_timeout_ms, 750);
        assert_eq!(config.tick_interval_ms, 1);
        assert!(config.fail_fast);
    }
}
