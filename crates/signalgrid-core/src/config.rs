//! signalgrid.toml configuration parser.
//!
//! Every section is optional; missing keys take the defaults documented on
//! each field. Durations are written as strings (`"30s"`, `"5m"`, `"250ms"`)
//! and a malformed duration fails the whole load rather than falling back.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration: {0:?}")]
    Duration(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GridConfig {
    pub ring: RingConfig,
    pub registry: RegistryConfig,
    pub assignment: AssignmentConfig,
    pub rebalance: RebalanceConfig,
    pub store: StoreConfig,
    pub backpressure: BackpressureConfig,
    pub scaling: ScalingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RingConfig {
    /// Virtual points per physical node.
    pub virtual_nodes: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self { virtual_nodes: 150 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// A node is failed once its last heartbeat is older than this.
    #[serde(with = "duration_str")]
    pub heartbeat_timeout: Duration,
    /// How often the health sweep runs.
    #[serde(with = "duration_str")]
    pub sweep_interval: Duration,
    /// How often a process heartbeats its own node.
    #[serde(with = "duration_str")]
    pub heartbeat_interval: Duration,
    /// cpu or memory usage above this marks a node OVERLOADED.
    pub overload_enter: f64,
    /// Both cpu and memory must fall below this to return to READY.
    pub overload_exit: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            overload_enter: 0.9,
            overload_exit: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Load ratio at or above which a ring candidate is skipped.
    pub overload_threshold: f64,
    /// Distinct ring candidates considered per instrument.
    pub candidate_count: usize,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            overload_threshold: 0.9,
            candidate_count: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Relative spread `(max - min) / max` that triggers a rebalance.
    pub threshold: f64,
    /// Minimum time between rebalance cycles, cluster-wide.
    #[serde(with = "duration_str")]
    pub cooldown: Duration,
    /// How often the rebalance loop checks whether a cycle is due.
    #[serde(with = "duration_str")]
    pub check_interval: Duration,
    /// Upper bound on moves per cycle.
    pub max_moves: usize,
    /// A pause is inserted after every `pacing_every` moves.
    pub pacing_every: usize,
    #[serde(with = "duration_str")]
    pub pacing_delay: Duration,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            cooldown: Duration::from_secs(300),
            check_interval: Duration::from_secs(60),
            max_moves: 50,
            pacing_every: 10,
            pacing_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Bound on every coordination-store call.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Local cache refresh period.
    #[serde(with = "duration_str")]
    pub resync_interval: Duration,
    /// Coalescing window for node load write-through.
    #[serde(with = "duration_str")]
    pub persist_debounce: Duration,
    /// Pause after a failed background cycle.
    #[serde(with = "duration_str")]
    pub error_backoff: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            resync_interval: Duration::from_secs(30),
            persist_debounce: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Queue depth that alone makes the cluster CRITICAL.
    pub critical_queue_depth: f64,
    /// Queue depth that alone makes the cluster HIGH.
    pub high_queue_depth: f64,
    /// p99 latency (ms) above which the cluster is HIGH.
    pub latency_threshold_ms: f64,
    /// Error rate above which the cluster is HIGH; twice this is CRITICAL.
    pub error_threshold: f64,
    /// Bounded sample history.
    pub history_size: usize,
    /// Minimum time between refreshed recommendations (CRITICAL bypasses).
    #[serde(with = "duration_str")]
    pub cooldown: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            critical_queue_depth: 2000.0,
            high_queue_depth: 1000.0,
            latency_threshold_ms: 500.0,
            error_threshold: 0.05,
            history_size: 50,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalingConfig {
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Minimum time between applied scaling actions (critical bypasses).
    #[serde(with = "duration_str")]
    pub cooldown: Duration,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 10,
            cooldown: Duration::from_secs(120),
        }
    }
}

impl GridConfig {
    /// Load and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: GridConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no deployment could mean.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring.virtual_nodes == 0 {
            return Err(invalid("ring.virtual_nodes", "must be at least 1"));
        }
        unit_interval("registry.overload_enter", self.registry.overload_enter)?;
        unit_interval("registry.overload_exit", self.registry.overload_exit)?;
        if self.registry.overload_exit >= self.registry.overload_enter {
            return Err(invalid(
                "registry.overload_exit",
                "must be below registry.overload_enter",
            ));
        }
        if self.registry.heartbeat_timeout.is_zero() {
            return Err(invalid("registry.heartbeat_timeout", "must be non-zero"));
        }
        unit_interval(
            "assignment.overload_threshold",
            self.assignment.overload_threshold,
        )?;
        if self.assignment.candidate_count == 0 {
            return Err(invalid("assignment.candidate_count", "must be at least 1"));
        }
        unit_interval("rebalance.threshold", self.rebalance.threshold)?;
        if self.rebalance.pacing_every == 0 {
            return Err(invalid("rebalance.pacing_every", "must be at least 1"));
        }
        if self.store.timeout.is_zero() {
            return Err(invalid("store.timeout", "must be non-zero"));
        }
        let bp = &self.backpressure;
        if bp.high_queue_depth <= 0.0 || bp.critical_queue_depth < bp.high_queue_depth {
            return Err(invalid(
                "backpressure.critical_queue_depth",
                "must be >= high_queue_depth > 0",
            ));
        }
        unit_interval("backpressure.error_threshold", bp.error_threshold)?;
        if bp.history_size < 5 {
            return Err(invalid(
                "backpressure.history_size",
                "must hold at least 5 samples for trend analysis",
            ));
        }
        if self.scaling.min_replicas == 0 || self.scaling.min_replicas > self.scaling.max_replicas {
            return Err(invalid(
                "scaling.min_replicas",
                "must satisfy 1 <= min_replicas <= max_replicas",
            ));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn unit_interval(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if v > 0.0 && v <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{v} is outside (0, 1]"),
        })
    }
}

/// Parse a duration string like `"250ms"`, `"30s"`, `"5m"` or `"1h"`.
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let bad = || ConfigError::Duration(s.to_string());
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().map(Duration::from_millis).map_err(|_| bad())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().map(Duration::from_secs).map_err(|_| bad())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| bad())
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .map(|h| Duration::from_secs(h * 3600))
            .map_err(|_| bad())
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| bad())
    }
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        format!("{}ms", d.as_millis())
    } else if d.as_secs() % 60 == 0 {
        format!("{}m", d.as_secs() / 60)
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
