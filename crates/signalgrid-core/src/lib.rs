//! signalgrid-core — types shared by every SignalGrid crate.
//!
//! - Identifier aliases for nodes and instruments
//! - The `ResourceKind` marker trait that namespaces one assignment domain
//!   (pods, per-symbol workers) from another
//! - `GridConfig`, parsed from TOML with validated defaults

pub mod config;
pub mod types;

pub use config::{
    AssignmentConfig, BackpressureConfig, ConfigError, GridConfig, RebalanceConfig,
    RegistryConfig, RingConfig, ScalingConfig, StoreConfig, parse_duration,
};
pub use types::*;
