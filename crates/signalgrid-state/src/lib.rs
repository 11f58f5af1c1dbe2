//! signalgrid-state — the coordination store SignalGrid processes share.
//!
//! # Primitives
//!
//! - key/value `get` and `set_with_ttl` (expired keys read as absent)
//! - hash maps: `hash_get_all`, `hash_set`, `hash_delete`
//! - publish/subscribe on named channels
//!
//! The `CoordinationStore` trait is what the coordinator consumes. The
//! bundled `StateStore` implements it on top of [redb](https://docs.rs/redb),
//! either on disk or in memory (the latter for tests). Values are plain
//! strings; callers choose their own encoding (JSON for records).

pub mod error;
pub mod store;
pub mod tables;
pub mod traits;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use traits::CoordinationStore;
pub use types::TtlValue;
