//! Hot-tier client: typed wrapper over the key-value + JSON-document +
//! secondary-index + stream engine, with master/replica routing and an
//! in-process fallback for degraded operation.

mod client;
mod config;
mod error;
mod memory;
mod types;

pub use client::HotTier;
pub use config::HotTierConfig;
pub use error::HotTierError;
pub use memory::MemoryEngine;
pub use types::{
    HotTierStatus, IndexField, IndexFieldKind, SearchOptions, SearchResult, StreamEntry,
};
