//! Buffered aggregation and ordered publishing of incrementally loaded logs.
//!
//! This crate provides the building blocks:
//! - `SizeLimiter` - Cap accounting per refresh cycle
//! - `Batcher` - Size/time triggered batching with serialized delivery
//! - `SessionAggregator` - Growing record log with copy-on-write snapshots
//! - `Publisher` - Ordered hand-off to a single consumer task
//! - `SnapshotStore` - Latest state + broadcast for late subscribers

pub mod aggregator;
pub mod batcher;
pub mod config;
pub mod limiter;
pub mod publisher;
pub mod record;
pub mod snapshot_store;
pub mod traits;

pub use aggregator::SessionAggregator;
pub use batcher::Batcher;
pub use config::{ConfigError, SessionConfig};
pub use limiter::SizeLimiter;
pub use publisher::Publisher;
pub use record::{Batch, Record, Snapshot};
pub use snapshot_store::{SessionEvent, SnapshotStore};
pub use traits::{BatchHandler, ProducerError, PublishError, SessionConsumer};
