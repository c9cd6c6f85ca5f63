//! Transport layer for history viewers.
//!
//! Provides:
//! - Wire protocol (tagged JSON)
//! - WebSocket streaming of a `SnapshotStore` (feature: websocket)

pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{ClientMessage, ServerMessage};
