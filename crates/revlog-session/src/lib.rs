//! Refresh-cycle orchestration for history sessions.
//!
//! Provides:
//! - `SessionController` - Lifecycle contract between producer and consumer
//! - `RecordProducer` - Trait for the component that discovers records

pub mod controller;
pub mod producer;

pub use controller::{Admission, ControllerError, CycleState, SessionController, SessionId};
pub use producer::{RecordProducer, RefreshOutcome};
