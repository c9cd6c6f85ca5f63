//! Wire protocol for history viewers.

use revlog_core::{SessionEvent, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a new refresh cycle.
    Refresh,
    /// Ping for keepalive.
    Ping,
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full view of the session; replaces whatever the client shows.
    Snapshot {
        cycle: u64,
        version: u64,
        records: Vec<Value>,
    },
    /// No more growth this refresh cycle.
    Finalized,
    /// The producer failed; records shown so far remain valid.
    Failure { message: String },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Encode a snapshot.
    ///
    /// # Errors
    /// Returns error if a record cannot be serialized.
    pub fn snapshot<R: Serialize>(snapshot: &Snapshot<R>) -> Result<Self, serde_json::Error> {
        let records = snapshot
            .records()
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()?;
        Ok(Self::Snapshot {
            cycle: snapshot.cycle(),
            version: snapshot.version(),
            records,
        })
    }

    /// Encode a session event.
    ///
    /// # Errors
    /// Returns error if a record cannot be serialized.
    pub fn from_event<R: Serialize>(event: &SessionEvent<R>) -> Result<Self, serde_json::Error> {
        match event {
            SessionEvent::Snapshot(snapshot) => Self::snapshot(snapshot),
            SessionEvent::Failure(error) => Ok(Self::Failure {
                message: error.message.clone(),
            }),
            SessionEvent::Finalized => Ok(Self::Finalized),
        }
    }
}
