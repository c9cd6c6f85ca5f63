//! Record, batch and snapshot types.

use std::{fmt, ops::Deref, sync::Arc};

/// Marker for values that can flow through a session.
///
/// Records are opaque to this crate; only their position matters.
pub trait Record: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T> Record for T where T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

/// Records collected between two flush points.
///
/// A batch handed to a [`BatchHandler`](crate::BatchHandler) is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<R> {
    seq: u64,
    records: Vec<R>,
}

impl<R> Batch<R> {
    /// Create a batch. Returns `None` for an empty record list.
    #[must_use]
    pub fn new(seq: u64, records: Vec<R>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(Self { seq, records })
        }
    }

    /// Position of this batch in the batcher's flush order.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn records(&self) -> &[R] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<R> {
        self.records
    }
}

/// Immutable view of a session at one point in time.
///
/// Cloning is cheap: the record list is shared. The session that produced
/// the snapshot copies its list before the next mutation, so the contents
/// seen through a snapshot never change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<R> {
    cycle: u64,
    version: u64,
    records: Arc<Vec<R>>,
}

impl<R> Snapshot<R> {
    pub(crate) const fn new(cycle: u64, version: u64, records: Arc<Vec<R>>) -> Self {
        Self {
            cycle,
            version,
            records,
        }
    }

    /// Refresh cycle this snapshot belongs to.
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Increases with every snapshot taken within a cycle.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn records(&self) -> &[R] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether `self` shares its record list with `other` (no copy was made).
    #[must_use]
    pub fn shares_records_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.records, &other.records)
    }
}

impl<R: Clone> Snapshot<R> {
    /// Copy the records out of the snapshot.
    #[must_use]
    pub fn to_vec(&self) -> Vec<R> {
        self.records.as_ref().clone()
    }
}

impl<R> Deref for Snapshot<R> {
    type Target = [R];

    fn deref(&self) -> &Self::Target {
        &self.records
    }
}
