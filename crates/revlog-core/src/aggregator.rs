//! Authoritative session state and snapshot generation.

use std::sync::Arc;

use tracing::debug;

use crate::{Batch, Record, SizeLimiter, Snapshot};

/// Records of the current refresh cycle, in arrival order.
#[derive(Debug)]
struct Session<R> {
    records: Arc<Vec<R>>,
    version: u64,
}

/// Owns the growing record log of one subject.
///
/// Records are kept oldest-admitted first. Every mutation is followed by a
/// trim to the limiter's cap that drops from the front, so retained records
/// are always the most recently admitted ones, in order.
///
/// Mutation goes through `Arc::make_mut`: while a published snapshot still
/// shares the list, the list is copied first, so snapshots never change.
#[derive(Debug)]
pub struct SessionAggregator<R> {
    limiter: Arc<SizeLimiter>,
    session: Option<Session<R>>,
    cycle: u64,
}

impl<R: Record> SessionAggregator<R> {
    #[must_use]
    pub const fn new(limiter: Arc<SizeLimiter>) -> Self {
        Self {
            limiter,
            session: None,
            cycle: 0,
        }
    }

    /// Current refresh cycle number (0 before the first cycle starts).
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    #[must_use]
    pub const fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Drop the previous cycle's session and start counting a new cycle.
    pub fn begin_cycle(&mut self) -> u64 {
        self.session = None;
        self.cycle += 1;
        self.cycle
    }

    /// Establish the session from the first authoritative view of a cycle.
    ///
    /// The view is trimmed to the cap straight away. Replacing an existing
    /// session keeps the version counter running.
    pub fn replace_initial(&mut self, records: Vec<R>) -> Snapshot<R> {
        let version = self.session.as_ref().map_or(0, |s| s.version + 1);
        let session = self.session.insert(Session {
            records: Arc::new(records),
            version,
        });
        let dropped = Self::trim(&self.limiter, session);
        debug!(
            cycle = self.cycle,
            size = session.records.len(),
            dropped,
            "Established initial session"
        );
        Self::snapshot_of(self.cycle, session)
    }

    /// Append a batch, trim to the cap, and return the resulting snapshot.
    ///
    /// A batch arriving before any initial view starts from an empty session.
    pub fn apply_batch(&mut self, batch: Batch<R>) -> Snapshot<R> {
        let batch_seq = batch.seq();
        let session = self.session.get_or_insert_with(|| Session {
            records: Arc::new(Vec::new()),
            version: 0,
        });

        Arc::make_mut(&mut session.records).extend(batch.into_records());
        session.version += 1;
        let dropped = Self::trim(&self.limiter, session);

        debug!(
            cycle = self.cycle,
            batch_seq,
            version = session.version,
            size = session.records.len(),
            dropped,
            "Applied batch"
        );
        Self::snapshot_of(self.cycle, session)
    }

    /// Snapshot of the current state, if a session exists.
    #[must_use]
    pub fn current_snapshot(&self) -> Option<Snapshot<R>> {
        self.session
            .as_ref()
            .map(|session| Self::snapshot_of(self.cycle, session))
    }

    fn trim(limiter: &SizeLimiter, session: &mut Session<R>) -> usize {
        let overflow = limiter.overflow_by(session.records.len());
        if overflow > 0 {
            Arc::make_mut(&mut session.records).drain(..overflow);
        }
        overflow
    }

    fn snapshot_of(cycle: u64, session: &Session<R>) -> Snapshot<R> {
        Snapshot::new(cycle, session.version, Arc::clone(&session.records))
    }
}
