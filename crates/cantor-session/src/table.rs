//! Live expressions of a session, keyed by id.

use std::collections::{BTreeMap, VecDeque};

use cantor_core::{ExpressionId, ExpressionSnapshot, ExpressionStatus, FinishingBehavior};
use tracing::debug;

use crate::expression::{ExpressionHandle, ExpressionRecord};

/// Finished expressions kept when no retention is configured.
pub const DEFAULT_RETENTION: usize = 100;

/// Expression registry.
///
/// Operations on ids that are no longer present do nothing, so output that
/// arrives for a forgotten expression is dropped instead of touching freed
/// state. Records with [`FinishingBehavior::DeleteOnFinish`] leave the table
/// as soon as they reach a terminal status; the others stay until more than
/// `retention` of them have finished, oldest first.
#[derive(Debug)]
pub struct ExpressionTable {
    next_id: u64,
    records: BTreeMap<ExpressionId, ExpressionRecord>,
    retention: usize,
    finished: VecDeque<ExpressionId>,
}

impl Default for ExpressionTable {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl ExpressionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table keeping at most `retention` finished records.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            next_id: 0,
            records: BTreeMap::new(),
            retention: retention.max(1),
            finished: VecDeque::new(),
        }
    }

    /// Register a new queued expression.
    pub fn create(
        &mut self,
        command: impl Into<String>,
        finishing_behavior: FinishingBehavior,
        internal: bool,
    ) -> ExpressionHandle {
        self.next_id += 1;
        let id = ExpressionId::new(self.next_id);
        let (record, handle) = ExpressionRecord::new(id, command, finishing_behavior, internal);
        self.records.insert(id, record);
        handle
    }

    /// Record by id.
    pub fn get(&self, id: ExpressionId) -> Option<&ExpressionRecord> {
        self.records.get(&id)
    }

    /// Mutable record by id.
    pub fn get_mut(&mut self, id: ExpressionId) -> Option<&mut ExpressionRecord> {
        self.records.get_mut(&id)
    }

    /// Handle to a known expression.
    pub fn handle(&self, id: ExpressionId) -> Option<ExpressionHandle> {
        self.records.get(&id).map(ExpressionRecord::handle)
    }

    /// Snapshot of a known expression.
    pub fn snapshot(&self, id: ExpressionId) -> Option<ExpressionSnapshot> {
        self.records.get(&id).map(ExpressionRecord::snapshot)
    }

    /// Apply `update` to the record, if it still exists.
    pub fn with<F>(&mut self, id: ExpressionId, update: F)
    where
        F: FnOnce(&mut ExpressionRecord),
    {
        match self.records.get_mut(&id) {
            Some(record) => update(record),
            None => debug!("Ignoring update for released expression {}", id),
        }
    }

    /// Change the status and release the record if it asked for it.
    ///
    /// Returns the final snapshot when the expression became terminal.
    pub fn set_status(
        &mut self,
        id: ExpressionId,
        status: ExpressionStatus,
    ) -> Option<ExpressionSnapshot> {
        let record = self.records.get_mut(&id)?;
        if !record.set_status(status) || !status.is_terminal() {
            return None;
        }

        let snapshot = record.snapshot();
        if record.finishing_behavior() == FinishingBehavior::DeleteOnFinish {
            debug!("Releasing expression {}", id);
            self.records.remove(&id);
        } else {
            self.retain(id);
        }
        Some(snapshot)
    }

    fn retain(&mut self, id: ExpressionId) {
        self.finished.push_back(id);
        while self.finished.len() > self.retention {
            if let Some(oldest) = self.finished.pop_front() {
                debug!("Evicting finished expression {}", oldest);
                self.records.remove(&oldest);
            }
        }
    }

    /// Drop a record regardless of its status.
    pub fn remove(&mut self, id: ExpressionId) -> Option<ExpressionRecord> {
        self.records.remove(&id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
