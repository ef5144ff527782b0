//! Linear undo/redo log of [`FilterOperation`]s.
//!
//! The log is a single vector plus a count of applied entries. Entries past
//! that count form the redo branch; recording a new operation while the
//! branch is non-empty discards it. Undo and redo at a boundary return
//! `false` rather than failing; editors use that to disable their controls.

use crate::operation::{FilterOperation, optimize};
use crate::params::FilterParameterSet;

#[derive(Debug, Clone, Default)]
pub struct OperationHistory {
    operations: Vec<FilterOperation>,
    /// Number of applied operations (cursor + 1).
    applied: usize,
}

/// A history panel row.
#[derive(Debug, Clone, Copy)]
pub struct HistoryEntry<'a> {
    pub index: usize,
    pub operation: &'a FilterOperation,
    pub applied: bool,
}

impl OperationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an already-applied operation, discarding any redo branch.
    pub fn record(&mut self, operation: FilterOperation) {
        if self.applied < self.operations.len() {
            let dropped = self.operations.len() - self.applied;
            tracing::debug!(dropped, "truncating redo branch");
            self.operations.truncate(self.applied);
        }
        self.operations.push(operation);
        self.applied += 1;
    }

    /// Revert the most recent applied operation on `params`.
    pub fn undo(&mut self, params: &mut FilterParameterSet) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.applied -= 1;
        self.operations[self.applied].inverse().apply(params);
        true
    }

    /// Re-apply the next operation of the redo branch on `params`.
    pub fn redo(&mut self, params: &mut FilterParameterSet) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.operations[self.applied].apply(params);
        self.applied += 1;
        true
    }

    pub fn can_undo(&self) -> bool {
        self.applied > 0
    }

    pub fn can_redo(&self) -> bool {
        self.applied < self.operations.len()
    }

    /// Index of the last applied operation; `None` when nothing is applied.
    pub fn position(&self) -> Option<usize> {
        self.applied.checked_sub(1)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn clear(&mut self) {
        self.operations.clear();
        self.applied = 0;
    }

    pub fn undo_description(&self) -> Option<String> {
        self.position().map(|i| self.operations[i].description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.operations.get(self.applied).map(|op| op.description())
    }

    pub fn entries(&self) -> impl Iterator<Item = HistoryEntry<'_>> {
        self.operations
            .iter()
            .enumerate()
            .map(|(index, operation)| HistoryEntry {
                index,
                operation,
                applied: index < self.applied,
            })
    }

    /// Merge adjacent same-property operations on the applied side.
    ///
    /// The redo branch is kept verbatim, so redo still replays the same
    /// transitions. Returns the number of entries removed.
    pub fn compact(&mut self) -> usize {
        let redo = self.operations.split_off(self.applied);
        let before = self.operations.len();
        self.operations = optimize(&self.operations);
        self.applied = self.operations.len();
        self.operations.extend(redo);
        before - self.applied
    }
}
