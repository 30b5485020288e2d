use crate::operation::Operation;
use crate::types::OperationId;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("operation {0} has already been recorded")]
    DuplicateOperation(OperationId),
    #[error("clear operations are not stored in the log")]
    ClearNotLoggable,
}

/// Append-only, ordered record of the operations accepted by one room.
///
/// Insertion order is the canonical order. Ids are remembered even after the
/// operation itself has left the log, so a re-delivered operation can never
/// come back.
#[derive(Debug, Default)]
pub struct OperationLog {
    ops: Vec<Operation>,
    accepted: HashSet<OperationId>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, op: Operation) -> Result<(), HistoryError> {
        if op.is_clear() {
            return Err(HistoryError::ClearNotLoggable);
        }
        if !self.accepted.insert(op.id) {
            return Err(HistoryError::DuplicateOperation(op.id));
        }
        self.ops.push(op);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Operation> {
        self.ops.clone()
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.ops.iter().any(|op| op.id == *id)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Operation> + '_ {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Drops operations of an abandoned undo branch. Only redo invalidation
    /// may call this.
    pub(crate) fn discard(&mut self, ids: &[OperationId]) {
        if !ids.is_empty() {
            self.ops.retain(|op| !ids.contains(&op.id));
        }
    }

    pub(crate) fn reset(&mut self) {
        self.ops.clear();
    }
}

impl From<Vec<Operation>> for OperationLog {
    fn from(ops: Vec<Operation>) -> Self {
        let mut log = Self::new();
        for op in ops {
            if let Err(e) = log.append(op) {
                log::warn!("Skipping operation while rebuilding log: {}", e);
            }
        }
        log
    }
}
