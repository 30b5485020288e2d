use crate::operation_log::OperationLog;
use crate::types::OperationId;

/// Ids of logged operations that are currently undone, most recently undone
/// last. Always a duplicate-free subset of the ids in the room's log.
#[derive(Debug, Default, Clone)]
pub struct UndoStack {
    suppressed: Vec<OperationId>,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppresses the newest operation of `log` that isn't suppressed yet.
    /// `None` means there is nothing to undo.
    pub fn undo(&mut self, log: &OperationLog) -> Option<OperationId> {
        let target = log
            .iter()
            .rev()
            .map(|op| op.id)
            .find(|id| !self.suppressed.contains(id))?;
        self.suppressed.push(target);
        Some(target)
    }

    /// Releases the most recently suppressed operation. `None` means there is
    /// nothing to redo.
    pub fn redo(&mut self, log: &OperationLog) -> Option<OperationId> {
        while let Some(id) = self.suppressed.pop() {
            if log.contains(&id) {
                return Some(id);
            }
            log::warn!("Dropping stale redo target {}", id);
        }
        None
    }

    /// Empties the stack, returning what was suppressed.
    pub fn invalidate(&mut self) -> Vec<OperationId> {
        std::mem::take(&mut self.suppressed)
    }

    pub fn is_suppressed(&self, id: &OperationId) -> bool {
        self.suppressed.contains(id)
    }

    pub fn snapshot(&self) -> Vec<OperationId> {
        self.suppressed.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.suppressed.is_empty()
    }

    /// Follower side of an undo decided elsewhere.
    pub(crate) fn suppress(&mut self, id: OperationId) -> bool {
        if self.suppressed.contains(&id) {
            false
        } else {
            self.suppressed.push(id);
            true
        }
    }

    /// Follower side of a redo decided elsewhere.
    pub(crate) fn release(&mut self, id: &OperationId) -> bool {
        match self.suppressed.iter().rposition(|s| s == id) {
            Some(pos) => {
                self.suppressed.remove(pos);
                true
            }
            None => false,
        }
    }
}

impl From<Vec<OperationId>> for UndoStack {
    fn from(ids: Vec<OperationId>) -> Self {
        let mut stack = Self::new();
        for id in ids {
            stack.suppress(id);
        }
        stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Operation, Stroke};

    fn log_of(n: usize) -> (OperationLog, Vec<OperationId>) {
        let mut log = OperationLog::new();
        let mut ids = Vec::new();
        for _ in 0..n {
            let id = uuid::Uuid::new_v4();
            log.append(Operation::stroke(
                id,
                Stroke {
                    points: vec![],
                    color: "red".into(),
                    width: 1.0,
                    owner: 0,
                },
            ))
            .unwrap();
            ids.push(id);
        }
        (log, ids)
    }

    #[test]
    fn it_undoes_newest_first() {
        let (log, ids) = log_of(3);
        let mut stack = UndoStack::new();

        assert_eq!(stack.undo(&log), Some(ids[2]));
        assert_eq!(stack.undo(&log), Some(ids[1]));
        assert_eq!(stack.redo(&log), Some(ids[1]));
        assert_eq!(stack.snapshot(), vec![ids[2]]);
    }

    #[test]
    fn it_reports_nothing_to_undo_when_everything_is_suppressed() {
        let (log, ids) = log_of(2);
        let mut stack = UndoStack::new();

        stack.undo(&log);
        stack.undo(&log);
        assert_eq!(stack.undo(&log), None);
        assert_eq!(stack.snapshot(), vec![ids[1], ids[0]]);
    }

    #[test]
    fn it_reports_nothing_on_empty_log() {
        let (log, _) = log_of(0);
        let mut stack = UndoStack::new();

        assert_eq!(stack.undo(&log), None);
        assert_eq!(stack.redo(&log), None);
    }

    #[test]
    fn it_skips_redo_targets_missing_from_log() {
        let (log, ids) = log_of(1);
        let mut stack = UndoStack::new();
        stack.undo(&log);
        stack.suppress(uuid::Uuid::new_v4());

        assert_eq!(stack.redo(&log), Some(ids[0]));
        assert!(stack.is_empty());
    }

    #[test]
    fn it_follows_suppress_and_release() {
        let id = uuid::Uuid::new_v4();
        let mut stack = UndoStack::new();

        assert!(stack.suppress(id));
        assert!(!stack.suppress(id));
        assert!(stack.is_suppressed(&id));
        assert!(stack.release(&id));
        assert!(!stack.release(&id));
    }
}
