use crate::operation::{Operation, Stroke};
use crate::operation_log::{HistoryError, OperationLog};
use crate::types::{ConnectionId, Member, OperationId};
use crate::undo_stack::UndoStack;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything a newly joined participant needs to adopt to match the room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub log: Vec<Operation>,
    pub suppressed: Vec<OperationId>,
    pub members: Vec<Member>,
}

impl RoomSnapshot {
    /// Log minus suppressed, in log order.
    pub fn visible_operations(&self) -> Vec<&Operation> {
        self.log
            .iter()
            .filter(|op| !self.suppressed.contains(&op.id))
            .collect()
    }
}

/// History, undo stack and membership of one room.
///
/// Not synchronized. Whoever owns a `RoomState` must be its only writer.
#[derive(Debug, Default)]
pub struct RoomState {
    log: OperationLog,
    undo_stack: UndoStack,
    members: BTreeMap<ConnectionId, Member>,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a finished stroke, generating an id when none was supplied.
    /// Returns the canonical stored operation.
    pub fn record_stroke(
        &mut self,
        id: Option<OperationId>,
        stroke: Stroke,
    ) -> Result<Operation, HistoryError> {
        let op = Operation::stroke(id.unwrap_or_else(uuid::Uuid::new_v4), stroke);
        self.append(op.clone())?;
        Ok(op)
    }

    fn append(&mut self, op: Operation) -> Result<(), HistoryError> {
        self.log.append(op)?;
        // a new edit abandons the undone branch for good
        let abandoned = self.undo_stack.invalidate();
        self.log.discard(&abandoned);
        Ok(())
    }

    pub fn undo(&mut self) -> Option<OperationId> {
        self.undo_stack.undo(&self.log)
    }

    pub fn redo(&mut self) -> Option<OperationId> {
        self.undo_stack.redo(&self.log)
    }

    pub fn clear(&mut self) {
        self.log.reset();
        self.undo_stack.invalidate();
    }

    pub fn reconstruct(&self) -> RoomSnapshot {
        RoomSnapshot {
            log: self.log.snapshot(),
            suppressed: self.undo_stack.snapshot(),
            members: self.members(),
        }
    }

    pub fn visible_operations(&self) -> Vec<&Operation> {
        self.log
            .iter()
            .filter(|op| !self.undo_stack.is_suppressed(&op.id))
            .collect()
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn suppressed(&self) -> Vec<OperationId> {
        self.undo_stack.snapshot()
    }

    pub fn add_member(&mut self, member: Member) -> Option<Member> {
        self.members.insert(member.id, member)
    }

    pub fn remove_member(&mut self, id: &ConnectionId) -> Option<Member> {
        self.members.remove(id)
    }

    pub fn has_member(&self, id: &ConnectionId) -> bool {
        self.members.contains_key(id)
    }

    pub fn members(&self) -> Vec<Member> {
        self.members.values().cloned().collect()
    }

    /// Applies an undo that was decided by the authoritative copy.
    pub(crate) fn follow_undo(&mut self, id: OperationId) -> bool {
        self.log.contains(&id) && self.undo_stack.suppress(id)
    }

    /// Applies a redo that was decided by the authoritative copy.
    pub(crate) fn follow_redo(&mut self, id: &OperationId) -> bool {
        self.undo_stack.release(id)
    }

    /// Appends an operation that was accepted by the authoritative copy.
    pub(crate) fn follow_append(&mut self, op: Operation) -> Result<(), HistoryError> {
        self.append(op)
    }
}

impl From<RoomSnapshot> for RoomState {
    fn from(snapshot: RoomSnapshot) -> Self {
        let log = OperationLog::from(snapshot.log);
        let suppressed = snapshot
            .suppressed
            .into_iter()
            .filter(|id| log.contains(id))
            .collect::<Vec<_>>();
        Self {
            log,
            undo_stack: UndoStack::from(suppressed),
            members: snapshot
                .members
                .into_iter()
                .map(|member| (member.id, member))
                .collect(),
        }
    }
}
