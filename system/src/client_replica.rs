use crate::message::{SessionCommand, SessionEvent, StrokeFinalize};
use crate::operation::{Operation, Stroke};
use crate::operation_log::HistoryError;
use crate::room_state::{RoomSnapshot, RoomState};
use crate::types::{ConnectionId, Member, OperationId, Point};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicaError {
    #[error("no initial snapshot has been adopted yet")]
    NotInitialized,
    #[error("operation {0} is unknown to this replica")]
    UnknownOperation(OperationId),
}

/// A client's follower copy of one room.
///
/// It never decides undo/redo targets itself; it toggles whatever id the
/// server broadcast. Strokes finalized locally stay pending until the server
/// echoes them back with the same id.
#[derive(Debug, Default)]
pub struct ClientReplica {
    self_id: Option<ConnectionId>,
    room: RoomState,
    pending: Vec<Operation>,
}

impl ClientReplica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn self_id(&self) -> Option<ConnectionId> {
        self.self_id
    }

    /// Builds the command for a stroke the user just finished and keeps it as
    /// an optimistic render.
    pub fn finalize_stroke(
        &mut self,
        points: Vec<Point>,
        color: String,
        width: f32,
    ) -> Result<SessionCommand, ReplicaError> {
        let owner = self.self_id.ok_or(ReplicaError::NotInitialized)?;
        let id = uuid::Uuid::new_v4();
        self.pending.push(Operation::stroke(
            id,
            Stroke {
                points: points.clone(),
                color: color.clone(),
                width,
                owner,
            },
        ));
        Ok(SessionCommand::StrokeFinalize(StrokeFinalize {
            stroke_id: Some(id),
            points,
            color,
            width,
        }))
    }

    /// Applies one event from the server. `Ok(true)` means the committed
    /// picture changed.
    pub fn handle_event(&mut self, event: SessionEvent) -> Result<bool, ReplicaError> {
        if let SessionEvent::Init { self_id, snapshot } = event {
            log::debug!(
                "Adopting snapshot as {}: {} operations",
                self_id,
                snapshot.log.len()
            );
            self.self_id = Some(self_id);
            self.room = RoomState::from(snapshot);
            self.pending.clear();
            return Ok(true);
        }
        if self.self_id.is_none() {
            return Err(ReplicaError::NotInitialized);
        }

        match event {
            SessionEvent::StrokeCommitted(op) => {
                self.pending.retain(|pending| pending.id != op.id);
                match self.room.follow_append(op) {
                    Ok(()) => Ok(true),
                    Err(HistoryError::DuplicateOperation(id)) => {
                        log::debug!("Already have operation {}", id);
                        Ok(false)
                    }
                    Err(e) => {
                        log::warn!("Ignoring committed operation: {}", e);
                        Ok(false)
                    }
                }
            }
            SessionEvent::Undone(id) => {
                if self.room.follow_undo(id) {
                    Ok(true)
                } else {
                    Err(ReplicaError::UnknownOperation(id))
                }
            }
            SessionEvent::Redone(id) => {
                if self.room.follow_redo(&id) {
                    Ok(true)
                } else {
                    Err(ReplicaError::UnknownOperation(id))
                }
            }
            SessionEvent::Cleared => {
                self.room.clear();
                Ok(true)
            }
            SessionEvent::MemberJoined(member) => {
                self.room.add_member(member);
                Ok(false)
            }
            SessionEvent::MemberLeft(member) => {
                self.room.remove_member(&member.id);
                Ok(false)
            }
            SessionEvent::Rejected(reason) => {
                log::warn!("Server rejected a command: {:?}", reason);
                Ok(false)
            }
            SessionEvent::StrokePreview { .. } | SessionEvent::Cursor { .. } => Ok(false),
            SessionEvent::Init { .. } => unreachable!("handled above"),
        }
    }

    pub fn visible_operations(&self) -> Vec<&Operation> {
        self.room.visible_operations()
    }

    pub fn pending_operations(&self) -> &[Operation] {
        &self.pending
    }

    pub fn members(&self) -> Vec<Member> {
        self.room.members()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.room.reconstruct()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(self_id: ConnectionId) -> ClientReplica {
        let mut replica = ClientReplica::new();
        replica
            .handle_event(SessionEvent::Init {
                self_id,
                snapshot: RoomSnapshot::default(),
            })
            .unwrap();
        replica
    }

    fn committed(command: &SessionCommand, owner: ConnectionId) -> Operation {
        match command {
            SessionCommand::StrokeFinalize(finalize) => Operation::stroke(
                finalize.stroke_id.expect("replica always sets an id"),
                Stroke {
                    points: finalize.points.clone(),
                    color: finalize.color.clone(),
                    width: finalize.width,
                    owner,
                },
            ),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn it_requires_init() {
        let mut replica = ClientReplica::new();
        assert_eq!(
            replica.handle_event(SessionEvent::Cleared),
            Err(ReplicaError::NotInitialized)
        );
        assert_eq!(
            replica
                .finalize_stroke(vec![Point::new(0.0, 0.0)], "red".into(), 1.0)
                .unwrap_err(),
            ReplicaError::NotInitialized
        );
    }

    #[test]
    fn it_reconciles_pending_stroke_with_echo() {
        let mut replica = joined(1);
        let command = replica
            .finalize_stroke(vec![Point::new(0.0, 0.0)], "red".into(), 1.0)
            .unwrap();
        assert_eq!(replica.pending_operations().len(), 1);
        assert!(replica.visible_operations().is_empty());

        let op = committed(&command, 1);
        assert_eq!(
            replica.handle_event(SessionEvent::StrokeCommitted(op.clone())),
            Ok(true)
        );
        assert!(replica.pending_operations().is_empty());
        assert_eq!(replica.visible_operations(), vec![&op]);

        assert_eq!(
            replica.handle_event(SessionEvent::StrokeCommitted(op)),
            Ok(false)
        );
    }

    #[test]
    fn it_replaces_state_on_init() {
        let mut replica = joined(1);
        let command = replica
            .finalize_stroke(vec![Point::new(0.0, 0.0)], "red".into(), 1.0)
            .unwrap();
        replica
            .handle_event(SessionEvent::StrokeCommitted(committed(&command, 1)))
            .unwrap();

        replica
            .handle_event(SessionEvent::Init {
                self_id: 9,
                snapshot: RoomSnapshot::default(),
            })
            .unwrap();
        assert_eq!(replica.self_id(), Some(9));
        assert!(replica.visible_operations().is_empty());
    }

    #[test]
    fn it_reports_unknown_undo_target() {
        let mut replica = joined(1);
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            replica.handle_event(SessionEvent::Undone(id)),
            Err(ReplicaError::UnknownOperation(id))
        );
        assert_eq!(
            replica.handle_event(SessionEvent::Redone(id)),
            Err(ReplicaError::UnknownOperation(id))
        );
    }

    #[test]
    fn it_tracks_members() {
        let mut replica = joined(1);
        let member = Member {
            id: 2,
            display_name: "lee".into(),
            display_color: "blue".into(),
        };
        replica
            .handle_event(SessionEvent::MemberJoined(member.clone()))
            .unwrap();
        assert_eq!(replica.members(), vec![member.clone()]);
        replica
            .handle_event(SessionEvent::MemberLeft(member))
            .unwrap();
        assert!(replica.members().is_empty());
    }
}
