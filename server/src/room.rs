use tokio::sync::mpsc::{channel, Sender};
use tokio::sync::oneshot;

use system::{
    ConnectionId, HistoryError, Member, RoomId, RoomState, SessionCommand, SessionEvent, Stroke,
};

use crate::connection::ConnectionCommand;
use crate::connection_tx_storage::{ConnectionTx, ConnectionTxStorage};
use crate::server::ServerTx;

pub type RoomTx = Sender<RoomCommand>;

#[derive(Debug)]
pub enum RoomCommand {
    Join {
        member: Member,
        tx: ConnectionTx,
    },
    Leave {
        connection_id: ConnectionId,
        /// Fires once the room can no longer send to the connection.
        done: Option<oneshot::Sender<()>>,
    },
    SessionCommand {
        from: ConnectionId,
        command: SessionCommand,
    },
}

/// Sole owner of one room's state. Every mutation of the room goes through
/// `handle_room_command`, one command at a time.
pub struct Room {
    room_id: RoomId,
    state: RoomState,
    connections: ConnectionTxStorage,
    /// Connections dropped for falling behind, not yet reported to the server.
    evicted: Vec<ConnectionId>,
}

impl Room {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            state: RoomState::new(),
            connections: ConnectionTxStorage::new(),
            evicted: Vec::new(),
        }
    }

    pub fn state(&self) -> &RoomState {
        &self.state
    }

    pub fn take_evicted(&mut self) -> Vec<ConnectionId> {
        std::mem::take(&mut self.evicted)
    }

    pub fn handle_room_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join { member, tx } => self.join(member, tx),
            RoomCommand::Leave {
                connection_id,
                done,
            } => {
                self.leave(&connection_id);
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            RoomCommand::SessionCommand { from, command } => {
                if self.state.has_member(&from) {
                    self.handle_session_command(from, command)
                } else {
                    log::warn!(
                        "Connection {} isn't a member of room {}; dropping {:?}",
                        from,
                        self.room_id,
                        command
                    );
                }
            }
        }
    }

    fn join(&mut self, member: Member, tx: ConnectionTx) {
        let connection_id = member.id;
        self.connections.insert(connection_id, tx);
        self.state.add_member(member.clone());
        log::info!(
            "Connection {} joined room {} as {:?}",
            connection_id,
            self.room_id,
            member.display_name
        );

        let init = SessionEvent::Init {
            self_id: connection_id,
            snapshot: self.state.reconstruct(),
        };
        if self.connections.publish_to(&connection_id, init) {
            self.publish(SessionEvent::MemberJoined(member), Some(connection_id));
        } else {
            self.connections.remove(&connection_id);
            self.state.remove_member(&connection_id);
            self.evicted.push(connection_id);
            log::warn!("Connection {} could not take the room snapshot", connection_id);
        }
    }

    fn leave(&mut self, connection_id: &ConnectionId) {
        self.connections.remove(connection_id);
        if let Some(member) = self.state.remove_member(connection_id) {
            log::info!("Connection {} left room {}", connection_id, self.room_id);
            self.publish(SessionEvent::MemberLeft(member), None);
        }
    }

    /// Delivers an event every member must see. A member whose queue is full
    /// has lost part of the history, so it is removed from the room and its
    /// peers are told it left.
    fn publish(&mut self, event: SessionEvent, without: Option<ConnectionId>) {
        let mut pending = vec![(event, without)];
        while let Some((event, without)) = pending.pop() {
            for connection_id in self.connections.publish(&event, without.as_ref()) {
                log::warn!(
                    "Connection {} fell behind in room {}; evicting",
                    connection_id,
                    self.room_id
                );
                self.connections.remove(&connection_id);
                self.evicted.push(connection_id);
                if let Some(member) = self.state.remove_member(&connection_id) {
                    pending.push((SessionEvent::MemberLeft(member), None));
                }
            }
        }
    }

    fn handle_session_command(&mut self, from: ConnectionId, command: SessionCommand) {
        match command {
            SessionCommand::StrokePreview(preview) => {
                self.connections
                    .broadcast(&SessionEvent::StrokePreview { from, preview }, Some(&from));
            }
            SessionCommand::Cursor(position) => {
                self.connections
                    .broadcast(&SessionEvent::Cursor { from, position }, Some(&from));
            }
            SessionCommand::StrokeFinalize(finalize) => {
                let stroke = Stroke {
                    points: finalize.points,
                    color: finalize.color,
                    width: finalize.width,
                    owner: from,
                };
                match self.state.record_stroke(finalize.stroke_id, stroke) {
                    Ok(op) => {
                        log::debug!("Room {}: recorded {}", self.room_id, op.id);
                        self.publish(SessionEvent::StrokeCommitted(op), None);
                    }
                    Err(HistoryError::DuplicateOperation(id)) => {
                        log::debug!("Room {}: ignoring re-delivered {}", self.room_id, id);
                    }
                    Err(e) => log::warn!("Room {}: {}", self.room_id, e),
                }
            }
            SessionCommand::Undo => match self.state.undo() {
                Some(id) => self.publish(SessionEvent::Undone(id), None),
                None => log::debug!("Room {}: nothing to undo", self.room_id),
            },
            SessionCommand::Redo => match self.state.redo() {
                Some(id) => self.publish(SessionEvent::Redone(id), None),
                None => log::debug!("Room {}: nothing to redo", self.room_id),
            },
            SessionCommand::Clear => {
                self.state.clear();
                log::info!("Room {} cleared by {}", self.room_id, from);
                self.publish(SessionEvent::Cleared, None);
            }
            SessionCommand::Join { .. } => {
                log::warn!("Join must be routed by the server, not the room");
            }
        }
    }
}

pub fn spawn_room(room_id: RoomId, capacity: usize, srv_tx: ServerTx) -> RoomTx {
    let (room_tx, mut room_rx) = channel::<RoomCommand>(capacity);

    tokio::spawn(async move {
        log::debug!("Room {} task started", room_id);
        let mut room = Room::new(room_id);

        while let Some(command) = room_rx.recv().await {
            room.handle_room_command(command);
            for from in room.take_evicted() {
                // the server may be waiting on this room, so don't wait on it here
                let srv_tx = srv_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = srv_tx.send(ConnectionCommand::Disconnect { from }).await {
                        log::error!("Server is gone; dropped {:?}", e.0);
                    }
                });
            }
        }
        log::info!("Room {} stopped", room.room_id);
    });

    room_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionEvent;
    use system::{ClientReplica, CursorPosition, Point, StrokeFinalize, StrokePreview};
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::sync::mpsc::Receiver;

    fn join(room: &mut Room, id: ConnectionId) -> Receiver<ConnectionEvent> {
        join_with_queue(room, id, 64)
    }

    fn join_with_queue(
        room: &mut Room,
        id: ConnectionId,
        capacity: usize,
    ) -> Receiver<ConnectionEvent> {
        let (tx, rx) = channel(capacity);
        room.handle_room_command(RoomCommand::Join {
            member: Member {
                id,
                display_name: format!("user {}", id),
                display_color: "#123456".into(),
            },
            tx,
        });
        rx
    }

    fn drain(rx: &mut Receiver<ConnectionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                ConnectionEvent::SessionEvent(event) => events.push(event),
                other => panic!("unexpected {:?}", other),
            }
        }
        events
    }

    fn command(room: &mut Room, from: ConnectionId, command: SessionCommand) {
        room.handle_room_command(RoomCommand::SessionCommand { from, command });
    }

    fn finalize(stroke_id: Option<system::OperationId>) -> SessionCommand {
        SessionCommand::StrokeFinalize(StrokeFinalize {
            stroke_id,
            points: vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)],
            color: "black".into(),
            width: 2.0,
        })
    }

    #[test]
    fn it_sends_snapshot_on_join_and_notifies_others() {
        let mut room = Room::new("lobby".into());
        let mut first = join(&mut room, 1);
        command(&mut room, 1, finalize(None));
        drain(&mut first);

        let mut second = join(&mut room, 2);
        match drain(&mut second).as_slice() {
            [SessionEvent::Init { self_id, snapshot }] => {
                assert_eq!(*self_id, 2);
                assert_eq!(snapshot.log.len(), 1);
                assert_eq!(snapshot.members.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        match drain(&mut first).as_slice() {
            [SessionEvent::MemberJoined(member)] => assert_eq!(member.id, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn it_broadcasts_committed_stroke_to_everyone() {
        let mut room = Room::new("lobby".into());
        let mut first = join(&mut room, 1);
        let mut second = join(&mut room, 2);
        drain(&mut first);
        drain(&mut second);

        let id = uuid_of(&mut room, 1);
        for rx in [&mut first, &mut second] {
            match drain(rx).as_slice() {
                [SessionEvent::StrokeCommitted(op)] => {
                    assert_eq!(op.id, id);
                    assert_eq!(op.as_stroke().map(|s| s.owner), Some(1));
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        // re-delivery is swallowed
        command(&mut room, 1, finalize(Some(id)));
        assert!(drain(&mut first).is_empty());
        assert_eq!(room.state().log().len(), 1);
    }

    fn uuid_of(room: &mut Room, from: ConnectionId) -> system::OperationId {
        let id = system::uuid::Uuid::new_v4();
        command(room, from, finalize(Some(id)));
        id
    }

    #[test]
    fn it_relays_previews_and_cursors_to_peers_only() {
        let mut room = Room::new("lobby".into());
        let mut first = join(&mut room, 1);
        let mut second = join(&mut room, 2);
        drain(&mut first);
        drain(&mut second);

        command(
            &mut room,
            1,
            SessionCommand::StrokePreview(StrokePreview {
                stroke_id: system::uuid::Uuid::new_v4(),
                points: vec![Point::new(0.0, 0.0)],
                color: "black".into(),
                width: 1.0,
            }),
        );
        command(
            &mut room,
            1,
            SessionCommand::Cursor(CursorPosition { x: 0.5, y: 0.5 }),
        );

        assert!(drain(&mut first).is_empty());
        assert_eq!(drain(&mut second).len(), 2);
        assert!(room.state().log().is_empty());
    }

    #[test]
    fn it_broadcasts_only_transition_ids() {
        let mut room = Room::new("lobby".into());
        let mut first = join(&mut room, 1);
        let id = uuid_of(&mut room, 1);
        drain(&mut first);

        command(&mut room, 1, SessionCommand::Undo);
        command(&mut room, 1, SessionCommand::Undo);
        command(&mut room, 1, SessionCommand::Redo);
        command(&mut room, 1, SessionCommand::Redo);
        command(&mut room, 1, SessionCommand::Clear);

        assert_eq!(
            drain(&mut first),
            vec![
                SessionEvent::Undone(id),
                SessionEvent::Redone(id),
                SessionEvent::Cleared
            ]
        );
    }

    #[test]
    fn it_ignores_commands_from_non_members() {
        let mut room = Room::new("lobby".into());
        let mut first = join(&mut room, 1);
        drain(&mut first);

        command(&mut room, 5, finalize(None));
        assert!(room.state().log().is_empty());
        assert!(drain(&mut first).is_empty());
    }

    #[test]
    fn it_announces_leave_and_keeps_history() {
        let mut room = Room::new("lobby".into());
        let mut first = join(&mut room, 1);
        let mut second = join(&mut room, 2);
        uuid_of(&mut room, 2);
        drain(&mut first);

        room.handle_room_command(RoomCommand::Leave {
            connection_id: 2,
            done: None,
        });
        match drain(&mut first).as_slice() {
            [SessionEvent::MemberLeft(member)] => assert_eq!(member.id, 2),
            other => panic!("unexpected {:?}", other),
        }
        drain(&mut second);
        room.handle_room_command(RoomCommand::Leave {
            connection_id: 1,
            done: None,
        });
        assert_eq!(room.state().log().len(), 1);
        assert!(room.state().members().is_empty());
    }

    #[test]
    fn it_evicts_member_that_falls_behind() {
        let mut room = Room::new("lobby".into());
        let mut peer = join(&mut room, 2);
        let mut slow = join_with_queue(&mut room, 1, 3);
        drain(&mut peer);

        command(&mut room, 1, finalize(None));
        command(&mut room, 1, finalize(None));
        command(&mut room, 1, SessionCommand::Undo);

        assert_eq!(room.take_evicted(), vec![1]);
        assert!(room.take_evicted().is_empty());
        assert!(!room.state().has_member(&1));
        assert_eq!(room.state().visible_operations().len(), 1);

        // the slow client gets what fit, then sees its stream end
        let mut replica = ClientReplica::new();
        for event in drain(&mut slow) {
            replica.handle_event(event).unwrap();
        }
        assert_eq!(slow.try_recv().unwrap_err(), TryRecvError::Disconnected);
        assert_eq!(replica.visible_operations().len(), 2);

        match drain(&mut peer).last() {
            Some(SessionEvent::MemberLeft(member)) => assert_eq!(member.id, 1),
            other => panic!("unexpected {:?}", other),
        }

        // rejoining brings the client back in sync
        let mut rejoined = join(&mut room, 1);
        for event in drain(&mut rejoined) {
            replica.handle_event(event).unwrap();
        }
        assert_eq!(
            replica
                .visible_operations()
                .iter()
                .map(|op| op.id)
                .collect::<Vec<_>>(),
            room.state()
                .visible_operations()
                .iter()
                .map(|op| op.id)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn it_evicts_joiner_that_cannot_take_snapshot() {
        let mut room = Room::new("lobby".into());
        let mut peer = join(&mut room, 2);
        drain(&mut peer);

        let (tx, _rx) = channel(1);
        tx.try_send(ConnectionEvent::Connected { connection_id: 1 })
            .unwrap();
        room.handle_room_command(RoomCommand::Join {
            member: Member {
                id: 1,
                display_name: "late".into(),
                display_color: "#000000".into(),
            },
            tx,
        });

        assert_eq!(room.take_evicted(), vec![1]);
        assert!(!room.state().has_member(&1));
        assert!(drain(&mut peer).is_empty());
    }
}
