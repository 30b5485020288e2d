use tokio::sync::mpsc::{channel, Sender};
use tokio::sync::oneshot;

use system::{
    member_profile, ConnectionId, Member, RejectReason, RoomId, SessionCommand, SessionEvent,
};

use super::connection::{ConnectionCommand, ConnectionEvent};
use crate::config::ServerConfig;
use crate::connection_tx_storage::ConnectionTxStorage;
use crate::room::{spawn_room, RoomCommand, RoomTx};
use crate::server_state::ServerState;

pub type ServerTx = Sender<ConnectionCommand>;

/// Routes connections to rooms. Owns no room state: joins create rooms on
/// demand and everything else is forwarded to the room's own task.
struct Server {
    server_state: ServerState,
    connections: ConnectionTxStorage,
    room_queue_capacity: usize,
    /// Handed to rooms so they can report evicted connections.
    srv_tx: ServerTx,
}

impl Server {
    fn new(config: &ServerConfig, srv_tx: ServerTx) -> Self {
        Self {
            server_state: ServerState::new(),
            connections: ConnectionTxStorage::new(),
            room_queue_capacity: config.room_queue_capacity,
            srv_tx,
        }
    }

    async fn handle_connection_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Connect { tx } => {
                let connection_id = self.server_state.create_connection();
                self.connections.insert(connection_id, tx);
                log::info!("Connection {} established", connection_id);
                self.connections
                    .send(&connection_id, ConnectionEvent::Connected { connection_id });
            }
            ConnectionCommand::Disconnect { from } => {
                if let Some((room_id, room_tx)) = self.server_state.disconnect(&from) {
                    let command = RoomCommand::Leave {
                        connection_id: from,
                        done: None,
                    };
                    self.send_to_room(&room_id, &room_tx, command).await;
                }
                if self.connections.remove(&from).is_some() {
                    log::info!("Connection {} closed", from);
                }
            }
            ConnectionCommand::SessionCommand { from, command } => {
                if !self.server_state.is_connected(&from) {
                    log::warn!("Command from unknown connection {}", from);
                    return;
                }
                if let Err(reason) = command.validate() {
                    self.reject(&from, reason);
                    return;
                }
                match command {
                    SessionCommand::Join {
                        room_id,
                        display_name,
                        display_color,
                    } => {
                        let member = member_profile(from, &display_name, &display_color);
                        self.join_room(room_id.trim().to_owned(), member).await
                    }
                    command => self.forward(from, command).await,
                }
            }
        }
    }

    async fn join_room(&mut self, room_id: RoomId, member: Member) {
        let connection_id = member.id;
        let tx = match self.connections.get(&connection_id) {
            Some(tx) => tx.clone(),
            None => {
                log::warn!("Connection {} has no egress channel", connection_id);
                return;
            }
        };

        if let Some((previous, room_tx)) = self.server_state.leave_room(&connection_id) {
            log::info!("Connection {} moves out of room {}", connection_id, previous);
            // the old room must be done with this connection before the new
            // room's snapshot goes out on the same channel
            let (done_tx, done_rx) = oneshot::channel();
            let command = RoomCommand::Leave {
                connection_id,
                done: Some(done_tx),
            };
            self.send_to_room(&previous, &room_tx, command).await;
            if done_rx.await.is_err() {
                log::warn!("Room {} did not confirm the leave", previous);
            }
        }

        if !self.server_state.has_room(&room_id) {
            log::info!(
                "Creating room {} ({} rooms open)",
                room_id,
                self.server_state.room_count() + 1
            );
        }
        let capacity = self.room_queue_capacity;
        let srv_tx = self.srv_tx.clone();
        let room_tx = self.server_state.join_room(connection_id, &room_id, || {
            spawn_room(room_id.clone(), capacity, srv_tx)
        });
        self.send_to_room(&room_id, &room_tx, RoomCommand::Join { member, tx })
            .await;
    }

    async fn forward(&mut self, from: ConnectionId, command: SessionCommand) {
        match self.server_state.room_of(&from) {
            Some((room_id, room_tx)) => {
                let (room_id, room_tx) = (room_id.clone(), room_tx.clone());
                let command = RoomCommand::SessionCommand { from, command };
                self.send_to_room(&room_id, &room_tx, command).await;
            }
            None => self.reject(&from, RejectReason::NotJoined),
        }
    }

    /// Waits for queue space so room commands are never dropped or reordered.
    async fn send_to_room(&self, room_id: &RoomId, room_tx: &RoomTx, command: RoomCommand) {
        if let Err(e) = room_tx.send(command).await {
            log::error!("Room {} is gone; dropped {:?}", room_id, e.0);
        }
    }

    fn reject(&self, to: &ConnectionId, reason: RejectReason) {
        log::warn!("Rejecting a command from {}: {:?}", to, reason);
        self.connections.send_event(to, SessionEvent::Rejected(reason));
    }
}

pub fn spawn_server(config: &ServerConfig) -> ServerTx {
    let (srv_tx, mut srv_rx) = channel::<ConnectionCommand>(config.server_queue_capacity);
    let mut server = Box::new(Server::new(config, srv_tx.clone()));

    tokio::spawn(async move {
        while let Some(command) = srv_rx.recv().await {
            server.handle_connection_command(command).await;
        }
    });

    srv_tx
}
