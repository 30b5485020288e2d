use crate::room::RoomTx;
use std::collections::{HashMap, HashSet};
use std::num::Wrapping;
use system::{ConnectionId, RoomId};

/// Directory of live connections and rooms. Knows where every connection is,
/// never what a room contains.
pub struct ServerState {
    connection_id_source: Wrapping<ConnectionId>,
    connections: HashSet<ConnectionId>,
    connection_locations: HashMap<ConnectionId, RoomId>,
    rooms: HashMap<RoomId, RoomTx>,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            connection_id_source: Wrapping(0),
            connections: HashSet::new(),
            connection_locations: HashMap::new(),
            rooms: HashMap::new(),
        }
    }

    pub fn create_connection(&mut self) -> ConnectionId {
        let connection_id = self.new_connection_id();
        self.connections.insert(connection_id);
        connection_id
    }

    /// Forgets the connection. Returns the room it was still in, if any.
    pub fn disconnect(&mut self, connection_id: &ConnectionId) -> Option<(RoomId, RoomTx)> {
        let location = self.leave_room(connection_id);
        self.connections.remove(connection_id);
        location
    }

    pub fn is_connected(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains(connection_id)
    }

    pub fn room_of(&self, connection_id: &ConnectionId) -> Option<(&RoomId, &RoomTx)> {
        self.connection_locations
            .get(connection_id)
            .and_then(|room_id| self.rooms.get_key_value(room_id))
    }

    /// Places the connection in `room_id`, spawning the room on first use.
    pub fn join_room<F>(
        &mut self,
        connection_id: ConnectionId,
        room_id: &RoomId,
        spawn: F,
    ) -> RoomTx
    where
        F: FnOnce() -> RoomTx,
    {
        let room_tx = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(spawn)
            .clone();
        self.connection_locations.insert(connection_id, room_id.clone());
        room_tx
    }

    pub fn leave_room(&mut self, connection_id: &ConnectionId) -> Option<(RoomId, RoomTx)> {
        let room_id = self.connection_locations.remove(connection_id)?;
        let room_tx = self.rooms.get(&room_id)?.clone();
        Some((room_id, room_tx))
    }

    pub fn has_room(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn new_connection_id(&mut self) -> ConnectionId {
        loop {
            self.connection_id_source += Wrapping(1);
            let candidate = self.connection_id_source.0;
            if !self.connections.contains(&candidate) {
                break candidate;
            }
        }
    }
}
