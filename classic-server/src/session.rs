// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Session table and the per-connection state machine.

use classic_protocol::UsernameString;

use crate::ring_buffer::RingBuffer;

/// A session's position in its own lifecycle.
///
/// Transitions are driven by the dispatcher in `dispatch.rs`:
/// `Handshaking -> Authenticating -> Connected -> Disconnecting ->
/// Disconnected`. There is no path backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Handshaking,
    Authenticating,
    Connected,
    Disconnecting,
    Disconnected,
}

/// One connected (or connecting) client.
pub struct Session {
    pub fd: i32,
    /// The entity ID sent back in an `authentication` response — the
    /// session's own table slot, stable for the life of the connection.
    pub entity_id: i32,
    pub status: SessionStatus,
    pub username: Option<UsernameString>,
    pub address: std::net::IpAddr,
    pub port: u16,
    pub inbound: RingBuffer,
    pub total_bytes_in: u64,
    pub total_bytes_out: u64,
}

impl Session {
    fn new(fd: i32, entity_id: i32, address: std::net::IpAddr, port: u16, inbound: RingBuffer) -> Self {
        Self {
            fd,
            entity_id,
            status: SessionStatus::Handshaking,
            username: None,
            address,
            port,
            inbound,
            total_bytes_in: 0,
            total_bytes_out: 0,
        }
    }
}

/// A fixed-size table of session slots, indexed by a linear scan for the
/// first free slot — matching the reference server's
/// `obs_server_get_available_session`, which is simplicity-over-scale since
/// `max_connections` only needs to support thousands, not millions, of
/// concurrent sessions.
pub struct SessionTable {
    slots: Vec<Option<Session>>,
}

/// An index into a [`SessionTable`]. Stable for the lifetime of the session
/// it names; reused only after [`SessionTable::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub usize);

impl SessionTable {
    pub fn with_capacity(max_connections: usize) -> Self {
        let mut slots = Vec::with_capacity(max_connections);
        slots.resize_with(max_connections, || None);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Finds the first free slot and occupies it with a new session in
    /// `Handshaking` state.
    ///
    /// Returns `None` if every slot is occupied (`max_connections` reached).
    pub fn insert(
        &mut self,
        fd: i32,
        address: std::net::IpAddr,
        port: u16,
        inbound: RingBuffer,
    ) -> Option<SessionId> {
        let index = self.slots.iter().position(|s| s.is_none())?;
        self.slots[index] = Some(Session::new(fd, index as i32, address, port, inbound));
        Some(SessionId(index))
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.slots.get(id.0).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.slots.get_mut(id.0).and_then(|s| s.as_mut())
    }

    /// Releases a session's slot, dropping its ring buffer (which unmaps its
    /// backing memory) and making the slot available for reuse.
    pub fn release(&mut self, id: SessionId) -> Option<Session> {
        self.slots.get_mut(id.0)?.take()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SessionId, &Session)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (SessionId(i), s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn insert_then_release_frees_the_slot() {
        let mut table = SessionTable::with_capacity(2);
        let a = table.insert(3, loopback(), 1234, RingBuffer::new(4096).unwrap()).unwrap();
        let b = table.insert(4, loopback(), 1235, RingBuffer::new(4096).unwrap()).unwrap();
        assert!(table.insert(5, loopback(), 1236, RingBuffer::new(4096).unwrap()).is_none());

        assert_eq!(table.len(), 2);
        table.release(a);
        assert_eq!(table.len(), 1);

        let c = table.insert(6, loopback(), 1237, RingBuffer::new(4096).unwrap()).unwrap();
        assert_eq!(c, a, "freed slot should be reused before growing");
        assert_ne!(c, b);
    }

    #[test]
    fn new_session_starts_handshaking() {
        let mut table = SessionTable::with_capacity(1);
        let id = table.insert(3, loopback(), 1234, RingBuffer::new(4096).unwrap()).unwrap();
        assert_eq!(table.get(id).unwrap().status, SessionStatus::Handshaking);
    }
}
