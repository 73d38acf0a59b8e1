// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The session state machine and the packet dispatcher built on top of it.
//!
//! This module never touches a socket or the ring directly — it is handed a
//! byte slice already read off the wire and a [`Session`] to mutate, and
//! returns what bytes (if any) should be sent back and whether the session
//! should be closed. `engine.rs` is the only caller.

use classic_protocol::{DecodeOutcome, Packet, PacketId, PasswordString, UsernameString, PROTOCOL_VERSION};

use crate::session::{Session, SessionStatus};

/// The external collaborator that owns game-state for packets this server
/// only observes. Every method defaults to a no-op so the core runs
/// standalone; a real deployment implements the methods it cares about.
pub trait WorldHook {
    fn on_player_grounded(&mut self, session: &Session, grounded: bool) {
        let _ = (session, grounded);
    }

    fn on_player_position(&mut self, session: &Session, x: f64, y: f64, head_y: f64, z: f64, grounded: bool) {
        let _ = (session, x, y, head_y, z, grounded);
    }

    fn on_player_rotation(&mut self, session: &Session, yaw: f32, pitch: f32, grounded: bool) {
        let _ = (session, yaw, pitch, grounded);
    }

    #[allow(clippy::too_many_arguments)]
    fn on_player_transform(
        &mut self,
        session: &Session,
        x: f64,
        y: f64,
        head_y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        grounded: bool,
    ) {
        let _ = (session, x, y, head_y, z, yaw, pitch, grounded);
    }

    fn on_disconnect(&mut self, session: &Session, message: &str) {
        let _ = (session, message);
    }
}

/// A [`WorldHook`] that implements every method as a no-op. The default for
/// a server run with no external collaborator attached.
pub struct NullWorldHook;

impl WorldHook for NullWorldHook {}

/// Result of running [`process_inbound`] over a session's readable bytes.
pub struct InboundOutcome {
    /// Bytes consumed from the front of the buffer across however many
    /// complete packets were dispatched.
    pub consumed: usize,
    /// Encoded bytes to send back to the client, in order.
    pub responses: Vec<Vec<u8>>,
    /// The session hit a malformed packet or a protocol violation (a packet
    /// valid for the wrong session state) and must be closed. Only the
    /// offending session closes — this never aborts the process.
    pub close: bool,
}

/// Decodes and dispatches as many complete packets as `buffer` holds,
/// mutating `session`'s state machine and collecting any responses to send.
///
/// Stops at the first incomplete packet (the caller is expected to queue a
/// receive for the remainder) or the first malformed one (which closes the
/// session).
pub fn process_inbound(session: &mut Session, buffer: &[u8], hook: &mut dyn WorldHook) -> InboundOutcome {
    let mut consumed = 0;
    let mut responses = Vec::new();

    loop {
        match classic_protocol::decode_client(&buffer[consumed..]) {
            DecodeOutcome::Complete { packet, consumed: n } => {
                consumed += n;
                match handle_packet(session, &packet, hook) {
                    PacketOutcome::Reply(bytes) => responses.push(bytes),
                    PacketOutcome::None => {}
                    PacketOutcome::Close(bytes) => {
                        if let Some(bytes) = bytes {
                            responses.push(bytes);
                        }
                        return InboundOutcome {
                            consumed,
                            responses,
                            close: true,
                        };
                    }
                }
            }
            DecodeOutcome::Incomplete { .. } => {
                return InboundOutcome {
                    consumed,
                    responses,
                    close: false,
                };
            }
            DecodeOutcome::Malformed => {
                log::warn!(target: "classic_server", "malformed packet from session fd {}; closing", session.fd);
                return InboundOutcome {
                    consumed,
                    responses,
                    close: true,
                };
            }
        }
    }
}

enum PacketOutcome {
    None,
    Reply(Vec<u8>),
    /// Closes the session, optionally sending one last reply first (e.g. a
    /// disconnect acknowledgement, or an error response to a bad handshake).
    Close(Option<Vec<u8>>),
}

fn encode(packet: &Packet<'_>) -> Vec<u8> {
    let (outcome, bytes) = classic_protocol::encode_server(packet);
    debug_assert!(
        matches!(outcome, classic_protocol::EncodeOutcome::Written(_)),
        "encoding a server-originated packet should never fail: {outcome}"
    );
    bytes
}

fn handle_packet(session: &mut Session, packet: &Packet<'_>, hook: &mut dyn WorldHook) -> PacketOutcome {
    match packet {
        Packet::Heartbeat => {
            if matches!(session.status, SessionStatus::Handshaking) {
                return protocol_violation(packet.id());
            }
            PacketOutcome::Reply(encode(&Packet::Heartbeat))
        }

        Packet::HandshakeRequest { username } => handle_handshake(session, *username),

        Packet::AuthenticationRequest {
            protocol_version,
            username,
            password,
        } => handle_authentication(session, *protocol_version, *username, *password),

        // Player position/rotation/grounded/transform packets are observed
        // but never acted on by the core in any session state — there is no
        // protocol-violation row for them in the state/packet table (§4.7).
        // The reference dispatcher's `default` case drops them unconditionally
        // without closing; only the external world-state collaborator (via
        // `WorldHook`) cares about their contents.
        Packet::PlayerGrounded { grounded } => {
            hook.on_player_grounded(session, *grounded);
            PacketOutcome::None
        }

        Packet::PlayerPosition { x, y, head_y, z, grounded } => {
            hook.on_player_position(session, *x, *y, *head_y, *z, *grounded);
            PacketOutcome::None
        }

        Packet::PlayerRotation { yaw, pitch, grounded } => {
            hook.on_player_rotation(session, *yaw, *pitch, *grounded);
            PacketOutcome::None
        }

        Packet::PlayerTransform {
            x,
            y,
            head_y,
            z,
            yaw,
            pitch,
            grounded,
        } => {
            hook.on_player_transform(session, *x, *y, *head_y, *z, *yaw, *pitch, *grounded);
            PacketOutcome::None
        }

        // Likewise consumed from the buffer and silently accepted — the core
        // holds no session/world state a disconnect needs to unwind, so it
        // never closes the connection itself.
        Packet::Disconnect { message } => {
            hook.on_disconnect(session, message);
            PacketOutcome::None
        }

        // Server-to-client-only packets arriving from a client are a
        // protocol violation, not a decode failure — the codec already
        // rejects them as malformed (see `encode_server_packet`/
        // `decode_client_packet`), so this arm is unreachable in practice.
        Packet::AuthenticationResponse { .. }
        | Packet::HandshakeResponse { .. }
        | Packet::Time { .. }
        | Packet::Chunk { .. }
        | Packet::ChunkData { .. } => protocol_violation(packet.id()),
    }
}

fn protocol_violation(id: PacketId) -> PacketOutcome {
    log::warn!(target: "classic_server", "packet {id:?} received in the wrong session state; closing");
    PacketOutcome::Close(None)
}

fn handle_handshake(session: &mut Session, username: UsernameString) -> PacketOutcome {
    if !matches!(session.status, SessionStatus::Handshaking) {
        return protocol_violation(PacketId::Handshake);
    }
    session.username = Some(username);
    session.status = SessionStatus::Authenticating;
    PacketOutcome::Reply(encode(&Packet::HandshakeResponse { unknown: "-" }))
}

fn handle_authentication(
    session: &mut Session,
    protocol_version: i32,
    username: UsernameString,
    _password: PasswordString,
) -> PacketOutcome {
    if !matches!(session.status, SessionStatus::Authenticating) {
        return protocol_violation(PacketId::Authentication);
    }
    if protocol_version != PROTOCOL_VERSION {
        log::info!(
            target: "classic_server",
            "session fd {} sent protocol version {protocol_version}, expected {PROTOCOL_VERSION}; closing",
            session.fd
        );
        // No disconnect packet is sent here — this mirrors the reference
        // server's current behavior, which simply closes the socket.
        return PacketOutcome::Close(None);
    }
    // The password is accepted but never checked: this server only ever
    // runs in offline mode (see the crate-level module docs).
    session.username = Some(username);
    session.status = SessionStatus::Connected;
    PacketOutcome::Reply(encode(&Packet::AuthenticationResponse {
        entity_id: session.entity_id,
        unknown0: "",
        unknown1: "",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::RingBuffer;
    use std::net::{IpAddr, Ipv4Addr};

    fn session(fd: i32) -> Session {
        let mut table = crate::session::SessionTable::with_capacity(1);
        let id = table
            .insert(fd, IpAddr::V4(Ipv4Addr::LOCALHOST), 12345, RingBuffer::new(4096).unwrap())
            .unwrap();
        table.release(id).unwrap()
    }

    fn handshake_bytes(name: &str) -> Vec<u8> {
        let mut bytes = vec![0x02];
        bytes.extend_from_slice(&(name.len() as i16).to_be_bytes());
        bytes.extend_from_slice(name.as_bytes());
        bytes
    }

    fn authentication_bytes(version: i32, name: &str, password: &str) -> Vec<u8> {
        let mut bytes = vec![0x01];
        bytes.extend_from_slice(&version.to_be_bytes());
        bytes.extend_from_slice(&(name.len() as i16).to_be_bytes());
        bytes.extend_from_slice(name.as_bytes());
        bytes.extend_from_slice(&(password.len() as i16).to_be_bytes());
        bytes.extend_from_slice(password.as_bytes());
        bytes
    }

    #[test]
    fn full_login_sequence_transitions_to_connected() {
        let mut session = session(10);
        let mut hook = NullWorldHook;

        let handshake = handshake_bytes("notch");
        let outcome = process_inbound(&mut session, &handshake, &mut hook);
        assert_eq!(outcome.consumed, handshake.len());
        assert!(!outcome.close);
        assert_eq!(session.status, SessionStatus::Authenticating);

        let auth = authentication_bytes(PROTOCOL_VERSION, "notch", "");
        let outcome = process_inbound(&mut session, &auth, &mut hook);
        assert_eq!(outcome.consumed, auth.len());
        assert!(!outcome.close);
        assert_eq!(session.status, SessionStatus::Connected);
        assert_eq!(outcome.responses.len(), 1);
    }

    #[test]
    fn wrong_protocol_version_closes_session_only() {
        let mut session = session(11);
        let mut hook = NullWorldHook;

        process_inbound(&mut session, &handshake_bytes("notch"), &mut hook);

        let auth = authentication_bytes(99, "notch", "");
        let outcome = process_inbound(&mut session, &auth, &mut hook);
        assert!(outcome.close);
        assert!(outcome.responses.is_empty(), "no disconnect packet is sent on version mismatch");
    }

    #[test]
    fn malformed_packet_closes_only_this_session() {
        let mut session = session(12);
        let mut hook = NullWorldHook;

        let garbage = [0x77u8, 0x01, 0x02];
        let outcome = process_inbound(&mut session, &garbage, &mut hook);
        assert!(outcome.close);
        assert_eq!(outcome.consumed, 0);
    }

    #[test]
    fn truncated_packet_reports_zero_consumed_and_stays_open() {
        let mut session = session(13);
        let mut hook = NullWorldHook;

        let handshake = handshake_bytes("notch");
        let truncated = &handshake[..handshake.len() - 2];
        let outcome = process_inbound(&mut session, truncated, &mut hook);
        assert!(!outcome.close);
        assert_eq!(outcome.consumed, 0);
        assert_eq!(session.status, SessionStatus::Handshaking);
    }

    #[test]
    fn heartbeat_before_handshake_is_a_protocol_violation() {
        let mut session = session(15);
        let mut hook = NullWorldHook;

        let outcome = process_inbound(&mut session, &[0x00], &mut hook);
        assert!(outcome.close);
        assert!(outcome.responses.is_empty());
    }

    #[test]
    fn second_handshake_closes_the_session() {
        let mut session = session(16);
        let mut hook = NullWorldHook;

        let first = handshake_bytes("notch");
        let outcome = process_inbound(&mut session, &first, &mut hook);
        assert!(!outcome.close);
        assert_eq!(session.status, SessionStatus::Authenticating);

        let second = handshake_bytes("notch");
        let outcome = process_inbound(&mut session, &second, &mut hook);
        assert!(outcome.close);
    }

    #[test]
    fn player_position_before_connected_is_silently_dropped() {
        let mut session = session(14);
        let mut hook = NullWorldHook;

        let mut bytes = vec![0x0B];
        bytes.extend_from_slice(&1.0f64.to_be_bytes());
        bytes.extend_from_slice(&2.0f64.to_be_bytes());
        bytes.extend_from_slice(&3.0f64.to_be_bytes());
        bytes.extend_from_slice(&4.0f64.to_be_bytes());
        bytes.push(1);

        let outcome = process_inbound(&mut session, &bytes, &mut hook);
        assert!(!outcome.close);
        assert_eq!(outcome.consumed, bytes.len());
        assert!(outcome.responses.is_empty());
        assert_eq!(session.status, SessionStatus::Handshaking);
    }

    #[test]
    fn disconnect_packet_is_observed_but_does_not_close_the_session() {
        let mut session = session(17);
        let mut hook = NullWorldHook;

        let mut bytes = vec![0xFFu8];
        let message = "bye";
        bytes.extend_from_slice(&(message.len() as i16).to_be_bytes());
        bytes.extend_from_slice(message.as_bytes());

        let outcome = process_inbound(&mut session, &bytes, &mut hook);
        assert!(!outcome.close);
        assert_eq!(outcome.consumed, bytes.len());
        assert!(outcome.responses.is_empty());
    }
}
