//! Wire codec and packet data model for the classic multiplayer protocol.
//!
//! The protocol is big-endian, length-prefixed, and fixed-ID. Every message is
//! a single `type_byte` followed by a type-specific body (see the packet
//! table in the workspace's design doc). This crate only translates between
//! bytes and typed [`Packet`] values — it does not touch sockets, buffers, or
//! session state, all of which live in `classic-server`.
//!
//! Every per-packet decoder/encoder follows the same tri-state contract as
//! the protocol this crate implements:
//!
//! - decoding: `> 0` bytes consumed, `< 0` need `|n|` more bytes, `= 0`
//!   malformed.
//! - encoding: `> 0` bytes written, `< 0` need `|n|` bytes of capacity,
//!   `= 0` malformed input.
//!
//! [`decode_client_packet`] / [`encode_server_packet`] expose that contract
//! directly (as `isize`) because it is part of the wire-compatible surface
//! other implementations of this protocol rely on. [`DecodeOutcome`] and
//! [`EncodeOutcome`] wrap the same result in an enum for callers that would
//! rather match than compare against zero.

use std::fmt;

mod primitive;
mod strings;

pub use strings::{InlineStringError, PasswordString, UsernameString};

/// Maximum length, in bytes, of a username (`handshake`/`authentication`).
pub const USERNAME_MAX: usize = 16;

/// Maximum length, in bytes, of a password (`authentication`).
pub const PASSWORD_MAX: usize = 32;

/// Only protocol version this server accepts in an `authentication` request.
pub const PROTOCOL_VERSION: i32 = 1;

/// Wire identifiers for every packet this crate knows how to decode or encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketId {
    Heartbeat = 0x00,
    Authentication = 0x01,
    Handshake = 0x02,
    Time = 0x04,
    PlayerGrounded = 0x0A,
    PlayerPosition = 0x0B,
    PlayerRotation = 0x0C,
    PlayerTransform = 0x0D,
    Chunk = 0x32,
    ChunkData = 0x33,
    Disconnect = 0xFF,
}

impl PacketId {
    fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x00 => Self::Heartbeat,
            0x01 => Self::Authentication,
            0x02 => Self::Handshake,
            0x04 => Self::Time,
            0x0A => Self::PlayerGrounded,
            0x0B => Self::PlayerPosition,
            0x0C => Self::PlayerRotation,
            0x0D => Self::PlayerTransform,
            0x32 => Self::Chunk,
            0x33 => Self::ChunkData,
            0xFF => Self::Disconnect,
            _ => return None,
        })
    }
}

/// A decoded or to-be-encoded protocol message.
///
/// Variants carry plain, fixed-size data except [`Packet::Disconnect`] and
/// [`Packet::ChunkData`], which borrow their byte-string/bulk payload from
/// the caller's buffer instead of copying it onto the heap.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet<'a> {
    /// Sent by both sides to keep the connection alive; echoed back as-is.
    Heartbeat,

    /// C→S: the second handshake message, carrying credentials.
    AuthenticationRequest {
        protocol_version: i32,
        username: UsernameString,
        /// Accepted but never checked — the server runs in offline mode.
        password: PasswordString,
    },

    /// S→C: reply to an authentication request.
    AuthenticationResponse {
        entity_id: i32,
        /// Undocumented upstream; the reference server always sends `""`.
        unknown0: &'a str,
        /// Undocumented upstream; the reference server always sends `""`.
        unknown1: &'a str,
    },

    /// C→S: first handshake message, carrying the player's username.
    HandshakeRequest { username: UsernameString },

    /// S→C: reply to a handshake request.
    HandshakeResponse {
        /// Undocumented upstream; the reference server always sends `"-"`.
        unknown: &'a str,
    },

    /// S→C: world time in ticks. Never emitted by the core dispatcher; an
    /// external collaborator owns the schedule for sending it.
    Time { ticks: i64 },

    /// C→S: whether the player is on the ground.
    PlayerGrounded { grounded: bool },

    /// C→S: full position update without orientation.
    PlayerPosition {
        x: f64,
        y: f64,
        head_y: f64,
        z: f64,
        grounded: bool,
    },

    /// C→S: orientation update without position.
    PlayerRotation {
        yaw: f32,
        pitch: f32,
        grounded: bool,
    },

    /// Both directions, but with different field order on the wire — see
    /// [`encode_player_transform`] for the swap this packet is notorious for.
    PlayerTransform {
        x: f64,
        y: f64,
        head_y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        grounded: bool,
    },

    /// S→C: announces a chunk column before its data arrives.
    Chunk { x: i32, z: i32, initialize: bool },

    /// S→C: a block of (externally compressed) chunk data.
    ChunkData {
        x: i32,
        y: i16,
        z: i32,
        x_size: u8,
        y_size: u8,
        z_size: u8,
        data: &'a [u8],
    },

    /// Both directions: a disconnect reason.
    Disconnect { message: &'a str },
}

impl Packet<'_> {
    pub fn id(&self) -> PacketId {
        match self {
            Packet::Heartbeat => PacketId::Heartbeat,
            Packet::AuthenticationRequest { .. } | Packet::AuthenticationResponse { .. } => {
                PacketId::Authentication
            }
            Packet::HandshakeRequest { .. } | Packet::HandshakeResponse { .. } => {
                PacketId::Handshake
            }
            Packet::Time { .. } => PacketId::Time,
            Packet::PlayerGrounded { .. } => PacketId::PlayerGrounded,
            Packet::PlayerPosition { .. } => PacketId::PlayerPosition,
            Packet::PlayerRotation { .. } => PacketId::PlayerRotation,
            Packet::PlayerTransform { .. } => PacketId::PlayerTransform,
            Packet::Chunk { .. } => PacketId::Chunk,
            Packet::ChunkData { .. } => PacketId::ChunkData,
            Packet::Disconnect { .. } => PacketId::Disconnect,
        }
    }
}

/// Result of decoding a packet, as an enum rather than a signed magnitude.
///
/// Carries exactly the information the raw `isize` contract does: either the
/// decoded value and how many bytes it consumed, how many more bytes are
/// needed (a conservative lower bound is acceptable), or that the stream is
/// unrecoverable.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome<'a> {
    Complete { packet: Packet<'a>, consumed: usize },
    Incomplete { needed: usize },
    Malformed,
}

/// Result of encoding a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    Written(usize),
    NeedsCapacity(usize),
    Malformed,
}

impl fmt::Display for EncodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeOutcome::Written(n) => write!(f, "wrote {n} bytes"),
            EncodeOutcome::NeedsCapacity(n) => write!(f, "needs {n} bytes of capacity"),
            EncodeOutcome::Malformed => write!(f, "malformed"),
        }
    }
}

fn encode_outcome_from_raw(raw: isize) -> EncodeOutcome {
    match raw.cmp(&0) {
        std::cmp::Ordering::Greater => EncodeOutcome::Written(raw as usize),
        std::cmp::Ordering::Less => EncodeOutcome::NeedsCapacity((-raw) as usize),
        std::cmp::Ordering::Equal => EncodeOutcome::Malformed,
    }
}

/// Peeks the first byte of `buffer` and decodes the packet it identifies.
///
/// Returns `> 0` bytes consumed, `< 0` `-needed` more bytes, or `0` if the
/// buffer is malformed or the type byte is unrecognized. The decoded value is
/// written into `out`.
pub fn decode_client_packet<'a>(buffer: &'a [u8], out: &mut Option<Packet<'a>>) -> isize {
    if buffer.is_empty() {
        return -1;
    }
    let Some(id) = PacketId::from_byte(buffer[0]) else {
        log::warn!(target: "classic_protocol", "cannot decode packet with unknown type 0x{:02X}", buffer[0]);
        return 0;
    };
    match id {
        PacketId::Heartbeat => primitive::decode_heartbeat(buffer, out),
        PacketId::Authentication => primitive::decode_authentication_request(buffer, out),
        PacketId::Handshake => primitive::decode_handshake_request(buffer, out),
        PacketId::PlayerGrounded => primitive::decode_player_grounded(buffer, out),
        PacketId::PlayerPosition => primitive::decode_player_position(buffer, out),
        PacketId::PlayerRotation => primitive::decode_player_rotation(buffer, out),
        PacketId::PlayerTransform => primitive::decode_player_transform(buffer, out),
        PacketId::Disconnect => primitive::decode_disconnect(buffer, out),
        PacketId::Time | PacketId::Chunk | PacketId::ChunkData => {
            // These are server-to-client only; a client sending one is malformed.
            0
        }
    }
}

/// Typed wrapper over [`decode_client_packet`].
pub fn decode_client(buffer: &[u8]) -> DecodeOutcome<'_> {
    let mut packet = None;
    match decode_client_packet(buffer, &mut packet) {
        n if n > 0 => DecodeOutcome::Complete {
            packet: packet.expect("decode_client_packet reported success without a value"),
            consumed: n as usize,
        },
        0 => DecodeOutcome::Malformed,
        n => DecodeOutcome::Incomplete { needed: (-n) as usize },
    }
}

/// Encodes `packet` into `buffer`, dispatching purely on its [`PacketId`].
///
/// Returns `> 0` bytes written, `< 0` `-needed` bytes of capacity (callers
/// typically probe with `buffer_size = 0` first to size an allocation), or
/// `0` if `packet` cannot be encoded as a server packet.
pub fn encode_server_packet(buffer: &mut [u8], packet: &Packet<'_>) -> isize {
    match packet {
        Packet::Heartbeat => primitive::encode_heartbeat(buffer),
        Packet::AuthenticationResponse { .. } => primitive::encode_authentication_response(buffer, packet),
        Packet::HandshakeResponse { .. } => primitive::encode_handshake_response(buffer, packet),
        Packet::Time { .. } => primitive::encode_time(buffer, packet),
        Packet::PlayerTransform { .. } => primitive::encode_player_transform(buffer, packet),
        Packet::Chunk { .. } => primitive::encode_chunk(buffer, packet),
        Packet::ChunkData { .. } => primitive::encode_chunk_data(buffer, packet),
        Packet::Disconnect { .. } => primitive::encode_disconnect(buffer, packet),
        // The remaining variants are client-to-server only.
        Packet::AuthenticationRequest { .. }
        | Packet::HandshakeRequest { .. }
        | Packet::PlayerGrounded { .. }
        | Packet::PlayerPosition { .. }
        | Packet::PlayerRotation { .. } => 0,
    }
}

/// Typed wrapper over [`encode_server_packet`].
pub fn encode_server(packet: &Packet<'_>) -> (EncodeOutcome, Vec<u8>) {
    let needed = -encode_server_packet(&mut [], packet);
    if needed <= 0 {
        // `encode_server_packet` on an empty buffer always reports either
        // `NeedsCapacity` or `Malformed`; a non-negative result here means
        // the packet encodes to zero bytes, which no variant does.
        return (EncodeOutcome::Malformed, Vec::new());
    }
    let mut buf = vec![0u8; needed as usize];
    let raw = encode_server_packet(&mut buf, packet);
    let outcome = encode_outcome_from_raw(raw);
    match outcome {
        EncodeOutcome::Written(n) => {
            buf.truncate(n);
            (outcome, buf)
        }
        _ => (outcome, Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_packet_id_is_malformed() {
        let mut out = None;
        assert_eq!(decode_client_packet(&[0x77], &mut out), 0);
        assert!(out.is_none());
    }

    #[test]
    fn empty_buffer_needs_one_byte() {
        let mut out = None;
        assert_eq!(decode_client_packet(&[], &mut out), -1);
    }

    #[test]
    fn heartbeat_round_trips() {
        let (outcome, bytes) = encode_server(&Packet::Heartbeat);
        assert_eq!(outcome, EncodeOutcome::Written(1));
        assert_eq!(bytes, vec![0x00]);

        match decode_client(&bytes) {
            DecodeOutcome::Complete { packet, consumed } => {
                assert_eq!(consumed, 1);
                assert_eq!(packet, Packet::Heartbeat);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
