//! Field-level big-endian encode/decode helpers and the per-packet bodies
//! built out of them.
//!
//! Every decode function here takes `(buffer, out)` and returns the same
//! signed contract as the rest of the crate: `>0` consumed, `<0` `-needed`,
//! `=0` malformed. Every encode function takes `(buffer, packet)` and
//! returns `>0` written, `<0` `-needed capacity`, `=0` malformed.

use crate::{Packet, PasswordString, UsernameString, PASSWORD_MAX, USERNAME_MAX};

// Wire type-byte constants. These mirror `PacketId` but as raw `u8` so the
// per-packet functions below don't need to round-trip through the enum.
const HEARTBEAT: u8 = 0x00;
const AUTHENTICATION: u8 = 0x01;
const HANDSHAKE: u8 = 0x02;
const TIME: u8 = 0x04;
const PLAYER_GROUNDED: u8 = 0x0A;
const PLAYER_POSITION: u8 = 0x0B;
const PLAYER_ROTATION: u8 = 0x0C;
const PLAYER_TRANSFORM: u8 = 0x0D;
const CHUNK: u8 = 0x32;
const CHUNK_DATA: u8 = 0x33;
const DISCONNECT: u8 = 0xFF;

/// A cursor over a decode buffer that reports how many more bytes it would
/// need, rather than panicking, when a read runs past the end.
struct Reader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

/// Returned by [`Reader`] methods when the buffer is too short; callers
/// convert this directly into the packet's `-needed` result.
struct NeedMore(usize);

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }

    fn need(&self, at_least: usize) -> Result<(), NeedMore> {
        if self.remaining() < at_least {
            Err(NeedMore(at_least - self.remaining()))
        } else {
            Ok(())
        }
    }

    fn byte(&mut self) -> Result<u8, NeedMore> {
        self.need(1)?;
        let b = self.buf[self.cursor];
        self.cursor += 1;
        Ok(b)
    }

    fn bool(&mut self) -> Result<bool, NeedMore> {
        Ok(self.byte()? != 0)
    }

    fn i16(&mut self) -> Result<i16, NeedMore> {
        self.need(2)?;
        let v = i16::from_be_bytes(self.buf[self.cursor..self.cursor + 2].try_into().unwrap());
        self.cursor += 2;
        Ok(v)
    }

    fn u16(&mut self) -> Result<u16, NeedMore> {
        Ok(self.i16()? as u16)
    }

    fn i32(&mut self) -> Result<i32, NeedMore> {
        self.need(4)?;
        let v = i32::from_be_bytes(self.buf[self.cursor..self.cursor + 4].try_into().unwrap());
        self.cursor += 4;
        Ok(v)
    }

    fn i64(&mut self) -> Result<i64, NeedMore> {
        self.need(8)?;
        let v = i64::from_be_bytes(self.buf[self.cursor..self.cursor + 8].try_into().unwrap());
        self.cursor += 8;
        Ok(v)
    }

    fn f32(&mut self) -> Result<f32, NeedMore> {
        Ok(f32::from_bits(self.i32()? as u32))
    }

    fn f64(&mut self) -> Result<f64, NeedMore> {
        Ok(f64::from_bits(self.i64()? as u64))
    }

    /// Reads a u16-length-prefixed byte string and returns it borrowed from
    /// the underlying buffer, without copying.
    fn bytes(&mut self, len: usize) -> Result<&'a [u8], NeedMore> {
        self.need(len)?;
        let s = &self.buf[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(s)
    }

    /// Reads a raw byte string and validates it as UTF-8. Unlike every other
    /// `Reader` method, a failure here can be a genuine decode failure (not
    /// just a short buffer) — invalid UTF-8 is malformed, not incomplete.
    fn str(&mut self, len: usize) -> Result<&'a str, StrError> {
        let bytes = self.bytes(len).map_err(StrError::Need)?;
        std::str::from_utf8(bytes).map_err(|_| StrError::Malformed)
    }
}

enum StrError {
    Need(NeedMore),
    Malformed,
}

macro_rules! try_need {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(NeedMore(n)) => return -(n.max(1) as isize),
        }
    };
}

macro_rules! try_str {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(StrError::Need(NeedMore(n))) => return -(n.max(1) as isize),
            Err(StrError::Malformed) => return 0,
        }
    };
}

pub(crate) fn decode_heartbeat<'a>(buf: &'a [u8], out: &mut Option<Packet<'a>>) -> isize {
    let mut r = Reader::new(buf);
    let ty = try_need!(r.byte());
    if ty != HEARTBEAT {
        return 0;
    }
    *out = Some(Packet::Heartbeat);
    r.cursor as isize
}

pub(crate) fn decode_authentication_request<'a>(buf: &'a [u8], out: &mut Option<Packet<'a>>) -> isize {
    let mut r = Reader::new(buf);
    let ty = try_need!(r.byte());
    if ty != AUTHENTICATION {
        return 0;
    }
    let protocol_version = try_need!(r.i32());
    let username_length = try_need!(r.u16()) as usize;
    if username_length > USERNAME_MAX {
        log::warn!(target: "classic_protocol", "received username length {username_length} > {USERNAME_MAX}");
        return 0;
    }
    let username = try_str!(r.str(username_length));
    let Ok(username) = UsernameString::new(username) else {
        return 0;
    };
    let password_length = try_need!(r.u16()) as usize;
    if password_length > PASSWORD_MAX {
        log::warn!(target: "classic_protocol", "received password length {password_length} > {PASSWORD_MAX}");
        return 0;
    }
    let password = try_str!(r.str(password_length));
    let Ok(password) = PasswordString::new(password) else {
        return 0;
    };
    *out = Some(Packet::AuthenticationRequest {
        protocol_version,
        username,
        password,
    });
    r.cursor as isize
}

pub(crate) fn encode_authentication_response(buf: &mut [u8], packet: &Packet<'_>) -> isize {
    let Packet::AuthenticationResponse {
        entity_id,
        unknown0,
        unknown1,
    } = packet
    else {
        return 0;
    };
    let needed = 1 + 4 + 2 + unknown0.len() + 2 + unknown1.len();
    if buf.len() < needed {
        return -(needed as isize);
    }
    let mut cursor = 0;
    write_byte(buf, &mut cursor, AUTHENTICATION);
    write_i32(buf, &mut cursor, *entity_id);
    write_str(buf, &mut cursor, unknown0);
    write_str(buf, &mut cursor, unknown1);
    cursor as isize
}

pub(crate) fn decode_handshake_request<'a>(buf: &'a [u8], out: &mut Option<Packet<'a>>) -> isize {
    let mut r = Reader::new(buf);
    let ty = try_need!(r.byte());
    if ty != HANDSHAKE {
        return 0;
    }
    let name_length = try_need!(r.u16()) as usize;
    if name_length > USERNAME_MAX {
        log::warn!(target: "classic_protocol", "received name length {name_length} > {USERNAME_MAX}");
        return 0;
    }
    let name = try_str!(r.str(name_length));
    let Ok(username) = UsernameString::new(name) else {
        return 0;
    };
    *out = Some(Packet::HandshakeRequest { username });
    r.cursor as isize
}

pub(crate) fn encode_handshake_response(buf: &mut [u8], packet: &Packet<'_>) -> isize {
    let Packet::HandshakeResponse { unknown } = packet else {
        return 0;
    };
    let needed = 1 + 2 + unknown.len();
    if buf.len() < needed {
        return -(needed as isize);
    }
    let mut cursor = 0;
    write_byte(buf, &mut cursor, HANDSHAKE);
    write_str(buf, &mut cursor, unknown);
    cursor as isize
}

pub(crate) fn encode_heartbeat(buf: &mut [u8]) -> isize {
    let needed = 1;
    if buf.len() < needed {
        return -(needed as isize);
    }
    let mut cursor = 0;
    write_byte(buf, &mut cursor, HEARTBEAT);
    cursor as isize
}

pub(crate) fn encode_time(buf: &mut [u8], packet: &Packet<'_>) -> isize {
    let Packet::Time { ticks } = packet else {
        return 0;
    };
    let needed = 1 + 8;
    if buf.len() < needed {
        return -(needed as isize);
    }
    let mut cursor = 0;
    write_byte(buf, &mut cursor, TIME);
    write_i64(buf, &mut cursor, *ticks);
    cursor as isize
}

pub(crate) fn decode_player_grounded<'a>(buf: &'a [u8], out: &mut Option<Packet<'a>>) -> isize {
    let mut r = Reader::new(buf);
    let ty = try_need!(r.byte());
    if ty != PLAYER_GROUNDED {
        return 0;
    }
    let grounded = try_need!(r.bool());
    *out = Some(Packet::PlayerGrounded { grounded });
    r.cursor as isize
}

pub(crate) fn decode_player_position<'a>(buf: &'a [u8], out: &mut Option<Packet<'a>>) -> isize {
    let mut r = Reader::new(buf);
    let ty = try_need!(r.byte());
    if ty != PLAYER_POSITION {
        return 0;
    }
    let x = try_need!(r.f64());
    let y = try_need!(r.f64());
    let head_y = try_need!(r.f64());
    let z = try_need!(r.f64());
    let grounded = try_need!(r.bool());
    *out = Some(Packet::PlayerPosition {
        x,
        y,
        head_y,
        z,
        grounded,
    });
    r.cursor as isize
}

pub(crate) fn decode_player_rotation<'a>(buf: &'a [u8], out: &mut Option<Packet<'a>>) -> isize {
    let mut r = Reader::new(buf);
    let ty = try_need!(r.byte());
    if ty != PLAYER_ROTATION {
        return 0;
    }
    let yaw = try_need!(r.f32());
    let pitch = try_need!(r.f32());
    let grounded = try_need!(r.bool());
    *out = Some(Packet::PlayerRotation {
        yaw,
        pitch,
        grounded,
    });
    r.cursor as isize
}

pub(crate) fn decode_player_transform<'a>(buf: &'a [u8], out: &mut Option<Packet<'a>>) -> isize {
    let mut r = Reader::new(buf);
    let ty = try_need!(r.byte());
    if ty != PLAYER_TRANSFORM {
        return 0;
    }
    // Client-to-server order: x, y, head_y, z. See `encode_player_transform`
    // for the server-to-client order, which swaps y and head_y.
    let x = try_need!(r.f64());
    let y = try_need!(r.f64());
    let head_y = try_need!(r.f64());
    let z = try_need!(r.f64());
    let yaw = try_need!(r.f32());
    let pitch = try_need!(r.f32());
    let grounded = try_need!(r.bool());
    *out = Some(Packet::PlayerTransform {
        x,
        y,
        head_y,
        z,
        yaw,
        pitch,
        grounded,
    });
    r.cursor as isize
}

/// Encodes a player-transform packet for the server-to-client direction.
///
/// The wire order here is `x, head_y, y, z` — `y` and `head_y` are swapped
/// relative to the client-to-server encoding in [`decode_player_transform`].
/// This asymmetry is a real property of the protocol, not a bug; reproduce
/// it exactly.
pub(crate) fn encode_player_transform(buf: &mut [u8], packet: &Packet<'_>) -> isize {
    let Packet::PlayerTransform {
        x,
        y,
        head_y,
        z,
        yaw,
        pitch,
        grounded,
    } = packet
    else {
        return 0;
    };
    let needed = 1 + 8 * 4 + 4 * 2 + 1;
    if buf.len() < needed {
        return -(needed as isize);
    }
    let mut cursor = 0;
    write_byte(buf, &mut cursor, PLAYER_TRANSFORM);
    write_f64(buf, &mut cursor, *x);
    write_f64(buf, &mut cursor, *head_y);
    write_f64(buf, &mut cursor, *y);
    write_f64(buf, &mut cursor, *z);
    write_f32(buf, &mut cursor, *yaw);
    write_f32(buf, &mut cursor, *pitch);
    write_byte(buf, &mut cursor, *grounded as u8);
    cursor as isize
}

pub(crate) fn encode_chunk(buf: &mut [u8], packet: &Packet<'_>) -> isize {
    let Packet::Chunk { x, z, initialize } = packet else {
        return 0;
    };
    let needed = 1 + 4 + 4 + 1;
    if buf.len() < needed {
        return -(needed as isize);
    }
    let mut cursor = 0;
    write_byte(buf, &mut cursor, CHUNK);
    write_i32(buf, &mut cursor, *x);
    write_i32(buf, &mut cursor, *z);
    write_byte(buf, &mut cursor, *initialize as u8);
    cursor as isize
}

pub(crate) fn encode_chunk_data(buf: &mut [u8], packet: &Packet<'_>) -> isize {
    let Packet::ChunkData {
        x,
        y,
        z,
        x_size,
        y_size,
        z_size,
        data,
    } = packet
    else {
        return 0;
    };
    let needed = 1 + 4 + 2 + 4 + 1 + 1 + 1 + 4 + data.len();
    if buf.len() < needed {
        return -(needed as isize);
    }
    let mut cursor = 0;
    write_byte(buf, &mut cursor, CHUNK_DATA);
    write_i32(buf, &mut cursor, *x);
    write_i16(buf, &mut cursor, *y);
    write_i32(buf, &mut cursor, *z);
    write_byte(buf, &mut cursor, *x_size);
    write_byte(buf, &mut cursor, *y_size);
    write_byte(buf, &mut cursor, *z_size);
    write_i32(buf, &mut cursor, data.len() as i32);
    write_bytes(buf, &mut cursor, data);
    cursor as isize
}

pub(crate) fn decode_disconnect<'a>(buf: &'a [u8], out: &mut Option<Packet<'a>>) -> isize {
    let mut r = Reader::new(buf);
    let ty = try_need!(r.byte());
    if ty != DISCONNECT {
        return 0;
    }
    let len = try_need!(r.u16()) as usize;
    let message = try_str!(r.str(len));
    *out = Some(Packet::Disconnect { message });
    r.cursor as isize
}

pub(crate) fn encode_disconnect(buf: &mut [u8], packet: &Packet<'_>) -> isize {
    let Packet::Disconnect { message } = packet else {
        return 0;
    };
    let needed = 1 + 2 + message.len();
    if buf.len() < needed {
        return -(needed as isize);
    }
    let mut cursor = 0;
    write_byte(buf, &mut cursor, DISCONNECT);
    write_str(buf, &mut cursor, message);
    cursor as isize
}

fn write_byte(buf: &mut [u8], cursor: &mut usize, v: u8) {
    buf[*cursor] = v;
    *cursor += 1;
}

fn write_i16(buf: &mut [u8], cursor: &mut usize, v: i16) {
    buf[*cursor..*cursor + 2].copy_from_slice(&v.to_be_bytes());
    *cursor += 2;
}

fn write_i32(buf: &mut [u8], cursor: &mut usize, v: i32) {
    buf[*cursor..*cursor + 4].copy_from_slice(&v.to_be_bytes());
    *cursor += 4;
}

fn write_i64(buf: &mut [u8], cursor: &mut usize, v: i64) {
    buf[*cursor..*cursor + 8].copy_from_slice(&v.to_be_bytes());
    *cursor += 8;
}

fn write_f32(buf: &mut [u8], cursor: &mut usize, v: f32) {
    write_i32(buf, cursor, v.to_bits() as i32);
}

fn write_f64(buf: &mut [u8], cursor: &mut usize, v: f64) {
    write_i64(buf, cursor, v.to_bits() as i64);
}

fn write_bytes(buf: &mut [u8], cursor: &mut usize, bytes: &[u8]) {
    buf[*cursor..*cursor + bytes.len()].copy_from_slice(bytes);
    *cursor += bytes.len();
}

fn write_str(buf: &mut [u8], cursor: &mut usize, s: &str) {
    write_i16(buf, cursor, s.len() as i16);
    write_bytes(buf, cursor, s.as_bytes());
}
