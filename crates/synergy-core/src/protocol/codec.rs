//! Framed binary codec for the Synergy protocol.
//!
//! Wire format:
//! ```text
//! [length:4][payload:length]
//! ```
//! `length` is a big-endian u32 and must be between 1 and 4 MiB.  The payload
//! begins with a 4-byte ASCII tag (or the literal `Synergy` for the greeting)
//! followed by tag-specific fields.  Integers are big-endian; variable-length
//! byte blobs carry a 4-byte length prefix.

use thiserror::Error;

use crate::keymap::{KeyButton, KeyId, ModifierMask};
use crate::protocol::messages::{
    ClipboardChunk, ClipboardId, Message, MouseButton, ScreenInfo, GREETING_PREFIX, TAG_CLIPBOARD_DATA,
    TAG_CLOSE, TAG_ENTER, TAG_GRAB_CLIPBOARD, TAG_INFO, TAG_INFO_ACK, TAG_KEEP_ALIVE, TAG_KEY_DOWN,
    TAG_KEY_REPEAT, TAG_KEY_UP, TAG_LEAVE, TAG_MOUSE_DOWN, TAG_MOUSE_MOVE, TAG_MOUSE_REL_MOVE,
    TAG_MOUSE_UP, TAG_MOUSE_WHEEL, TAG_NOOP, TAG_QUERY_INFO, TAG_RESET_OPTIONS, TAG_SCREENSAVER,
    TAG_SET_OPTIONS,
};

/// Largest payload either side may send.  A frame declaring more is rejected
/// before any payload buffer is allocated.
pub const MAX_MESSAGE_SIZE: u32 = 4 * 1024 * 1024;

/// Size of the frame length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can occur while framing, encoding, or decoding messages.
///
/// Any of these is fatal to the connection that produced it; only
/// `VersionMismatch` is fatal to the whole session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame length is zero or exceeds [`MAX_MESSAGE_SIZE`].
    #[error("bad frame: declared length {0} bytes")]
    BadFrame(u32),

    /// The payload begins with an unknown tag.
    #[error("unknown message tag: {}", String::from_utf8_lossy(.0))]
    BadTag([u8; 4]),

    /// A payload field is truncated or holds an out-of-range value.
    #[error("malformed {tag} payload: {detail}")]
    BadField {
        tag: &'static str,
        detail: String,
    },

    /// The server speaks an incompatible protocol major version.
    #[error("incompatible server protocol version {major}.{minor}")]
    VersionMismatch { major: u16, minor: u16 },
}

impl ProtocolError {
    /// Whether the session may retry after closing the offending connection.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProtocolError::VersionMismatch { .. })
    }
}

// ── Payload reader ────────────────────────────────────────────────────────────

/// Cursor over a payload slice.  Every read checks the remaining length so a
/// truncated message surfaces as [`ProtocolError::BadField`] rather than a
/// panic.
struct PayloadReader<'a> {
    buf: &'a [u8],
    off: usize,
    tag: &'static str,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8], tag: &'static str) -> Self {
        Self { buf, off: 0, tag }
    }

    fn bad(&self, detail: impl Into<String>) -> ProtocolError {
        ProtocolError::BadField {
            tag: self.tag,
            detail: detail.into(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.buf.len() - self.off < n {
            return Err(self.bad(format!(
                "need {n} bytes at offset {}, have {}",
                self.off,
                self.buf.len() - self.off
            )));
        }
        let slice = &self.buf[self.off..self.off + n];
        self.off += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a 4-byte-length-prefixed blob.
    fn read_blob(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Fails if any payload bytes are left unread.
    fn finish(self) -> Result<(), ProtocolError> {
        if self.off != self.buf.len() {
            return Err(ProtocolError::BadField {
                tag: self.tag,
                detail: format!("{} trailing bytes", self.buf.len() - self.off),
            });
        }
        Ok(())
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes the payload (tag + fields) of `msg`, without the frame header.
pub fn encode_payload(msg: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    if let Some(tag) = msg.tag() {
        buf.extend_from_slice(tag);
    }
    match msg {
        Message::Hello { major, minor } => {
            buf.extend_from_slice(GREETING_PREFIX);
            buf.extend_from_slice(&major.to_be_bytes());
            buf.extend_from_slice(&minor.to_be_bytes());
        }
        Message::InfoAck
        | Message::KeepAlive
        | Message::ResetOptions
        | Message::Leave
        | Message::Close
        | Message::NoOp
        | Message::QueryInfo => {}
        Message::SetOptions(pairs) => {
            buf.extend_from_slice(&((pairs.len() * 2) as u32).to_be_bytes());
            for (id, value) in pairs {
                buf.extend_from_slice(&id.to_be_bytes());
                buf.extend_from_slice(&value.to_be_bytes());
            }
        }
        Message::Enter {
            x,
            y,
            seq,
            mask,
            for_screensaver,
        } => {
            buf.extend_from_slice(&x.to_be_bytes());
            buf.extend_from_slice(&y.to_be_bytes());
            buf.extend_from_slice(&seq.to_be_bytes());
            buf.extend_from_slice(&mask.0.to_be_bytes());
            buf.push(u8::from(*for_screensaver));
        }
        Message::GrabClipboard { id, seq } => {
            buf.push(*id as u8);
            buf.extend_from_slice(&seq.to_be_bytes());
        }
        Message::KeyDown { id, mask, button } | Message::KeyUp { id, mask, button } => {
            buf.extend_from_slice(&id.0.to_be_bytes());
            buf.extend_from_slice(&mask.0.to_be_bytes());
            buf.extend_from_slice(&button.0.to_be_bytes());
        }
        Message::KeyRepeat {
            id,
            mask,
            count,
            button,
        } => {
            buf.extend_from_slice(&id.0.to_be_bytes());
            buf.extend_from_slice(&mask.0.to_be_bytes());
            buf.extend_from_slice(&count.to_be_bytes());
            buf.extend_from_slice(&button.0.to_be_bytes());
        }
        Message::MouseDown { button } | Message::MouseUp { button } => {
            buf.push(*button as u8);
        }
        Message::MouseMove { x, y } => {
            buf.extend_from_slice(&x.to_be_bytes());
            buf.extend_from_slice(&y.to_be_bytes());
        }
        Message::MouseRelMove { dx, dy } => {
            buf.extend_from_slice(&dx.to_be_bytes());
            buf.extend_from_slice(&dy.to_be_bytes());
        }
        Message::MouseWheel { dx, dy } => {
            buf.extend_from_slice(&dx.to_be_bytes());
            buf.extend_from_slice(&dy.to_be_bytes());
        }
        Message::ClipboardData { id, seq, chunk } => {
            buf.push(*id as u8);
            buf.extend_from_slice(&seq.to_be_bytes());
            match chunk {
                ClipboardChunk::Start { total } => {
                    buf.push(ClipboardChunk::KIND_START);
                    buf.extend_from_slice(&total.to_be_bytes());
                }
                ClipboardChunk::Data(data) => {
                    buf.push(ClipboardChunk::KIND_DATA);
                    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
                    buf.extend_from_slice(data);
                }
                ClipboardChunk::End => buf.push(ClipboardChunk::KIND_END),
            }
        }
        Message::Screensaver { on } => buf.push(u8::from(*on)),
        Message::Info(info) => {
            for field in [info.x, info.y, info.width, info.height, info.zone, info.mx, info.my] {
                buf.extend_from_slice(&field.to_be_bytes());
            }
        }
    }
    buf
}

/// Encodes `msg` as a complete frame: length prefix plus payload.
pub fn encode_frame(msg: &Message) -> Vec<u8> {
    let payload = encode_payload(msg);
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes one payload (tag + fields, no frame header) into a [`Message`].
pub fn decode_payload(payload: &[u8]) -> Result<Message, ProtocolError> {
    if payload.starts_with(GREETING_PREFIX) {
        return decode_hello(payload);
    }
    if payload.len() < 4 {
        return Err(ProtocolError::BadFrame(payload.len() as u32));
    }
    let tag: [u8; 4] = payload[..4].try_into().expect("slice length checked");
    let body = &payload[4..];
    match &tag {
        t if t == TAG_INFO_ACK => empty(body, "CIAK", Message::InfoAck),
        t if t == TAG_KEEP_ALIVE => empty(body, "CALV", Message::KeepAlive),
        t if t == TAG_RESET_OPTIONS => empty(body, "CROP", Message::ResetOptions),
        t if t == TAG_SET_OPTIONS => decode_set_options(body),
        t if t == TAG_ENTER => decode_enter(body),
        t if t == TAG_LEAVE => empty(body, "COUT", Message::Leave),
        t if t == TAG_GRAB_CLIPBOARD => decode_grab_clipboard(body),
        t if t == TAG_CLOSE => empty(body, "CBYE", Message::Close),
        t if t == TAG_NOOP => empty(body, "CNOP", Message::NoOp),
        t if t == TAG_KEY_DOWN => decode_key(body, "DKDN", false),
        t if t == TAG_KEY_REPEAT => decode_key_repeat(body),
        t if t == TAG_KEY_UP => decode_key(body, "DKUP", true),
        t if t == TAG_MOUSE_DOWN => decode_mouse_button(body, "DMDN", true),
        t if t == TAG_MOUSE_UP => decode_mouse_button(body, "DMUP", false),
        t if t == TAG_MOUSE_MOVE => decode_mouse_move(body, "DMMV", false),
        t if t == TAG_MOUSE_REL_MOVE => decode_mouse_move(body, "DMRM", true),
        t if t == TAG_MOUSE_WHEEL => decode_mouse_wheel(body),
        t if t == TAG_CLIPBOARD_DATA => decode_clipboard_data(body),
        t if t == TAG_SCREENSAVER => decode_screensaver(body),
        t if t == TAG_QUERY_INFO => empty(body, "QINF", Message::QueryInfo),
        t if t == TAG_INFO => decode_info(body),
        _ => Err(ProtocolError::BadTag(tag)),
    }
}

fn empty(body: &[u8], tag: &'static str, msg: Message) -> Result<Message, ProtocolError> {
    PayloadReader::new(body, tag).finish()?;
    Ok(msg)
}

fn decode_hello(payload: &[u8]) -> Result<Message, ProtocolError> {
    let mut r = PayloadReader::new(&payload[GREETING_PREFIX.len()..], "Synergy");
    let major = r.read_u16()?;
    let minor = r.read_u16()?;
    r.finish()?;
    Ok(Message::Hello { major, minor })
}

fn decode_set_options(body: &[u8]) -> Result<Message, ProtocolError> {
    let mut r = PayloadReader::new(body, "COPT");
    let words = r.read_u32()?;
    if words % 2 != 0 {
        return Err(r.bad(format!("odd option word count {words}")));
    }
    let mut pairs = Vec::with_capacity((words / 2) as usize);
    for _ in 0..words / 2 {
        let id = r.read_u32()?;
        let value = r.read_u32()?;
        pairs.push((id, value));
    }
    r.finish()?;
    Ok(Message::SetOptions(pairs))
}

fn decode_enter(body: &[u8]) -> Result<Message, ProtocolError> {
    let mut r = PayloadReader::new(body, "CINN");
    let x = r.read_i16()?;
    let y = r.read_i16()?;
    let seq = r.read_u32()?;
    let mask = ModifierMask(r.read_u16()?);
    let for_screensaver = r.read_u8()? != 0;
    r.finish()?;
    Ok(Message::Enter {
        x,
        y,
        seq,
        mask,
        for_screensaver,
    })
}

fn decode_grab_clipboard(body: &[u8]) -> Result<Message, ProtocolError> {
    let mut r = PayloadReader::new(body, "CCLP");
    let raw = r.read_u8()?;
    let id = ClipboardId::try_from(raw).map_err(|_| r.bad(format!("unknown clipboard id {raw}")))?;
    let seq = r.read_u32()?;
    r.finish()?;
    Ok(Message::GrabClipboard { id, seq })
}

fn decode_key(body: &[u8], tag: &'static str, up: bool) -> Result<Message, ProtocolError> {
    let mut r = PayloadReader::new(body, tag);
    let id = KeyId(r.read_u16()?);
    let mask = ModifierMask(r.read_u16()?);
    let button = KeyButton(r.read_u16()?);
    r.finish()?;
    Ok(if up {
        Message::KeyUp { id, mask, button }
    } else {
        Message::KeyDown { id, mask, button }
    })
}

fn decode_key_repeat(body: &[u8]) -> Result<Message, ProtocolError> {
    let mut r = PayloadReader::new(body, "DKRP");
    let id = KeyId(r.read_u16()?);
    let mask = ModifierMask(r.read_u16()?);
    let count = r.read_u16()?;
    let button = KeyButton(r.read_u16()?);
    r.finish()?;
    Ok(Message::KeyRepeat {
        id,
        mask,
        count,
        button,
    })
}

fn decode_mouse_button(body: &[u8], tag: &'static str, down: bool) -> Result<Message, ProtocolError> {
    let mut r = PayloadReader::new(body, tag);
    let raw = r.read_u8()?;
    let button = MouseButton::try_from(raw).map_err(|_| r.bad(format!("unknown mouse button {raw}")))?;
    r.finish()?;
    Ok(if down {
        Message::MouseDown { button }
    } else {
        Message::MouseUp { button }
    })
}

fn decode_mouse_move(body: &[u8], tag: &'static str, relative: bool) -> Result<Message, ProtocolError> {
    let mut r = PayloadReader::new(body, tag);
    let a = r.read_i16()?;
    let b = r.read_i16()?;
    r.finish()?;
    Ok(if relative {
        Message::MouseRelMove { dx: a, dy: b }
    } else {
        Message::MouseMove { x: a, y: b }
    })
}

fn decode_mouse_wheel(body: &[u8]) -> Result<Message, ProtocolError> {
    let mut r = PayloadReader::new(body, "DMWM");
    let dx = r.read_i16()?;
    let dy = r.read_i16()?;
    r.finish()?;
    Ok(Message::MouseWheel { dx, dy })
}

fn decode_clipboard_data(body: &[u8]) -> Result<Message, ProtocolError> {
    let mut r = PayloadReader::new(body, "DCLP");
    let raw = r.read_u8()?;
    let id = ClipboardId::try_from(raw).map_err(|_| r.bad(format!("unknown clipboard id {raw}")))?;
    let seq = r.read_u32()?;
    let kind = r.read_u8()?;
    let chunk = match kind {
        ClipboardChunk::KIND_START => ClipboardChunk::Start { total: r.read_u32()? },
        ClipboardChunk::KIND_DATA => ClipboardChunk::Data(r.read_blob()?),
        ClipboardChunk::KIND_END => ClipboardChunk::End,
        other => return Err(r.bad(format!("unknown chunk kind {other}"))),
    };
    r.finish()?;
    Ok(Message::ClipboardData { id, seq, chunk })
}

fn decode_screensaver(body: &[u8]) -> Result<Message, ProtocolError> {
    let mut r = PayloadReader::new(body, "DSOP");
    let on = r.read_u8()? != 0;
    r.finish()?;
    Ok(Message::Screensaver { on })
}

fn decode_info(body: &[u8]) -> Result<Message, ProtocolError> {
    let mut r = PayloadReader::new(body, "DINF");
    let info = ScreenInfo {
        x: r.read_i16()?,
        y: r.read_i16()?,
        width: r.read_i16()?,
        height: r.read_i16()?,
        zone: r.read_i16()?,
        mx: r.read_i16()?,
        my: r.read_i16()?,
    };
    r.finish()?;
    Ok(Message::Info(info))
}

// ── Frame reader ──────────────────────────────────────────────────────────────

/// Incremental frame decoder.
///
/// Feed it raw bytes in whatever slices the transport delivers; it yields one
/// decoded [`Message`] per complete frame and holds partial frames across
/// calls.  A frame declaring a length of zero or more than
/// [`MAX_MESSAGE_SIZE`] fails before the payload is buffered.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
    /// Validated length of the frame currently being accumulated.
    pending_len: Option<usize>,
}

impl FrameReader {
    pub fn new() -> FrameReader {
        FrameReader::default()
    }

    /// Appends transport bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete message, `Ok(None)` if more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        let len = match self.pending_len {
            Some(len) => len,
            None => {
                if self.buf.len() < FRAME_HEADER_SIZE {
                    return Ok(None);
                }
                let declared =
                    u32::from_be_bytes(self.buf[..4].try_into().expect("length checked"));
                if declared == 0 || declared > MAX_MESSAGE_SIZE {
                    return Err(ProtocolError::BadFrame(declared));
                }
                self.buf.drain(..FRAME_HEADER_SIZE);
                self.pending_len = Some(declared as usize);
                declared as usize
            }
        };

        if self.buf.len() < len {
            return Ok(None);
        }
        let payload: Vec<u8> = self.buf.drain(..len).collect();
        self.pending_len = None;
        decode_payload(&payload).map(Some)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
