//! The Synergy wire protocol: message types, framed codec, clipboard
//! marshalling, and sequence filtering.

pub mod clipboard;
pub mod codec;
pub mod messages;
pub mod sequence;

pub use clipboard::{ClipboardAssembler, ClipboardData, ClipboardError, ClipboardFormat};
pub use codec::{
    decode_payload, encode_frame, encode_payload, FrameReader, ProtocolError, MAX_MESSAGE_SIZE,
};
pub use messages::{ClipboardChunk, ClipboardId, Message, MouseButton, ScreenInfo};
pub use sequence::SequenceFilter;
