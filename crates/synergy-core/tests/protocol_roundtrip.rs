//! Integration tests for the synergy-core protocol stack.
//!
//! These exercise the public API the client crate consumes: frame encoding,
//! incremental decoding across arbitrary read boundaries, clipboard
//! marshalling through the chunk assembler, and sequence filtering.  Unit
//! tests inside `src/` cover the individual functions; anything here failing
//! to compile means the public surface regressed.

use synergy_core::protocol::messages::{
    ClipboardId, MouseButton, OPTION_HEARTBEAT, OPTION_RELATIVE_MOUSE_MOVES,
};
use synergy_core::protocol::{ClipboardAssembler, clipboard::chunk_payload};
use synergy_core::{
    encode_frame, ClipboardData, FrameReader, KeyButton, KeyId, Message, ModifierMask,
    ProtocolError, ScreenInfo, SequenceFilter,
};

fn roundtrip(msg: Message) -> Message {
    let frame = encode_frame(&msg);
    let mut reader = FrameReader::new();
    reader.feed(&frame);
    let decoded = reader
        .next_message()
        .expect("decode must succeed")
        .expect("frame must be complete");
    assert_eq!(
        reader.next_message().expect("no residual error"),
        None,
        "all bytes must be consumed"
    );
    decoded
}

// ── Round trips ───────────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_greeting() {
    let original = Message::Hello { major: 1, minor: 6 };
    assert_eq!(original, roundtrip(original.clone()));
}

#[test]
fn test_greeting_frame_is_the_documented_literal() {
    // [00 00 00 0B] Synergy [00 01 00 06]
    let frame = encode_frame(&Message::own_hello());
    assert_eq!(&frame[..4], &[0x00, 0x00, 0x00, 0x0B]);
    assert_eq!(&frame[4..11], b"Synergy");
    assert_eq!(&frame[11..], &[0x00, 0x01, 0x00, 0x06]);
}

#[test]
fn test_roundtrip_enter_message() {
    let original = Message::Enter {
        x: 100,
        y: 200,
        seq: 7,
        mask: ModifierMask::NONE,
        for_screensaver: false,
    };
    assert_eq!(original, roundtrip(original.clone()));
}

#[test]
fn test_roundtrip_key_messages() {
    let down = Message::KeyDown {
        id: KeyId(0x0041),
        mask: ModifierMask::SHIFT,
        button: KeyButton(30),
    };
    let repeat = Message::KeyRepeat {
        id: KeyId(0x0061),
        mask: ModifierMask::NONE,
        count: 3,
        button: KeyButton(30),
    };
    let up = Message::KeyUp {
        id: KeyId(0x0041),
        mask: ModifierMask::SHIFT,
        button: KeyButton(30),
    };
    assert_eq!(down, roundtrip(down.clone()));
    assert_eq!(repeat, roundtrip(repeat.clone()));
    assert_eq!(up, roundtrip(up.clone()));
}

#[test]
fn test_roundtrip_mouse_messages() {
    for msg in [
        Message::MouseDown {
            button: MouseButton::Left,
        },
        Message::MouseUp {
            button: MouseButton::Right,
        },
        Message::MouseMove { x: -10, y: 900 },
        Message::MouseRelMove { dx: 4, dy: -4 },
        Message::MouseWheel { dx: 0, dy: -120 },
    ] {
        assert_eq!(msg, roundtrip(msg.clone()));
    }
}

#[test]
fn test_roundtrip_options_message() {
    let original = Message::SetOptions(vec![
        (OPTION_HEARTBEAT, 2500),
        (OPTION_RELATIVE_MOUSE_MOVES, 1),
    ]);
    assert_eq!(original, roundtrip(original.clone()));
}

#[test]
fn test_roundtrip_screen_info() {
    let original = Message::Info(ScreenInfo {
        x: 0,
        y: 0,
        width: 2560,
        height: 1440,
        zone: 1,
        mx: 1280,
        my: 720,
    });
    assert_eq!(original, roundtrip(original.clone()));
}

// ── Framing robustness ────────────────────────────────────────────────────────

#[test]
fn test_message_stream_survives_byte_at_a_time_delivery() {
    let messages = vec![
        Message::own_hello(),
        Message::Enter {
            x: 1,
            y: 2,
            seq: 1,
            mask: ModifierMask::NONE,
            for_screensaver: false,
        },
        Message::KeyDown {
            id: KeyId(0x0068),
            mask: ModifierMask::NONE,
            button: KeyButton(35),
        },
        Message::Leave,
        Message::Close,
    ];
    let mut stream = Vec::new();
    for msg in &messages {
        stream.extend_from_slice(&encode_frame(msg));
    }

    let mut reader = FrameReader::new();
    let mut decoded = Vec::new();
    for byte in stream {
        reader.feed(&[byte]);
        while let Some(msg) = reader.next_message().expect("decode") {
            decoded.push(msg);
        }
    }
    assert_eq!(decoded, messages);
}

#[test]
fn test_oversized_frame_is_fatal_without_payload() {
    let mut reader = FrameReader::new();
    reader.feed(&(5 * 1024 * 1024u32).to_be_bytes());
    assert!(matches!(
        reader.next_message(),
        Err(ProtocolError::BadFrame(_))
    ));
}

// ── Clipboard transfer end to end ─────────────────────────────────────────────

#[test]
fn test_clipboard_payload_survives_chunked_transfer_over_the_wire() {
    let mut data = ClipboardData::new();
    data.set(
        synergy_core::ClipboardFormat::Text,
        vec![b'x'; 700 * 1024], // forces multiple data chunks
    );
    let payload = data.marshal();

    // Sender side: chunk and frame each piece.
    let mut stream = Vec::new();
    for chunk in chunk_payload(&payload) {
        stream.extend_from_slice(&encode_frame(&Message::ClipboardData {
            id: ClipboardId::Clipboard,
            seq: 9,
            chunk,
        }));
    }

    // Receiver side: decode frames and reassemble.
    let mut reader = FrameReader::new();
    reader.feed(&stream);
    let mut assembler = ClipboardAssembler::new();
    let mut assembled = None;
    while let Some(msg) = reader.next_message().expect("decode") {
        let Message::ClipboardData { id, seq, chunk } = msg else {
            panic!("unexpected message");
        };
        assert_eq!(id, ClipboardId::Clipboard);
        assert_eq!(seq, 9);
        assembled = assembler.push(chunk).expect("chunk accepted");
    }

    let restored = ClipboardData::unmarshal(&assembled.expect("transfer complete")).unwrap();
    assert_eq!(restored, data);
}

// ── Sequence filtering ────────────────────────────────────────────────────────

#[test]
fn test_sequence_filter_accepts_only_newer_sequences() {
    let mut filter = SequenceFilter::new();
    let accepted: Vec<u32> = [5u32, 3, 6, 6, 10]
        .into_iter()
        .filter(|s| filter.accept(*s))
        .collect();
    assert_eq!(accepted, vec![5, 6, 10]);
}
