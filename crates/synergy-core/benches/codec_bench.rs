//! Criterion benchmarks for the protocol codec hot path.
//!
//! Mouse moves dominate the wire during normal use, so encode/decode of
//! `DMMV` is the number that matters; the clipboard case covers the large
//! payload path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use synergy_core::protocol::messages::{ClipboardChunk, ClipboardId};
use synergy_core::{encode_frame, FrameReader, Message};

fn bench_encode_mouse_move(c: &mut Criterion) {
    let msg = Message::MouseMove { x: 1234, y: 567 };
    c.bench_function("encode_mouse_move", |b| {
        b.iter(|| encode_frame(black_box(&msg)))
    });
}

fn bench_decode_mouse_move(c: &mut Criterion) {
    let frame = encode_frame(&Message::MouseMove { x: 1234, y: 567 });
    c.bench_function("decode_mouse_move", |b| {
        b.iter(|| {
            let mut reader = FrameReader::new();
            reader.feed(black_box(&frame));
            reader.next_message().unwrap().unwrap()
        })
    });
}

fn bench_decode_clipboard_chunk(c: &mut Criterion) {
    let frame = encode_frame(&Message::ClipboardData {
        id: ClipboardId::Clipboard,
        seq: 1,
        chunk: ClipboardChunk::Data(vec![0x5A; 64 * 1024]),
    });
    c.bench_function("decode_clipboard_chunk_64k", |b| {
        b.iter(|| {
            let mut reader = FrameReader::new();
            reader.feed(black_box(&frame));
            reader.next_message().unwrap().unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_mouse_move,
    bench_decode_mouse_move,
    bench_decode_clipboard_chunk
);
criterion_main!(benches);
