//! Criterion benchmarks for key map lookup and program synthesis.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use synergy_core::keymap::us_ascii;
use synergy_core::{KeyButton, KeyId, KeyStateEngine, ModifierMask};

fn bench_best_candidate(c: &mut Criterion) {
    let map = us_ascii::key_map();
    c.bench_function("best_candidate_shifted_letter", |b| {
        b.iter(|| {
            map.best_candidate(
                black_box(KeyId(0x0041)),
                ModifierMask::SHIFT,
                ModifierMask::NONE,
            )
        })
    });
}

fn bench_key_down_program(c: &mut Criterion) {
    c.bench_function("key_down_with_envelope", |b| {
        let mut engine = KeyStateEngine::new(us_ascii::key_map());
        b.iter(|| {
            engine
                .key_down(
                    black_box(KeyId(0x0041)),
                    ModifierMask::SHIFT,
                    KeyButton(1),
                )
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_best_candidate, bench_key_down_program);
criterion_main!(benches);
