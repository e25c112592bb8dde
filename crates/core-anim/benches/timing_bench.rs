//! Hot-path benchmark: the time -> frame mapping runs once per
//! animation per tick on the frontend, the render thread, and every
//! worker.

use std::hint::black_box;

use core_anim::RepeatMode;
use core_anim::timing::frame_index;
use criterion::{Criterion, criterion_group, criterion_main};

fn bench_frame_index(c: &mut Criterion) {
    let modes = [
        ("loop", RepeatMode::Loop),
        ("pingpong", RepeatMode::PingPong),
        ("count", RepeatMode::Count(4)),
    ];
    for (name, mode) in modes {
        c.bench_function(&format!("frame_index_{name}_1k"), |b| {
            b.iter(|| {
                let mut acc = 0usize;
                for i in 0..1000 {
                    let t = i as f64 * 0.016;
                    acc += frame_index(black_box(mode), black_box(2.0), black_box(24), t);
                }
                acc
            })
        });
    }
}

criterion_group!(benches, bench_frame_index);
criterion_main!(benches);
