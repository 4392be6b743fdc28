use std::{io::Read, sync::Arc};

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pi_scope::{
    critical::Unguarded,
    decode::{channel_a_code, channel_b_code, decode},
    Capture, CaptureExport, CaptureSlot, Sampler, SimulatedWindow, CAPTURE_BYTES, SAMPLE_COUNT,
};
use rand::prelude::*;

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    let mut samples = Box::new([0u32; SAMPLE_COUNT]);
    rng.fill(&mut samples[..]);
    let capture = Capture::new(samples.clone(), 1_000_000);
    let raw = capture.to_wire();

    c.bench_function("channel codes", |b| {
        b.iter(|| {
            let w = black_box(samples[0]);
            (channel_a_code(w), channel_b_code(w))
        })
    });

    c.bench_function("decode capture", |b| {
        b.iter(|| {
            decode(black_box(&raw))
                .unwrap()
                .fold(0f64, |acc, s| acc + s.channel_a + s.channel_b)
        })
    });

    let slot = Arc::new(CaptureSlot::new());
    slot.publish(Arc::new(capture));
    let export = CaptureExport::new(slot);
    let mut out = Vec::with_capacity(CAPTURE_BYTES);
    c.bench_function("drain export", |b| {
        b.iter(|| {
            out.clear();
            let mut handle = export.open_for_read().unwrap();
            handle.read_to_end(black_box(&mut out)).unwrap();
        })
    });

    let gpio = SimulatedWindow::new(samples.to_vec());
    let mut sampler = Sampler::new(&gpio, Unguarded, Arc::new(CaptureSlot::new()));
    c.bench_function("simulated capture", |b| {
        b.iter(|| sampler.capture().unwrap())
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
