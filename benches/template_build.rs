//! Benchmarks for packet template construction and sequence stamping
//!
//! The send path stamps a sequence and re-sums the transport header once per
//! probe, so stamping must stay far below the pacing period.
//!
//! Platform: cross-platform, no hardware required.

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use wireprobe::wire::checksum;
use wireprobe::{PacketTemplate, ProbeKind};

fn bench_template_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("template_build");

    group.bench_function("echo_64", |b| {
        b.iter(|| {
            let tpl = PacketTemplate::build(black_box(ProbeKind::Echo), black_box(64)).unwrap();
            black_box(tpl)
        })
    });

    group.bench_function("discard_1500", |b| {
        b.iter(|| {
            let tpl =
                PacketTemplate::build(black_box(ProbeKind::Discard), black_box(1500)).unwrap();
            black_box(tpl)
        })
    });

    group.finish();
}

fn bench_sequence_stamping(c: &mut Criterion) {
    let mut template = PacketTemplate::build(ProbeKind::Echo, 64).unwrap();
    let mut seq = 0u16;

    c.bench_function("stamp_echo_sequence", |b| {
        b.iter(|| {
            seq = seq.wrapping_add(1);
            template.stamp_echo_sequence(black_box(seq));
            black_box(template.transport_bytes())
        })
    });
}

fn bench_header_checksum(c: &mut Criterion) {
    let template = PacketTemplate::build(ProbeKind::Echo, 64).unwrap();
    let ip = template.ip_bytes();

    c.bench_function("ipv4_checksum_verify", |b| {
        b.iter(|| black_box(checksum::verify(black_box(&ip))))
    });
}

criterion_group!(
    benches,
    bench_template_build,
    bench_sequence_stamping,
    bench_header_checksum
);
criterion_main!(benches);
