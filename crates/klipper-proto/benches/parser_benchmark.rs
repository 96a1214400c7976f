use criterion::{black_box, criterion_group, criterion_main, Criterion};
use klipper_proto::parser::{encode_frame, Parser};

fn benchmark_parse(c: &mut Criterion) {
    let parser = Parser::new();
    let payload = [
        0x00, 0x00, 0x27, 0x10, // interval = 10000
        0x00, 0x01, // count = 1
        0x00, 0x00, // add = 0
    ];
    let frame = encode_frame(1, 0x10, &payload);

    c.bench_function("parse_queue_step", |b| {
        b.iter(|| {
            let _ = parser.parse(black_box(&frame));
        })
    });
}

fn benchmark_encode_frame(c: &mut Criterion) {
    let payload = [0x00, 0x00, 0x27, 0x10, 0x00, 0x01, 0x00, 0x00];

    c.bench_function("encode_queue_step", |b| {
        b.iter(|| {
            let _ = encode_frame(black_box(1), black_box(0x10), black_box(&payload));
        })
    });
}

criterion_group!(benches, benchmark_parse, benchmark_encode_frame);
criterion_main!(benches);
