use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use klipper_proto::codec::{KlipperCodec, OutgoingFrame};
use tokio_util::codec::{Decoder, Encoder};

fn benchmark_encode(c: &mut Criterion) {
    let mut codec = KlipperCodec::new();
    let frame = OutgoingFrame {
        seq: 1,
        msgid: 0x10,
        payload: vec![0x00, 0x27, 0x10, 0x01, 0x00],
    };
    let mut buffer = BytesMut::with_capacity(256);

    c.bench_function("encode_queue_step", |b| {
        b.iter(|| {
            buffer.clear();
            codec.encode(black_box(frame.clone()), &mut buffer).unwrap();
        })
    });
}

fn benchmark_decode(c: &mut Criterion) {
    let mut codec = KlipperCodec::new();
    let frame = OutgoingFrame {
        seq: 1,
        msgid: 0x10,
        payload: vec![0x00, 0x27, 0x10, 0x01, 0x00],
    };
    let mut buffer = BytesMut::with_capacity(256);
    codec.encode(frame, &mut buffer).unwrap();

    c.bench_function("decode_queue_step", |b| {
        b.iter(|| {
            let mut buf_clone = buffer.clone();
            let _ = codec.decode(black_box(&mut buf_clone)).unwrap();
        })
    });
}

criterion_group!(benches, benchmark_encode, benchmark_decode);
criterion_main!(benches);
