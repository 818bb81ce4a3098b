use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use chat_protocol::core::codec::{decode_datagram, encode_datagram, BinaryCodec, TextCodec};
use chat_protocol::core::packet::Packet;
use chat_protocol::transport::xor::{XorCodec, XorKey};
use tokio_util::codec::{Decoder, Encoder};

fn message(size: usize) -> Packet {
    Packet::message("bench_user", "x y@".repeat(size / 4))
}

#[allow(clippy::unwrap_used)]
fn bench_binary_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("binary_codec");
    for &size in &[64usize, 512, 4096, 65536] {
        let packet = message(size);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || BytesMut::with_capacity(size + 64),
                |mut buf| BinaryCodec::new().encode(&packet, &mut buf).unwrap(),
                BatchSize::SmallInput,
            )
        });

        let mut frame = BytesMut::new();
        BinaryCodec::new().encode(&packet, &mut frame).unwrap();
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter_batched(
                || frame.clone(),
                |mut buf| assert!(BinaryCodec::new().decode(&mut buf).unwrap().is_some()),
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("xor_decode_{size}b"), |b| {
            let mut ciphered = BytesMut::new();
            XorCodec::new(BinaryCodec::new(), XorKey::new(0x5A))
                .encode(&packet, &mut ciphered)
                .unwrap();
            b.iter_batched(
                || ciphered.clone(),
                |mut buf| {
                    let mut codec = XorCodec::new(BinaryCodec::new(), XorKey::new(0x5A));
                    assert!(codec.decode(&mut buf).unwrap().is_some())
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_text_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_codec");
    for &size in &[64usize, 512, 4096, 65536] {
        let packet = message(size);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || BytesMut::with_capacity(size * 2),
                |mut buf| TextCodec::new().encode(&packet, &mut buf).unwrap(),
                BatchSize::SmallInput,
            )
        });

        let mut line = BytesMut::new();
        TextCodec::new().encode(&packet, &mut line).unwrap();
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter_batched(
                || line.clone(),
                |mut buf| assert!(TextCodec::new().decode(&mut buf).unwrap().is_some()),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_datagram(c: &mut Criterion) {
    let packet = message(512);
    let datagram = encode_datagram(&packet);
    c.bench_function("datagram_roundtrip_512b", |b| {
        b.iter(|| decode_datagram(&encode_datagram(&packet)).unwrap())
    });
    c.bench_function("datagram_decode_512b", |b| {
        b.iter(|| decode_datagram(&datagram).unwrap())
    });
}

criterion_group!(benches, bench_binary_codec, bench_text_codec, bench_datagram);
criterion_main!(benches);
