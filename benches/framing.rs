//! Framing benchmarks
//!
//! Measures packet encoding and stream reassembly without network I/O.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use simple_networking::protocol::{Packet, StreamReassembler};

fn bench_packet_encode(c: &mut Criterion) {
    c.bench_function("packet_encode_mixed", |b| {
        b.iter(|| {
            let mut packet = Packet::with_id(7);
            packet
                .write(42u32)
                .write(1.5f32)
                .write(-2.25f64)
                .write(true)
                .write("player position update");
            packet.write_length().unwrap();
            black_box(packet.into_bytes())
        });
    });
}

fn bench_packet_decode(c: &mut Criterion) {
    let mut source = Packet::with_id(7);
    source
        .write(42u32)
        .write(1.5f32)
        .write(-2.25f64)
        .write(true)
        .write("player position update");
    let bytes = source.as_slice().to_vec();

    c.bench_function("packet_decode_mixed", |b| {
        b.iter(|| {
            let mut packet = Packet::from_bytes(&bytes);
            let id = packet.read::<i16>().unwrap();
            let a = packet.read::<u32>().unwrap();
            let x = packet.read::<f32>().unwrap();
            let y = packet.read::<f64>().unwrap();
            let flag = packet.read::<bool>().unwrap();
            let text = packet.read::<String>().unwrap();
            black_box((id, a, x, y, flag, text))
        });
    });
}

fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassemble_stream");

    for payload_size in [16usize, 1024, 16 * 1024] {
        let mut wire = Vec::new();
        for _ in 0..64 {
            let mut frame = Packet::new();
            frame.write(vec![0x5A; payload_size]);
            frame.write_length().unwrap();
            wire.extend_from_slice(frame.as_slice());
        }
        group.throughput(Throughput::Bytes(wire.len() as u64));

        // Reads of 4 KiB split frames at arbitrary points
        group.bench_with_input(BenchmarkId::from_parameter(payload_size), &wire, |b, wire| {
            b.iter(|| {
                let mut reassembler = StreamReassembler::new();
                let mut frames = 0;
                for chunk in wire.chunks(4096) {
                    frames += reassembler.push(chunk, |p| drop(black_box(p))).unwrap();
                }
                black_box(frames)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_packet_encode, bench_packet_decode, bench_reassembly);

criterion_main!(benches);
