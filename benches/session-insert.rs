use bytes::Bytes;
use criterion::*;
use vjitter::config::Config;
use vjitter::packet::PacketBuilder;
use vjitter::JitterBuffer;

fn in_order_packets(n: u16, ts: u32) -> Vec<vjitter::Packet> {
    (0..n)
        .map(|i| {
            PacketBuilder::new(i, ts, Bytes::from_static(b"0123456789012345678901234567890123456789"))
                .marker(i + 1 == n)
                .first_packet(i == 0)
                .build()
        })
        .collect()
}

fn reordered_packets(n: u16, ts: u32) -> Vec<vjitter::Packet> {
    let mut packets = in_order_packets(n, ts);
    // Swap adjacent pairs: a cheap, deterministic stand-in for network
    // reordering that still exercises the session's out-of-order insert path.
    let mut i = 0;
    while i + 1 < packets.len() {
        packets.swap(i, i + 1);
        i += 2;
    }
    packets
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_insert");
    group.throughput(Throughput::Elements(1));

    let in_order = in_order_packets(64, 3000);
    group.bench_function("in_order_64_packets", |b| {
        b.iter(|| {
            let buffer = JitterBuffer::new(Config::default());
            buffer.start();
            for packet in &in_order {
                let slot = buffer.get_frame(packet, 0).unwrap();
                buffer.insert_packet(slot, packet, 0).unwrap();
            }
        })
    });

    let reordered = reordered_packets(64, 3000);
    group.bench_function("reordered_64_packets", |b| {
        b.iter(|| {
            let buffer = JitterBuffer::new(Config::default());
            buffer.start();
            for packet in &reordered {
                let slot = buffer.get_frame(packet, 0).unwrap();
                buffer.insert_packet(slot, packet, 0).unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
