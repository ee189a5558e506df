use criterion::{black_box, criterion_group, criterion_main, Criterion};

use czmil::bitio::{pack, unpack, BitReader, BitWriter};
use czmil::header::{Builder, FileType};
use czmil::record::cwf;

fn bench_pack_unpack(c: &mut Criterion) {
    c.bench_function("pack 10-bit field", |b| {
        let mut buf = [0u8; 4];
        b.iter(|| pack(black_box(&mut buf), 3, 10, black_box(517)));
    });

    c.bench_function("unpack 10-bit field", |b| {
        let mut buf = [0u8; 4];
        pack(&mut buf, 3, 10, 517);
        b.iter(|| unpack(black_box(&buf), 3, 10));
    });
}

fn bench_bit_writer_reader(c: &mut Criterion) {
    c.bench_function("BitWriter 16 mixed-width fields", |b| {
        b.iter(|| {
            let mut w = BitWriter::new();
            for width in 1..=16u32 {
                w.write(black_box(width * 3), width);
            }
            black_box(w.into_bytes())
        });
    });

    c.bench_function("BitReader 16 mixed-width fields", |b| {
        let mut w = BitWriter::new();
        for width in 1..=16u32 {
            w.write(width * 3, width);
        }
        let bytes = w.into_bytes();
        b.iter(|| {
            let mut r = BitReader::new(black_box(&bytes));
            for width in 1..=16u32 {
                black_box(r.read(width));
            }
        });
    });
}

fn bench_cwf_record_codec(c: &mut Criterion) {
    let header = Builder::new(FileType::Cwf, (2, 0)).into_header().unwrap();
    let mut record = cwf::Record {
        shot_id: 42,
        timestamp: 1_000_100,
        scan_angle: 12.5,
        ..Default::default()
    };
    for channel in &mut record.channels {
        channel.packet_indices = vec![0, 1];
        channel.mcwp_ranges = vec![cwf::RANGE_INVALID, 12.3];
        channel.packets = vec![[100u16; 64], [200u16; 64]];
    }

    c.bench_function("encode one 9-channel cwf record", |b| {
        b.iter(|| cwf::encode(black_box(&header), 1_000_000, None, black_box(&record)).unwrap());
    });

    let bytes = cwf::encode(&header, 1_000_000, None, &record).unwrap();
    c.bench_function("decode one 9-channel cwf record", |b| {
        b.iter(|| cwf::decode(black_box(&header), 1_000_000, black_box(&bytes)));
    });
}

criterion_group!(
    benches,
    bench_pack_unpack,
    bench_bit_writer_reader,
    bench_cwf_record_codec
);
criterion_main!(benches);
