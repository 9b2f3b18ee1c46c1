use criterion::{black_box, criterion_group, criterion_main, Criterion};
use datapak::{ChecksumKind, CompMethod, Header, Writer};
use std::io::Cursor;

fn pack_archive(method: CompMethod, per_file: bool, data: &[u8]) {
    let header = Header::new(method, 3, ChecksumKind::Crc32, per_file);
    let mut writer = Writer::from_stream(Cursor::new(Vec::new()), header, Vec::new()).unwrap();
    writer.add_bytes("bench.bin", data.to_vec(), Vec::new()).unwrap();
    writer.finalize().unwrap();
}

fn bench_pack_single_file(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];

    c.bench_function("pack_1mb_zstd_joint", |b| {
        b.iter(|| pack_archive(CompMethod::Zstd, false, black_box(&data)))
    });
    c.bench_function("pack_1mb_zstd_per_file", |b| {
        b.iter(|| pack_archive(CompMethod::Zstd, true, black_box(&data)))
    });
    c.bench_function("pack_1mb_lz4_joint", |b| {
        b.iter(|| pack_archive(CompMethod::Lz4, false, black_box(&data)))
    });
    c.bench_function("pack_1mb_stored", |b| {
        b.iter(|| pack_archive(CompMethod::Stored, false, black_box(&data)))
    });
}

fn bench_pack_many_small(c: &mut Criterion) {
    let data = vec![99u8; 16 * 1024];

    c.bench_function("pack_64x16k_zlib_joint", |b| {
        b.iter(|| {
            let header = Header::new(CompMethod::Zlib, 6, ChecksumKind::Crc32, false);
            let mut writer =
                Writer::from_stream(Cursor::new(Vec::new()), header, Vec::new()).unwrap();
            for i in 0..64 {
                writer
                    .add_bytes(&format!("file_{i}.bin"), black_box(data.clone()), Vec::new())
                    .unwrap();
            }
            writer.finalize().unwrap();
        })
    });
}

criterion_group!(benches, bench_pack_single_file, bench_pack_many_small);
criterion_main!(benches);
