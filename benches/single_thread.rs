use std::hint::black_box;
use std::io::{Cursor, Write};

use chunkcsv::{Format, Reader};
use criterion::{criterion_group, criterion_main, Bencher, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn prepare(rows: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut out = Vec::with_capacity(rows * 64);
    out.extend_from_slice(b"id,name,value,score,note\n");
    for i in 0..rows {
        let name_len = rng.gen_range(4..16);
        let name: String = (0..name_len)
            .map(|_| rng.gen_range(b'a'..=b'z') as char)
            .collect();
        let value: u32 = rng.gen();
        let score: f64 = rng.gen_range(0.0..100.0);
        if rng.gen_ratio(1, 10) {
            writeln!(out, "{i},\"{name},{name}\",{value},{score:.3},\"quoted \"\"note\"\"\"")
                .unwrap();
        } else {
            writeln!(out, "{i},{name},{value},{score:.3},plain note").unwrap();
        }
    }
    out
}

pub fn chunkcsv_rows(b: &mut Bencher, slice: &[u8]) {
    b.iter(|| {
        let mut reader =
            Reader::from_reader(Cursor::new(slice.to_vec()), Format::new()).unwrap();
        while let Some(row) = reader.read_row().unwrap() {
            for field in row.iter() {
                black_box(field.bytes());
            }
        }
    })
}

pub fn chunkcsv_typed(b: &mut Bencher, slice: &[u8]) {
    b.iter(|| {
        let mut reader =
            Reader::from_reader(Cursor::new(slice.to_vec()), Format::new()).unwrap();
        while let Some(row) = reader.read_row().unwrap() {
            black_box(row.field(0).unwrap().try_get::<i64>());
            black_box(row.field(3).unwrap().try_get::<f64>());
        }
    })
}

pub fn csv_crate(b: &mut Bencher, slice: &[u8]) {
    b.iter(|| {
        let cursor = Cursor::new(slice);
        for row in csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(cursor)
            .into_byte_records()
        {
            for cell in row.unwrap().iter() {
                black_box(cell);
            }
        }
    })
}

fn bench_parsers(c: &mut Criterion) {
    let mut group = c.benchmark_group("Parsers");
    for i in [1_000, 10_000, 100_000] {
        let data = prepare(i);
        group.bench_with_input(BenchmarkId::new("chunkcsv", i), &i, |b, _| {
            chunkcsv_rows(b, &data)
        });
        group.bench_with_input(BenchmarkId::new("chunkcsv (typed)", i), &i, |b, _| {
            chunkcsv_typed(b, &data)
        });
        group.bench_with_input(BenchmarkId::new("csv", i), &i, |b, _| csv_crate(b, &data));
    }
    group.finish();
}

criterion_group!(benches, bench_parsers);
criterion_main!(benches);
