//! Record store benchmarks
//!
//! - Append latency for small and large entries
//! - `read_all` over logs of growing length
//! - Frame encoding per codec

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ml_logger::codec::{encode_frame, Codec};
use ml_logger::record::{FsRecordStore, MemoryRecordStore};
use ml_logger::{NumericArray, Payload, RecordStore};
use tokio::runtime::Runtime;

#[allow(clippy::cast_precision_loss)]
fn array_payload(len: usize) -> Payload {
    Payload::Array(NumericArray::from_vec((0..len).map(|i| i as f64 * 0.5).collect()))
}

fn bench_append(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = &FsRecordStore::new(dir.path());
    let mut group = c.benchmark_group("append");

    for len in [1, 1_000, 100_000] {
        let payload = array_payload(len);
        group.bench_with_input(BenchmarkId::new("fs", len), &payload, |b, payload| {
            b.to_async(&rt).iter(|| async move {
                store
                    .append("bench", "append.pkl", black_box(payload))
                    .await
                    .unwrap();
            });
        });
    }
    group.finish();
}

fn bench_read_all(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let fs = &FsRecordStore::new(dir.path());
    let memory = &MemoryRecordStore::new();
    let mut group = c.benchmark_group("read_all");

    for entries in [10_i64, 1_000] {
        let key = format!("read-{entries}.pkl");
        rt.block_on(async {
            for i in 0..entries {
                fs.append("bench", &key, &Payload::Integer(i)).await.unwrap();
                memory.append("bench", &key, &Payload::Integer(i)).await.unwrap();
            }
        });

        group.bench_with_input(BenchmarkId::new("fs", entries), &key, |b, key| {
            b.to_async(&rt)
                .iter(|| async move { black_box(fs.read_all("bench", key).await.unwrap()) });
        });
        group.bench_with_input(BenchmarkId::new("memory", entries), &key, |b, key| {
            b.to_async(&rt)
                .iter(|| async move { black_box(memory.read_all("bench", key).await.unwrap()) });
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let payload = array_payload(10_000);
    let mut group = c.benchmark_group("encode_frame");

    let mut codecs = vec![Codec::Plain];
    if cfg!(feature = "compression") {
        codecs.extend([Codec::Lz4, Codec::Zstd]);
    }
    for codec in codecs {
        group.bench_function(codec.as_str(), |b| {
            b.iter(|| encode_frame(black_box(&payload), codec).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_append, bench_read_all, bench_encode);
criterion_main!(benches);
