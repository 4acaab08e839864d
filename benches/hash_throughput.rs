// benches/hash_throughput.rs
use std::fs;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use ftk::cancel::CancelToken;
use ftk::hash::{checksum, HashAlgo, HashInput, HashPool};

const SIZES: [usize; 3] = [16 * 1024, 1024 * 1024, 16 * 1024 * 1024];

fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    (0..len).map(|_| rng.gen()).collect()
}

fn single_file(c: &mut Criterion) {
    let dir = tempdir().expect("tempdir");
    let mut group = c.benchmark_group("checksum");

    for size in SIZES {
        let path = dir.path().join(format!("blob-{}", size));
        fs::write(&path, random_bytes(size)).expect("write blob");
        group.throughput(Throughput::Bytes(size as u64));

        for algo in [HashAlgo::Md5, HashAlgo::Sha1, HashAlgo::Sha256, HashAlgo::Sha512] {
            group.bench_with_input(BenchmarkId::new(algo.name(), size), &path, |b, path| {
                b.iter(|| black_box(checksum(path, algo).expect("checksum")))
            });
        }
    }
    group.finish();
}

fn pool(c: &mut Criterion) {
    let dir = tempdir().expect("tempdir");
    let inputs: Vec<HashInput> = (0..256)
        .map(|i| {
            let path = dir.path().join(format!("f{:03}", i));
            fs::write(&path, random_bytes(64 * 1024)).expect("write file");
            HashInput { display: format!("f{:03}", i), path }
        })
        .collect();

    let mut group = c.benchmark_group("hash_pool");
    group.throughput(Throughput::Bytes(256 * 64 * 1024));
    for jobs in [1, 4, 0] {
        group.bench_with_input(BenchmarkId::new("jobs", jobs), &jobs, |b, &jobs| {
            b.iter(|| {
                let pool = HashPool::new(HashAlgo::Sha256, jobs, CancelToken::new());
                let mut sink = Vec::with_capacity(256 * 80);
                black_box(pool.run(inputs.clone(), &mut sink).expect("pool run"))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, single_file, pool);
criterion_main!(benches);
