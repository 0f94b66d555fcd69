use criterion::{criterion_group, criterion_main, Criterion};
use fpindex::block::Block;
use fpindex::config::{DefaultConfig, SegmentConfig};
use fpindex::hash::{Hasher, Xxh3Hasher};
use fpindex::log::InMemoryLog;
use fpindex::payload::Payload;

const FP_INDEX: u32 = 2 * DefaultConfig::SLOT_BITS;

fn block_write(c: &mut Criterion) {
    let log = InMemoryLog::new();
    let hasher = Xxh3Hasher;

    c.bench_function("block write", |b| {
        let mut block = Block::<DefaultConfig>::new();
        let mut i = 0u64;
        b.iter(|| {
            let key = i.to_be_bytes();
            let offset = log.append(&key, b"v").unwrap();
            let (fp, _) = hasher.hash_digest(&key);
            // Reset once the block fills, so the loop keeps measuring
            // steady-state inserts rather than degrading into overflow
            // retries for the remainder of the run.
            if block.write(fp, FP_INDEX, Payload::new(offset, 0), false).is_err() {
                block = Block::new();
            }
            i += 1;
        });
    });
}

fn block_read(c: &mut Criterion) {
    let log = InMemoryLog::new();
    let hasher = Xxh3Hasher;
    let mut block = Block::<DefaultConfig>::new();

    let mut keys = Vec::new();
    for i in 0u64..(DefaultConfig::PAYLOADS_LENGTH as u64) {
        let key = i.to_be_bytes();
        let offset = log.append(&key, b"v").unwrap();
        let (fp, _) = hasher.hash_digest(&key);
        if block.write(fp, FP_INDEX, Payload::new(offset, 0), false).is_ok() {
            keys.push(key);
        }
    }

    c.bench_function("block read hit", |b| {
        let mut idx = 0usize;
        b.iter(|| {
            let key = keys[idx % keys.len()];
            let (fp, _) = hasher.hash_digest(&key);
            let _ = block.read(fp, FP_INDEX, 0, &key, &log).unwrap();
            idx += 1;
        });
    });
}

criterion_group!(benches, block_write, block_read);
criterion_main!(benches);
