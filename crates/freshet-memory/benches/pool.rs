//! Pool allocation benchmarks: the request-lifecycle patterns the server
//! actually runs. Many small allocations, reset-and-reuse, link recycling.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use freshet_memory::util::page_size;
use freshet_memory::{BufTag, Bufs, Pool, create_chain_of_bufs, update_chains};

fn small_allocations(c: &mut Criterion) {
    c.bench_function("alloc_small_64x128", |b| {
        b.iter(|| {
            let pool = Pool::create(16 * 1024).expect("create pool");
            for _ in 0..128 {
                black_box(pool.alloc(black_box(64)).expect("alloc"));
            }
        });
    });
}

fn reset_reuse(c: &mut Criterion) {
    c.bench_function("reset_and_refill", |b| {
        let mut pool = Pool::create(16 * 1024).expect("create pool");
        b.iter(|| {
            for _ in 0..128 {
                black_box(pool.alloc(black_box(64)).expect("alloc"));
            }
            pool.reset();
        });
    });
}

fn large_allocations(c: &mut Criterion) {
    c.bench_function("alloc_large_roundtrip", |b| {
        let pool = Pool::create(4 * 1024).expect("create pool");
        let size = page_size() * 2;
        b.iter(|| {
            let p = pool.alloc(black_box(size)).expect("alloc");
            pool.free(black_box(p));
        });
    });
}

fn chain_recycling(c: &mut Criterion) {
    c.bench_function("chain_produce_recycle", |b| {
        let tag = BufTag(1);
        b.iter(|| {
            let pool = Pool::create(16 * 1024).expect("create pool");
            let mut free: *mut _ = std::ptr::null_mut();
            let mut busy: *mut _ = std::ptr::null_mut();
            let mut out =
                create_chain_of_bufs(&pool, &Bufs { num: 4, size: 256 }).expect("chain").as_ptr();
            unsafe {
                let mut cl = out;
                while !cl.is_null() {
                    let buf = &mut *(*cl).buf;
                    buf.tag = tag;
                    cl = (*cl).next;
                }
                update_chains(&pool, &mut free, &mut busy, &mut out, tag);
            }
            black_box(free);
        });
    });
}

criterion_group!(benches, small_allocations, reset_reuse, large_allocations, chain_recycling);
criterion_main!(benches);
