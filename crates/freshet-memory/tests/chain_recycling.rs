//! Buffer-chain recycling discipline and sent-byte accounting end to end.

use std::ptr;

use freshet_memory::util::page_size;
use freshet_memory::{
    Buf, BufFlags, BufTag, Bufs, Chain, Pool, chain_add_copy, chain_coalesce_file,
    chain_update_sent, create_chain_of_bufs, update_chains,
};

fn collect_bufs(mut cl: *mut Chain) -> Vec<*mut Buf> {
    let mut v = Vec::new();
    while !cl.is_null() {
        unsafe {
            v.push((*cl).buf);
            cl = (*cl).next;
        }
    }
    v
}

fn chain_len(cl: *mut Chain) -> usize {
    collect_bufs(cl).len()
}

/// Producer fills a chain completely and the caller "sends" every byte.
fn produce_and_send(pool: &Pool, tag: BufTag, num: usize, size: usize) -> *mut Chain {
    let chain = create_chain_of_bufs(pool, &Bufs { num, size }).expect("create chain");
    let mut cl = chain.as_ptr();
    while !cl.is_null() {
        unsafe {
            let b = &mut *(*cl).buf;
            b.tag = tag;
            b.last = b.end;
            b.pos = b.last;
            cl = (*cl).next;
        }
    }
    chain.as_ptr()
}

#[test]
fn recycle_returns_own_buffers_rewound() {
    let pool = Pool::create(8192).expect("create pool");
    let tag = BufTag(0xF00D);

    let mut out = produce_and_send(&pool, tag, 2, 64);
    let mut busy: *mut Chain = ptr::null_mut();
    let mut free: *mut Chain = ptr::null_mut();

    unsafe { update_chains(&pool, &mut free, &mut busy, &mut out, tag) };

    assert!(out.is_null());
    assert!(busy.is_null());
    assert_eq!(chain_len(free), 2);
    for b in collect_bufs(free) {
        unsafe {
            assert_eq!((*b).pos, (*b).start);
            assert_eq!((*b).last, (*b).start);
        }
    }
}

#[test]
fn recycle_routes_foreign_links_to_the_pool_freelist() {
    let pool = Pool::create(8192).expect("create pool");
    let ours = BufTag(0xF00D);
    let theirs = BufTag(0xBEEF);

    let mut out = produce_and_send(&pool, theirs, 2, 64);
    let second_link = unsafe { (*out).next };
    let foreign_bufs = collect_bufs(out);

    let mut busy: *mut Chain = ptr::null_mut();
    let mut free: *mut Chain = ptr::null_mut();
    unsafe { update_chains(&pool, &mut free, &mut busy, &mut out, ours) };

    assert!(out.is_null());
    assert!(busy.is_null());
    assert!(free.is_null());

    // Their buffers are not rewound...
    for b in foreign_bufs {
        unsafe {
            assert_eq!((*b).pos, (*b).end);
        }
    }

    // ...and the link nodes went back to the pool: the next link allocation
    // hands one of them out again.
    let recycled = pool.alloc_chain_link().expect("alloc link");
    assert_eq!(recycled.as_ptr(), second_link);
}

#[test]
fn unsent_bytes_block_recycling() {
    let pool = Pool::create(8192).expect("create pool");
    let tag = BufTag(0xF00D);

    let chain = create_chain_of_bufs(&pool, &Bufs { num: 2, size: 64 }).expect("create chain");
    let mut out = chain.as_ptr();
    unsafe {
        let mut cl = out;
        while !cl.is_null() {
            let b = &mut *(*cl).buf;
            b.tag = tag;
            b.last = b.end;
            cl = (*cl).next;
        }
        // Only the first buffer is sent.
        let b = &mut *(*out).buf;
        b.pos = b.last;
    }

    let mut busy: *mut Chain = ptr::null_mut();
    let mut free: *mut Chain = ptr::null_mut();
    unsafe { update_chains(&pool, &mut free, &mut busy, &mut out, tag) };

    assert_eq!(chain_len(free), 1);
    assert_eq!(chain_len(busy), 1);
    unsafe {
        assert_ne!((*(*busy).buf).size(), 0);
    }
}

#[test]
fn add_copy_preserves_buffer_order() {
    let pool = Pool::create(8192).expect("create pool");
    let src = create_chain_of_bufs(&pool, &Bufs { num: 5, size: 32 }).expect("create chain");

    let mut dest: *mut Chain = ptr::null_mut();
    unsafe { chain_add_copy(&pool, &mut dest, src.as_ptr()).expect("add copy") };

    // Same buffers, same order, different links.
    assert_eq!(collect_bufs(dest), collect_bufs(src.as_ptr()));
    assert_ne!(dest, src.as_ptr());
}

#[test]
fn update_sent_full_consumption_returns_null() {
    let pool = Pool::create(8192).expect("create pool");
    let chain = create_chain_of_bufs(&pool, &Bufs { num: 3, size: 128 }).expect("create chain");
    let mut total = 0u64;
    let mut cl = chain.as_ptr();
    while !cl.is_null() {
        unsafe {
            let b = &mut *(*cl).buf;
            b.last = b.end;
            total += b.size();
            cl = (*cl).next;
        }
    }

    let rest = unsafe { chain_update_sent(chain.as_ptr(), total) };
    assert!(rest.is_null());
    for b in collect_bufs(chain.as_ptr()) {
        unsafe {
            assert_eq!((*b).size(), 0);
        }
    }
}

#[test]
fn update_sent_partial_stops_mid_buffer() {
    let pool = Pool::create(8192).expect("create pool");
    let chain = create_chain_of_bufs(&pool, &Bufs { num: 2, size: 100 }).expect("create chain");
    let mut cl = chain.as_ptr();
    while !cl.is_null() {
        unsafe {
            let b = &mut *(*cl).buf;
            b.last = b.end;
            cl = (*cl).next;
        }
    }

    let rest = unsafe { chain_update_sent(chain.as_ptr(), 150) };
    assert_eq!(rest, unsafe { (*chain.as_ptr()).next });
    unsafe {
        assert_eq!((*(*rest).buf).size(), 50);
    }
}

/// File-backed chain over one descriptor with contiguous offsets.
fn file_chain(pool: &Pool, fd: i32, base: u64, sizes: &[u64]) -> *mut Chain {
    let mut head: *mut Chain = ptr::null_mut();
    let mut pos = base;
    let mut tail: *mut Chain = ptr::null_mut();
    for &size in sizes {
        unsafe {
            let b = pool.calloc_buf().expect("calloc buf").as_ptr();
            (*b).flags = BufFlags::IN_FILE;
            (*b).file = fd;
            (*b).file_pos = pos;
            (*b).file_last = pos + size;
            pos += size;

            let cl = pool.alloc_chain_link().expect("alloc link").as_ptr();
            (*cl).buf = b;
            if head.is_null() {
                head = cl;
            } else {
                (*tail).next = cl;
            }
            tail = cl;
        }
    }
    head
}

#[test]
fn coalesce_consumes_exactly_the_merged_prefix() {
    let pool = Pool::create(8192).expect("create pool");
    let page = page_size() as u64;

    let head = file_chain(&pool, 5, 0, &[page, page, page]);
    let mut walk = head;

    let total = unsafe { chain_coalesce_file(&mut walk, page * 2) };
    assert_eq!(total, page * 2);
    // Two buffers consumed, the walk rests on the third.
    assert_eq!(walk, unsafe { (*(*head).next).next });

    let total = unsafe { chain_coalesce_file(&mut walk, page * 2) };
    assert_eq!(total, page);
    assert!(walk.is_null());
}

#[test]
fn coalesce_result_is_bounded_by_a_page_aligned_limit() {
    let pool = Pool::create(8192).expect("create pool");
    let page = page_size() as u64;

    let mut walk = file_chain(&pool, 5, 0, &[page * 8]);
    let limit = page * 3;
    let total = unsafe { chain_coalesce_file(&mut walk, limit) };
    assert!(total <= limit);
    assert_eq!(total, limit);
}
