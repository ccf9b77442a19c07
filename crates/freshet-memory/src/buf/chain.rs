//! Singly linked chains of buffer descriptors.
//!
//! Chains thread [`Buf`]s through output filters. Link nodes are pool
//! memory; a released link goes onto its pool's freelist and is handed back
//! by the next [`Pool::alloc_chain_link`] call, so steady-state traffic on a
//! long-lived pool allocates no new links at all. The freelist is per-pool
//! and dies with [`Pool::reset`].

use core::mem;
use core::ptr::{self, NonNull};

use crate::buf::{Buf, BufFlags, BufTag, Bufs};
use crate::error::{AllocError, AllocResult};
use crate::pool::{Pool, alloc_raw};
use crate::util::page_size;

/// One link of a buffer chain.
#[repr(C)]
#[derive(Debug)]
pub struct Chain {
    pub buf: *mut Buf,
    pub next: *mut Chain,
}

impl Pool {
    /// Returns a link, reusing the pool's freelist when possible. The link
    /// comes back detached (`next` is null); `buf` is the caller's to set.
    pub fn alloc_chain_link(&self) -> AllocResult<NonNull<Chain>> {
        unsafe {
            let pool = self.as_inner();

            let cl = (*pool).chain;
            if !cl.is_null() {
                (*pool).chain = (*cl).next;
                (*cl).next = ptr::null_mut();
                return Ok(NonNull::new_unchecked(cl));
            }

            let cl = alloc_raw(pool, mem::size_of::<Chain>())?.cast::<Chain>();
            (*cl.as_ptr()).buf = ptr::null_mut();
            (*cl.as_ptr()).next = ptr::null_mut();
            Ok(cl)
        }
    }

    /// Pushes a link onto the pool's freelist. The buffer it pointed at is
    /// left alone.
    pub fn free_chain(&self, cl: NonNull<Chain>) {
        unsafe {
            let pool = self.as_inner();
            (*cl.as_ptr()).next = (*pool).chain;
            (*pool).chain = cl.as_ptr();
        }
    }
}

/// Builds `bufs.num` writable buffers of `bufs.size` bytes each over one
/// contiguous content allocation, chained in order.
pub fn create_chain_of_bufs(pool: &Pool, bufs: &Bufs) -> AllocResult<NonNull<Chain>> {
    if bufs.num == 0 {
        return Err(AllocError::InvalidLayout { reason: "buffer batch is empty" });
    }
    let total = bufs
        .num
        .checked_mul(bufs.size)
        .ok_or(AllocError::InvalidLayout { reason: "buffer batch size overflows" })?;

    unsafe {
        let mut p = alloc_raw(pool.as_inner(), total)?.as_ptr();

        let mut chain: *mut Chain = ptr::null_mut();
        let mut ll: *mut *mut Chain = &mut chain;

        for _ in 0..bufs.num {
            let b = pool.calloc_buf()?.as_ptr();

            (*b).pos = p;
            (*b).last = p;
            (*b).flags = BufFlags::TEMPORARY;

            (*b).start = p;
            p = p.add(bufs.size);
            (*b).end = p;

            let cl = pool.alloc_chain_link()?.as_ptr();
            (*cl).buf = b;
            *ll = cl;
            ll = &mut (*cl).next;
        }

        *ll = ptr::null_mut();

        Ok(NonNull::new_unchecked(chain))
    }
}

/// Appends a shallow copy of `src` to `*chain`: fresh links, shared buffer
/// descriptors. On allocation failure the partially built tail is terminated
/// before the error is reported.
///
/// # Safety
/// `*chain` and `src` must be null or heads of well-formed chains whose
/// links and buffers are live.
pub unsafe fn chain_add_copy(
    pool: &Pool,
    chain: &mut *mut Chain,
    src: *mut Chain,
) -> AllocResult<()> {
    unsafe {
        let mut ll: *mut *mut Chain = chain;

        let mut cl = *chain;
        while !cl.is_null() {
            ll = &mut (*cl).next;
            cl = (*cl).next;
        }

        let mut src = src;
        while !src.is_null() {
            let cl = match pool.alloc_chain_link() {
                Ok(cl) => cl.as_ptr(),
                Err(err) => {
                    *ll = ptr::null_mut();
                    return Err(err);
                }
            };

            (*cl).buf = (*src).buf;
            *ll = cl;
            ll = &mut (*cl).next;
            src = (*src).next;
        }

        *ll = ptr::null_mut();
        Ok(())
    }
}

/// Detaches and returns the head of `*free`, or allocates a link with a
/// fresh zeroed buffer when the free list is empty.
///
/// # Safety
/// `*free` must be null or the head of a well-formed chain.
pub unsafe fn chain_get_free_buf(pool: &Pool, free: &mut *mut Chain) -> AllocResult<NonNull<Chain>> {
    unsafe {
        if !(*free).is_null() {
            let cl = *free;
            *free = (*cl).next;
            (*cl).next = ptr::null_mut();
            return Ok(NonNull::new_unchecked(cl));
        }

        let cl = pool.alloc_chain_link()?;
        (*cl.as_ptr()).buf = pool.calloc_buf()?.as_ptr();
        (*cl.as_ptr()).next = ptr::null_mut();
        Ok(cl)
    }
}

/// Moves `*out` onto the tail of `*busy`, then recycles the fully consumed
/// prefix of `*busy`: buffers produced under `tag` are rewound and prepended
/// to `*free`, foreign links go back to the pool's freelist (their buffers
/// belong to another producer and are left untouched). Stops at the first
/// buffer with unsent bytes.
///
/// # Safety
/// The three heads must be null or heads of well-formed chains with live
/// links and buffers, and must belong to `pool`.
pub unsafe fn update_chains(
    pool: &Pool,
    free: &mut *mut Chain,
    busy: &mut *mut Chain,
    out: &mut *mut Chain,
    tag: BufTag,
) {
    unsafe {
        if !(*out).is_null() {
            if (*busy).is_null() {
                *busy = *out;
            } else {
                let mut cl = *busy;
                while !(*cl).next.is_null() {
                    cl = (*cl).next;
                }
                (*cl).next = *out;
            }
            *out = ptr::null_mut();
        }

        while !(*busy).is_null() {
            let cl = *busy;
            let buf = &mut *(*cl).buf;

            if buf.size() != 0 {
                break;
            }

            if buf.tag != tag {
                *busy = (*cl).next;
                pool.free_chain(NonNull::new_unchecked(cl));
                continue;
            }

            buf.pos = buf.start;
            buf.last = buf.start;

            *busy = (*cl).next;
            (*cl).next = *free;
            *free = cl;
        }
    }
}

/// Measures how many file bytes starting at `*input` can go out in one
/// system call: consecutive file-backed buffers on the same descriptor with
/// contiguous offsets, up to `limit`. When `limit` cuts a buffer short, the
/// cut is rounded up to a page-aligned file offset if the buffer reaches
/// that far (a page-aligned tail keeps zero-copy file send on the fast
/// path). Advances `*input` past the fully consumed prefix and returns the
/// byte total.
///
/// # Safety
/// `*input` must be the head of a well-formed, non-empty chain whose first
/// buffer is file-backed.
pub unsafe fn chain_coalesce_file(input: &mut *mut Chain, limit: u64) -> u64 {
    unsafe {
        let mut total: u64 = 0;

        let mut cl = *input;
        let fd = (*(*cl).buf).file;
        let page = page_size() as u64;

        loop {
            let buf = &mut *(*cl).buf;
            let mut size = buf.file_last - buf.file_pos;

            if size > limit - total {
                size = limit - total;

                let aligned = (buf.file_pos + size + page - 1) & !(page - 1);

                if aligned <= buf.file_last {
                    size = aligned - buf.file_pos;
                }

                total += size;
                break;
            }

            total += size;
            let fprev = buf.file_pos + size;
            cl = (*cl).next;

            if cl.is_null()
                || !(*(*cl).buf).in_file()
                || total >= limit
                || fd != (*(*cl).buf).file
                || fprev != (*(*cl).buf).file_pos
            {
                break;
            }
        }

        *input = cl;
        total
    }
}

/// Consumes `sent` bytes from the front of a chain, advancing memory and
/// file windows. Special buffers are skipped outright. Returns the first
/// link with bytes still to send, or null when everything real was consumed.
///
/// # Safety
/// `chain` must be null or the head of a well-formed chain with live links
/// and buffers.
pub unsafe fn chain_update_sent(chain: *mut Chain, sent: u64) -> *mut Chain {
    unsafe {
        let mut cl = chain;
        let mut sent = sent;

        while !cl.is_null() {
            let buf = &mut *(*cl).buf;

            if buf.is_special() {
                cl = (*cl).next;
                continue;
            }

            if sent == 0 {
                break;
            }

            let size = buf.size();

            if sent >= size {
                sent -= size;

                if buf.in_memory() {
                    buf.pos = buf.last;
                }

                if buf.in_file() {
                    buf.file_pos = buf.file_last;
                }

                cl = (*cl).next;
                continue;
            }

            if buf.in_memory() {
                buf.pos = buf.pos.add(sent as usize);
            }

            if buf.in_file() {
                buf.file_pos += sent;
            }

            break;
        }

        cl
    }
}
