//! Chained-arena memory pool.
//!
//! A [`Pool`] services small allocations by bump-pointing within fixed-size
//! blocks and delegates requests larger than [`Pool::max`] to the system
//! allocator, tracking them for bulk release. Nothing is returned to the pool
//! individually (apart from [`Pool::free`] on a large allocation): memory is
//! reclaimed wholesale by [`Pool::reset`] or by dropping the pool.
//!
//! A pool is owned by one logical task at a time; the handle is neither
//! `Send` nor `Sync` and no operation locks.

use core::alloc::Layout;
use core::mem;
use core::ptr::{self, NonNull};
use std::alloc;

use tracing::{debug, trace};

use crate::buf::chain::Chain;
use crate::error::{AllocError, AllocResult, Reclaim};
use crate::util::{ALIGNMENT, POOL_ALIGNMENT, align_ptr, page_size};

pub mod cleanup;

use cleanup::CleanupRecord;

/// Per-block bump state. This is the whole header of a sub-block.
#[repr(C)]
pub(crate) struct PoolData {
    pub(crate) last: *mut u8,
    pub(crate) end: *mut u8,
    pub(crate) next: *mut PoolInner,
    pub(crate) failed: usize,
}

/// Head-block header. Only the head of a chain uses the fields past `d`;
/// in sub-blocks that space is handed out as payload.
#[repr(C)]
pub(crate) struct PoolInner {
    pub(crate) d: PoolData,
    pub(crate) max: usize,
    pub(crate) current: *mut PoolInner,
    pub(crate) chain: *mut Chain,
    pub(crate) large: *mut LargeBlock,
    pub(crate) cleanup: *mut CleanupRecord,
}

/// Bookkeeping record for one system-allocator block. Lives in small-block
/// memory; a record whose `alloc` is null is free for reuse.
#[repr(C)]
pub(crate) struct LargeBlock {
    pub(crate) alloc: *mut u8,
    pub(crate) layout: Layout,
    pub(crate) next: *mut LargeBlock,
}

/// Owning handle to a pool chain. Dropping it runs the registered cleanups,
/// releases every tracked large allocation and frees every block, in that
/// order.
pub struct Pool {
    inner: NonNull<PoolInner>,
}

impl Pool {
    /// Creates a pool backed by one block of `size` total bytes (header
    /// included). The largest request serviced from block storage is
    /// `min(size - header, page_size - 1)`; anything bigger goes through the
    /// system allocator.
    pub fn create(size: usize) -> AllocResult<Pool> {
        if size <= mem::size_of::<PoolInner>() {
            return Err(AllocError::InvalidLayout { reason: "pool size does not fit the pool header" });
        }

        // SAFETY: size is non-zero and POOL_ALIGNMENT is a power of two.
        let layout = unsafe { Layout::from_size_align_unchecked(size, POOL_ALIGNMENT) };
        let m = unsafe { alloc::alloc(layout) };
        let Some(block) = NonNull::new(m) else {
            return Err(AllocError::OutOfMemory { requested: size });
        };

        let p = block.as_ptr() as *mut PoolInner;
        // SAFETY: the block is live, uniquely owned and large enough for the
        // header; all fields are written before the first read.
        unsafe {
            (*p).d.last = m.add(mem::size_of::<PoolInner>());
            (*p).d.end = m.add(size);
            (*p).d.next = ptr::null_mut();
            (*p).d.failed = 0;

            let payload = size - mem::size_of::<PoolInner>();
            (*p).max = payload.min(page_size() - 1);

            (*p).current = p;
            (*p).chain = ptr::null_mut();
            (*p).large = ptr::null_mut();
            (*p).cleanup = ptr::null_mut();

            debug!(pool = ?p, size, max = (*p).max, "create pool");

            Ok(Pool { inner: NonNull::new_unchecked(p) })
        }
    }

    #[inline]
    pub(crate) fn as_inner(&self) -> *mut PoolInner {
        self.inner.as_ptr()
    }

    /// Largest request serviced from small-block storage.
    pub fn max(&self) -> usize {
        unsafe { (*self.as_inner()).max }
    }

    /// Number of blocks currently in the chain.
    pub fn block_count(&self) -> usize {
        let mut n = 0;
        let mut p = self.as_inner();
        while !p.is_null() {
            n += 1;
            p = unsafe { (*p).d.next };
        }
        n
    }

    /// Allocates `size` bytes, word-aligned. Small requests bump within the
    /// block chain; large ones are tracked system allocations.
    #[inline]
    pub fn alloc(&self, size: usize) -> AllocResult<NonNull<u8>> {
        unsafe { alloc_raw(self.as_inner(), size) }
    }

    /// Allocates `size` bytes with no alignment adjustment. Used for byte
    /// strings, where every byte of a block can be put to work.
    #[inline]
    pub fn alloc_unaligned(&self, size: usize) -> AllocResult<NonNull<u8>> {
        unsafe {
            let pool = self.as_inner();
            if size <= (*pool).max {
                alloc_small(pool, size, false)
            } else {
                alloc_large(pool, size)
            }
        }
    }

    /// Allocates `size` zero-filled bytes.
    pub fn alloc_zeroed(&self, size: usize) -> AllocResult<NonNull<u8>> {
        let p = self.alloc(size)?;
        unsafe { ptr::write_bytes(p.as_ptr(), 0, size) };
        Ok(p)
    }

    /// Allocates `size` bytes with the given alignment through the system
    /// allocator, tracked like any other large allocation.
    pub fn alloc_aligned(&self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        if !align.is_power_of_two() {
            return Err(AllocError::InvalidAlignment { align });
        }
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| AllocError::InvalidLayout { reason: "size overflows layout" })?;

        let m = unsafe { alloc::alloc(layout) };
        let Some(p) = NonNull::new(m) else {
            return Err(AllocError::OutOfMemory { requested: size });
        };
        trace!(ptr = ?p, size, align, "pool aligned alloc");

        unsafe {
            match track_large(self.as_inner(), p, layout) {
                Ok(()) => Ok(p),
                Err(err) => {
                    alloc::dealloc(p.as_ptr(), layout);
                    Err(err)
                }
            }
        }
    }

    /// Moves `value` into pool memory. The destructor of `T` never runs;
    /// the storage is reclaimed wholesale with the pool.
    pub fn alloc_value<T>(&self, value: T) -> AllocResult<NonNull<T>> {
        debug_assert!(mem::align_of::<T>() <= ALIGNMENT);
        let p = self.alloc(mem::size_of::<T>())?.cast::<T>();
        unsafe { p.as_ptr().write(value) };
        Ok(p)
    }

    /// Releases a tracked large allocation. Small allocations are not
    /// tracked and come back [`Reclaim::Declined`].
    pub fn free(&self, ptr: NonNull<u8>) -> Reclaim {
        unsafe {
            let mut l = (*self.as_inner()).large;
            while !l.is_null() {
                if ptr.as_ptr() == (*l).alloc {
                    debug!(ptr = ?ptr, "free large allocation");
                    alloc::dealloc((*l).alloc, (*l).layout);
                    (*l).alloc = ptr::null_mut();
                    return Reclaim::Freed;
                }
                l = (*l).next;
            }
        }
        Reclaim::Declined
    }

    /// Tears the pool down now: cleanups, large allocations, blocks, in
    /// that order. Equivalent to dropping the handle; reads better at call
    /// sites that destroy a pool mid-function.
    pub fn destroy(self) {
        drop(self);
    }

    /// Rewinds every block and releases every large allocation, keeping the
    /// blocks themselves for reuse. Cleanup records are deliberately left
    /// untouched: reset serves long-lived pools whose cleanup targets must
    /// survive, and only dropping the pool runs them.
    pub fn reset(&mut self) {
        unsafe {
            let pool = self.as_inner();

            let mut l = (*pool).large;
            while !l.is_null() {
                if !(*l).alloc.is_null() {
                    alloc::dealloc((*l).alloc, (*l).layout);
                    (*l).alloc = ptr::null_mut();
                }
                l = (*l).next;
            }

            (*pool).d.last = (pool as *mut u8).add(mem::size_of::<PoolInner>());
            (*pool).d.failed = 0;

            let mut p = (*pool).d.next;
            while !p.is_null() {
                (*p).d.last = (p as *mut u8).add(mem::size_of::<PoolData>());
                (*p).d.failed = 0;
                p = (*p).d.next;
            }

            (*pool).current = pool;
            (*pool).chain = ptr::null_mut();
            (*pool).large = ptr::null_mut();
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        unsafe {
            let pool = self.as_inner();

            // Cleanups run first: they may reference pool memory.
            let mut c = (*pool).cleanup;
            while !c.is_null() {
                if let Some(handler) = (*c).handler {
                    debug!(record = ?c, "run cleanup");
                    handler((*c).data);
                }
                c = (*c).next;
            }

            let mut l = (*pool).large;
            while !l.is_null() {
                if !(*l).alloc.is_null() {
                    trace!(ptr = ?(*l).alloc, "free large allocation");
                    alloc::dealloc((*l).alloc, (*l).layout);
                }
                l = (*l).next;
            }

            let mut p = pool;
            while !p.is_null() {
                let next = (*p).d.next;
                let size = (*p).d.end as usize - p as usize;
                alloc::dealloc(
                    p.cast(),
                    Layout::from_size_align_unchecked(size, POOL_ALIGNMENT),
                );
                p = next;
            }
        }
    }
}

/// Word-aligned small-or-large dispatch; the body of [`Pool::alloc`], shared
/// with the containers that hold a raw pool pointer.
///
/// # Safety
/// `pool` must point to the live head block of a pool chain.
#[inline]
pub(crate) unsafe fn alloc_raw(pool: *mut PoolInner, size: usize) -> AllocResult<NonNull<u8>> {
    unsafe {
        if size <= (*pool).max {
            alloc_small(pool, size, true)
        } else {
            alloc_large(pool, size)
        }
    }
}

/// Bump allocation within the block chain, starting the search at `current`.
///
/// # Safety
/// `pool` must point to the live head block, and `size` must not exceed
/// `(*pool).max`.
pub(crate) unsafe fn alloc_small(
    pool: *mut PoolInner,
    size: usize,
    align: bool,
) -> AllocResult<NonNull<u8>> {
    unsafe {
        let mut p = (*pool).current;

        loop {
            let mut m = (*p).d.last;

            if align {
                m = align_ptr(m, ALIGNMENT);
            }

            if m as usize <= (*p).d.end as usize && (*p).d.end as usize - m as usize >= size {
                (*p).d.last = m.add(size);
                return Ok(NonNull::new_unchecked(m));
            }

            p = (*p).d.next;
            if p.is_null() {
                break;
            }
        }

        alloc_block(pool, size)
    }
}

/// Appends a fresh block of the pool's block size and serves `size` from it.
/// Every block walked on the way to the tail ages by one failure; a block
/// that has failed more than four times is dropped from the search window by
/// advancing `current` past it.
unsafe fn alloc_block(pool: *mut PoolInner, size: usize) -> AllocResult<NonNull<u8>> {
    unsafe {
        let psize = (*pool).d.end as usize - pool as usize;

        let layout = Layout::from_size_align_unchecked(psize, POOL_ALIGNMENT);
        let m = alloc::alloc(layout);
        if m.is_null() {
            return Err(AllocError::OutOfMemory { requested: psize });
        }

        let new = m as *mut PoolInner;
        (*new).d.end = m.add(psize);
        (*new).d.next = ptr::null_mut();
        (*new).d.failed = 0;

        // Everything past the small header of a sub-block is payload.
        let data = align_ptr(m.add(mem::size_of::<PoolData>()), ALIGNMENT);
        (*new).d.last = data.add(size);

        debug!(pool = ?pool, block = ?new, psize, "append pool block");

        let mut p = (*pool).current;
        while !(*p).d.next.is_null() {
            let failed = (*p).d.failed;
            (*p).d.failed = failed + 1;
            if failed > 4 {
                (*pool).current = (*p).d.next;
            }
            p = (*p).d.next;
        }

        (*p).d.next = new;

        Ok(NonNull::new_unchecked(data))
    }
}

/// System allocation tracked in the pool's large list. The first few records
/// are scanned for a free slot before a fresh record is carved out of
/// small-block memory; on record-allocation failure the payload is released
/// before reporting the error.
unsafe fn alloc_large(pool: *mut PoolInner, size: usize) -> AllocResult<NonNull<u8>> {
    unsafe {
        let layout = Layout::from_size_align(size, ALIGNMENT)
            .map_err(|_| AllocError::InvalidLayout { reason: "size overflows layout" })?;

        let m = alloc::alloc(layout);
        let Some(p) = NonNull::new(m) else {
            return Err(AllocError::OutOfMemory { requested: size });
        };
        trace!(ptr = ?p, size, "pool large alloc");

        let mut n = 0u32;
        let mut large = (*pool).large;
        while !large.is_null() {
            if (*large).alloc.is_null() {
                (*large).alloc = p.as_ptr();
                (*large).layout = layout;
                return Ok(p);
            }

            if n > 3 {
                break;
            }
            n += 1;

            large = (*large).next;
        }

        match track_large(pool, p, layout) {
            Ok(()) => Ok(p),
            Err(err) => {
                alloc::dealloc(p.as_ptr(), layout);
                Err(err)
            }
        }
    }
}

/// Prepends a fresh large record for `p`. The record itself lives in
/// small-block memory.
unsafe fn track_large(pool: *mut PoolInner, p: NonNull<u8>, layout: Layout) -> AllocResult<()> {
    unsafe {
        let large = alloc_small(pool, mem::size_of::<LargeBlock>(), true)?
            .cast::<LargeBlock>()
            .as_ptr();
        (*large).alloc = p.as_ptr();
        (*large).layout = layout;
        (*large).next = (*pool).large;
        (*pool).large = large;
        Ok(())
    }
}
