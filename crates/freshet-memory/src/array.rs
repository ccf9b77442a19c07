//! Pool-backed growable array.
//!
//! Element storage comes from the owning pool. Growth has a fast path that
//! depends on allocation order: when the element region ends exactly at the
//! head block's bump cursor, it is extended in place and existing elements
//! never move. Otherwise the array relocates with doubled capacity and the
//! old region is left to the pool (reclaimed wholesale at reset/drop).
//!
//! Elements are never dropped; store plain data.

use core::marker::PhantomData;
use core::mem;
use core::ptr::{self, NonNull};

use crate::error::AllocResult;
use crate::pool::{Pool, PoolInner, alloc_raw};
use crate::util::ALIGNMENT;

/// Growable homogeneous sequence carved from a pool.
pub struct Array<T> {
    elts: *mut T,
    nelts: usize,
    nalloc: usize,
    pool: *mut PoolInner,
    _marker: PhantomData<T>,
}

impl<T> Array<T> {
    /// Creates an array with capacity `n`, header held by the caller.
    pub fn new_in(pool: &Pool, n: usize) -> AllocResult<Array<T>> {
        debug_assert!(n > 0);
        debug_assert!(mem::size_of::<T>() > 0);
        // Small allocations are word-aligned; wider types would end up
        // misaligned.
        debug_assert!(mem::align_of::<T>() <= ALIGNMENT);

        let elts = unsafe { alloc_raw(pool.as_inner(), n * mem::size_of::<T>())? };

        Ok(Array {
            elts: elts.cast::<T>().as_ptr(),
            nelts: 0,
            nalloc: n,
            pool: pool.as_inner(),
            _marker: PhantomData,
        })
    }

    /// Creates an array whose header also lives in pool memory. Header
    /// first, element region second, so a fresh array sits flush against
    /// the bump cursor and [`Array::destroy`] can return both.
    pub fn create_in(pool: &Pool, n: usize) -> AllocResult<NonNull<Array<T>>> {
        let a = unsafe { alloc_raw(pool.as_inner(), mem::size_of::<Array<T>>())? }
            .cast::<Array<T>>();
        let init = Array::new_in(pool, n)?;
        unsafe { a.as_ptr().write(init) };
        Ok(a)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nelts
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nelts == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.nalloc
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { core::slice::from_raw_parts(self.elts, self.nelts) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { core::slice::from_raw_parts_mut(self.elts, self.nelts) }
    }

    pub fn iter(&self) -> core::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Appends one element.
    pub fn push(&mut self, value: T) -> AllocResult<&mut T> {
        unsafe {
            if self.nelts == self.nalloc {
                self.grow_one()?;
            }

            let slot = self.elts.add(self.nelts);
            slot.write(value);
            self.nelts += 1;
            Ok(&mut *slot)
        }
    }

    /// Reserves `n` consecutive slots and returns the first. The slots are
    /// uninitialized; the caller writes them before reading.
    pub fn push_n(&mut self, n: usize) -> AllocResult<NonNull<T>> {
        unsafe {
            if self.nelts + n > self.nalloc {
                self.grow_many(n)?;
            }

            let slot = self.elts.add(self.nelts);
            self.nelts += n;
            Ok(NonNull::new_unchecked(slot))
        }
    }

    /// Appends a batch by copy.
    pub fn extend_from_slice(&mut self, values: &[T]) -> AllocResult<()>
    where
        T: Copy,
    {
        if values.is_empty() {
            return Ok(());
        }
        let slot = self.push_n(values.len())?;
        unsafe {
            ptr::copy_nonoverlapping(values.as_ptr(), slot.as_ptr(), values.len());
        }
        Ok(())
    }

    /// The array is full; extend in place when it is the most recent
    /// allocation in the head block, relocate with doubled capacity
    /// otherwise.
    unsafe fn grow_one(&mut self) -> AllocResult<()> {
        unsafe {
            let size = mem::size_of::<T>() * self.nalloc;
            let p = self.pool;

            if self.elts.add(self.nalloc).cast::<u8>() == (*p).d.last
                && (*p).d.last as usize + mem::size_of::<T>() <= (*p).d.end as usize
            {
                (*p).d.last = (*p).d.last.add(mem::size_of::<T>());
                self.nalloc += 1;
            } else {
                let new = alloc_raw(p, 2 * size)?.cast::<T>().as_ptr();
                ptr::copy_nonoverlapping(self.elts, new, self.nelts);
                self.elts = new;
                self.nalloc *= 2;
            }
            Ok(())
        }
    }

    unsafe fn grow_many(&mut self, n: usize) -> AllocResult<()> {
        unsafe {
            let size = mem::size_of::<T>() * n;
            let p = self.pool;

            if self.elts.add(self.nalloc).cast::<u8>() == (*p).d.last
                && (*p).d.last as usize + size <= (*p).d.end as usize
            {
                (*p).d.last = (*p).d.last.add(size);
                self.nalloc += n;
            } else {
                let nalloc = 2 * n.max(self.nalloc);
                let new = alloc_raw(p, nalloc * mem::size_of::<T>())?.cast::<T>().as_ptr();
                ptr::copy_nonoverlapping(self.elts, new, self.nelts);
                self.elts = new;
                self.nalloc = nalloc;
            }
            Ok(())
        }
    }

    /// Best-effort return of the array's memory to the pool: the element
    /// region, then the header, are given back only when they sit flush
    /// against the head block's bump cursor.
    pub fn destroy(&mut self) {
        unsafe {
            let p = self.pool;

            if self.elts.add(self.nalloc).cast::<u8>() == (*p).d.last {
                (*p).d.last = self.elts.cast::<u8>();
            }

            let header = (self as *mut Array<T>).cast::<u8>();
            if header.add(mem::size_of::<Array<T>>()) == (*p).d.last {
                (*p).d.last = header;
            }
        }
    }
}
