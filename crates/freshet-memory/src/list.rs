//! Pool-backed chunked list.
//!
//! An append-only sequence of fixed-capacity parts. Pushing never moves an
//! element, so references handed out by [`List::push`] stay valid for the
//! life of the pool; there is no removal. Used where the total count is
//! unknown but iteration order matters, e.g. header tables.
//!
//! Elements are never dropped; store plain data.

use core::marker::PhantomData;
use core::mem;
use core::ptr::{self, NonNull};

use crate::error::AllocResult;
use crate::pool::{Pool, PoolInner, alloc_raw};
use crate::util::ALIGNMENT;

/// One fixed-capacity segment of a list.
#[repr(C)]
pub struct ListPart<T> {
    elts: *mut T,
    nelts: usize,
    next: *mut ListPart<T>,
}

/// Chunked append-only sequence carved from a pool.
pub struct List<T> {
    /// Tail part, or null while the inline first part is still current.
    /// Keeping this nullable instead of self-referential leaves the header
    /// movable; overflow parts live in pool memory and never move.
    last: *mut ListPart<T>,
    part: ListPart<T>,
    nalloc: usize,
    pool: *mut PoolInner,
    _marker: PhantomData<T>,
}

impl<T> List<T> {
    /// Creates a list whose parts hold `n` elements each, header held by
    /// the caller.
    pub fn new_in(pool: &Pool, n: usize) -> AllocResult<List<T>> {
        debug_assert!(n > 0);
        debug_assert!(mem::size_of::<T>() > 0);
        debug_assert!(mem::align_of::<T>() <= ALIGNMENT);

        let elts = unsafe { alloc_raw(pool.as_inner(), n * mem::size_of::<T>())? };

        Ok(List {
            last: ptr::null_mut(),
            part: ListPart {
                elts: elts.cast::<T>().as_ptr(),
                nelts: 0,
                next: ptr::null_mut(),
            },
            nalloc: n,
            pool: pool.as_inner(),
            _marker: PhantomData,
        })
    }

    /// Creates a list whose header also lives in pool memory.
    pub fn create_in(pool: &Pool, n: usize) -> AllocResult<NonNull<List<T>>> {
        let l = unsafe { alloc_raw(pool.as_inner(), mem::size_of::<List<T>>())? }
            .cast::<List<T>>();
        let init = List::new_in(pool, n)?;
        unsafe { l.as_ptr().write(init) };
        Ok(l)
    }

    /// Appends one element, allocating a new tail part when the current one
    /// is full.
    pub fn push(&mut self, value: T) -> AllocResult<&mut T> {
        unsafe {
            let mut last: *mut ListPart<T> =
                if self.last.is_null() { &mut self.part } else { self.last };

            if (*last).nelts == self.nalloc {
                let part = alloc_raw(self.pool, mem::size_of::<ListPart<T>>())?
                    .cast::<ListPart<T>>()
                    .as_ptr();
                let elts = alloc_raw(self.pool, self.nalloc * mem::size_of::<T>())?;

                (*part).elts = elts.cast::<T>().as_ptr();
                (*part).nelts = 0;
                (*part).next = ptr::null_mut();

                (*last).next = part;
                self.last = part;
                last = part;
            }

            let slot = (*last).elts.add((*last).nelts);
            slot.write(value);
            (*last).nelts += 1;
            Ok(&mut *slot)
        }
    }

    /// Total element count across parts.
    pub fn len(&self) -> usize {
        let mut n = self.part.nelts;
        let mut part = self.part.next;
        while !part.is_null() {
            unsafe {
                n += (*part).nelts;
                part = (*part).next;
            }
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.part.nelts == 0
    }

    /// Elements a part can hold.
    pub fn part_capacity(&self) -> usize {
        self.nalloc
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter { part: Some(&self.part), idx: 0 }
    }
}

impl<'a, T> IntoIterator for &'a List<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

/// Part-by-part, then element-by-element iteration.
pub struct Iter<'a, T> {
    part: Option<&'a ListPart<T>>,
    idx: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        loop {
            let part = self.part?;
            if self.idx < part.nelts {
                let item = unsafe { &*part.elts.add(self.idx) };
                self.idx += 1;
                return Some(item);
            }
            self.part = unsafe { part.next.as_ref() };
            self.idx = 0;
        }
    }
}
