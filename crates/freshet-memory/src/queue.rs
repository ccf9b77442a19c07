//! Intrusive circular doubly-linked list.
//!
//! A [`Queue`] is a pair of links embedded inside the caller's structure; an
//! initialized node standing alone is the sentinel of an empty list. The
//! enclosing structure is recovered with [`queue_data!`], which subtracts the
//! link field's offset. Nothing here allocates: nodes live wherever the
//! caller put them, typically in pool memory.

use core::cmp::Ordering;
use core::ptr;

/// One link of an intrusive circular list, or the sentinel of a list.
#[repr(C)]
#[derive(Debug)]
pub struct Queue {
    prev: *mut Queue,
    next: *mut Queue,
}

/// Comparator for [`Queue::sort`]; receives two embedded nodes.
pub type QueueCmp = unsafe fn(*const Queue, *const Queue) -> Ordering;

impl Queue {
    /// A node that must still be initialized with [`Queue::init`].
    pub const fn new() -> Self {
        Queue { prev: ptr::null_mut(), next: ptr::null_mut() }
    }

    /// Makes `q` an empty list: both links point at the sentinel itself.
    ///
    /// # Safety
    /// `q` must point to a live `Queue`.
    #[inline]
    pub unsafe fn init(q: *mut Queue) {
        unsafe {
            (*q).prev = q;
            (*q).next = q;
        }
    }

    /// # Safety
    /// `h` must be an initialized sentinel.
    #[inline]
    pub unsafe fn is_empty(h: *const Queue) -> bool {
        unsafe { h == (*h).prev }
    }

    /// Inserts `x` right after `h`.
    ///
    /// # Safety
    /// `h` must belong to an initialized list and `x` must be unlinked.
    #[inline]
    pub unsafe fn insert_head(h: *mut Queue, x: *mut Queue) {
        unsafe {
            (*x).next = (*h).next;
            (*(*x).next).prev = x;
            (*x).prev = h;
            (*h).next = x;
        }
    }

    /// Same operation as [`Queue::insert_head`]; reads better after a node.
    ///
    /// # Safety
    /// See [`Queue::insert_head`].
    #[inline]
    pub unsafe fn insert_after(prev: *mut Queue, x: *mut Queue) {
        unsafe { Queue::insert_head(prev, x) }
    }

    /// Inserts `x` right before `h`, i.e. at the tail of `h`'s list.
    ///
    /// # Safety
    /// `h` must belong to an initialized list and `x` must be unlinked.
    #[inline]
    pub unsafe fn insert_tail(h: *mut Queue, x: *mut Queue) {
        unsafe {
            (*x).prev = (*h).prev;
            (*(*x).prev).next = x;
            (*x).next = h;
            (*h).prev = x;
        }
    }

    /// First element of the list.
    ///
    /// # Safety
    /// `h` must be an initialized sentinel.
    #[inline]
    pub unsafe fn head(h: *const Queue) -> *mut Queue {
        unsafe { (*h).next }
    }

    /// Last element of the list.
    ///
    /// # Safety
    /// `h` must be an initialized sentinel.
    #[inline]
    pub unsafe fn last(h: *const Queue) -> *mut Queue {
        unsafe { (*h).prev }
    }

    /// The sentinel itself; the stop marker for iteration.
    #[inline]
    pub fn sentinel(h: *mut Queue) -> *mut Queue {
        h
    }

    /// # Safety
    /// `q` must be linked into an initialized list.
    #[inline]
    pub unsafe fn next(q: *const Queue) -> *mut Queue {
        unsafe { (*q).next }
    }

    /// # Safety
    /// `q` must be linked into an initialized list.
    #[inline]
    pub unsafe fn prev(q: *const Queue) -> *mut Queue {
        unsafe { (*q).prev }
    }

    /// Unlinks `x` from its list.
    ///
    /// # Safety
    /// `x` must be linked and must not be the sentinel.
    #[inline]
    pub unsafe fn remove(x: *mut Queue) {
        unsafe {
            (*(*x).next).prev = (*x).prev;
            (*(*x).prev).next = (*x).next;
            if cfg!(debug_assertions) {
                (*x).prev = ptr::null_mut();
                (*x).next = ptr::null_mut();
            }
        }
    }

    /// Severs `[q, ..tail]` out of `h` into the fresh sentinel `n`, leaving
    /// `h` with `[first, ..q.prev]`.
    ///
    /// # Safety
    /// `q` must be an element of `h`'s list; `n` must be a node the caller
    /// owns, its previous contents are overwritten.
    #[inline]
    pub unsafe fn split(h: *mut Queue, q: *mut Queue, n: *mut Queue) {
        unsafe {
            (*n).prev = (*h).prev;
            (*(*n).prev).next = n;
            (*n).next = q;
            (*h).prev = (*q).prev;
            (*(*h).prev).next = h;
            (*q).prev = n;
        }
    }

    /// Concatenates `n`'s elements onto the tail of `h`. `n` is left dangling
    /// and must be re-initialized before reuse.
    ///
    /// # Safety
    /// `h` and `n` must be initialized sentinels of distinct lists, and `n`
    /// must be non-empty.
    #[inline]
    pub unsafe fn add(h: *mut Queue, n: *mut Queue) {
        unsafe {
            (*(*h).prev).next = (*n).next;
            (*(*n).next).prev = (*h).prev;
            (*h).prev = (*n).prev;
            (*(*h).prev).next = h;
        }
    }

    /// Middle element: the true middle for odd lengths, the first element of
    /// the second half for even lengths.
    ///
    /// # Safety
    /// `queue` must be an initialized, non-empty sentinel.
    pub unsafe fn middle(queue: *mut Queue) -> *mut Queue {
        unsafe {
            let mut middle = Queue::head(queue);

            if middle == Queue::last(queue) {
                return middle;
            }

            let mut next = Queue::head(queue);

            loop {
                middle = Queue::next(middle);

                next = Queue::next(next);
                if next == Queue::last(queue) {
                    return middle;
                }

                next = Queue::next(next);
                if next == Queue::last(queue) {
                    return middle;
                }
            }
        }
    }

    /// Stable insertion sort; cheap for the short lists this is used on.
    ///
    /// # Safety
    /// `queue` must be an initialized sentinel and `cmp` must be consistent
    /// for every pair of linked nodes.
    pub unsafe fn sort(queue: *mut Queue, cmp: QueueCmp) {
        unsafe {
            let mut q = Queue::head(queue);

            if q == Queue::last(queue) {
                return;
            }

            q = Queue::next(q);

            while q != Queue::sentinel(queue) {
                let mut prev = Queue::prev(q);
                let next = Queue::next(q);

                Queue::remove(q);

                loop {
                    if cmp(prev, q) != Ordering::Greater {
                        break;
                    }

                    prev = Queue::prev(prev);

                    if prev == Queue::sentinel(queue) {
                        break;
                    }
                }

                Queue::insert_after(prev, q);

                q = next;
            }
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Queue::new()
    }
}

/// Recovers the structure a [`Queue`] link is embedded in.
///
/// `$q` is a `*mut Queue`, `$ty` the enclosing type and `$field` the name of
/// the link field; expands to a `*mut $ty`.
#[macro_export]
macro_rules! queue_data {
    ($q:expr, $ty:path, $field:ident) => {
        $q.byte_sub(::core::mem::offset_of!($ty, $field)).cast::<$ty>()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Entry {
        value: i32,
        order: usize,
        link: Queue,
    }

    /// Stable-address arena of entries with an initialized sentinel.
    fn build(values: &[i32]) -> (Box<Queue>, Vec<Box<Entry>>) {
        let mut sentinel = Box::new(Queue::new());
        unsafe { Queue::init(&mut *sentinel) };

        let mut entries = Vec::with_capacity(values.len());
        for (order, &value) in values.iter().enumerate() {
            let mut e = Box::new(Entry { value, order, link: Queue::new() });
            unsafe { Queue::insert_tail(&mut *sentinel, &mut e.link) };
            entries.push(e);
        }

        (sentinel, entries)
    }

    fn collect(sentinel: &Queue) -> Vec<i32> {
        let mut out = Vec::new();
        unsafe {
            let s = sentinel as *const Queue as *mut Queue;
            let mut q = Queue::head(s);
            while q != Queue::sentinel(s) {
                let e = queue_data!(q, Entry, link);
                out.push((*e).value);
                q = Queue::next(q);
            }
        }
        out
    }

    unsafe fn by_value(a: *const Queue, b: *const Queue) -> Ordering {
        unsafe {
            let a = &*queue_data!(a.cast_mut(), Entry, link);
            let b = &*queue_data!(b.cast_mut(), Entry, link);
            a.value.cmp(&b.value)
        }
    }

    #[test]
    fn empty_and_insert() {
        let mut s = Queue::new();
        unsafe {
            Queue::init(&mut s);
            assert!(Queue::is_empty(&s));

            let mut e = Entry { value: 1, order: 0, link: Queue::new() };
            Queue::insert_head(&mut s, &mut e.link);
            assert!(!Queue::is_empty(&s));

            Queue::remove(&mut e.link);
            assert!(Queue::is_empty(&s));
        }
    }

    #[test]
    fn tail_insert_preserves_order() {
        let (s, _entries) = build(&[1, 2, 3, 4]);
        assert_eq!(collect(&s), vec![1, 2, 3, 4]);
    }

    #[test]
    fn middle_of_odd_and_even() {
        unsafe {
            let (s, _e) = build(&[10, 20, 30]);
            let m = Queue::middle(&*s as *const Queue as *mut Queue);
            assert_eq!((*queue_data!(m, Entry, link)).value, 20);

            let (s, _e) = build(&[3, 1, 4, 1, 5, 9, 2, 6]);
            let m = Queue::middle(&*s as *const Queue as *mut Queue);
            assert_eq!((*queue_data!(m, Entry, link)).value, 5);

            let (s, _e) = build(&[7]);
            let m = Queue::middle(&*s as *const Queue as *mut Queue);
            assert_eq!((*queue_data!(m, Entry, link)).value, 7);

            let (s, _e) = build(&[7, 8]);
            let m = Queue::middle(&*s as *const Queue as *mut Queue);
            assert_eq!((*queue_data!(m, Entry, link)).value, 8);
        }
    }

    #[test]
    fn sort_is_stable() {
        let (s, entries) = build(&[3, 1, 4, 1, 5, 9, 2, 6]);
        unsafe {
            Queue::sort(&*s as *const Queue as *mut Queue, by_value);
        }
        assert_eq!(collect(&s), vec![1, 1, 2, 3, 4, 5, 6, 9]);

        // The two 1s keep their original relative order.
        unsafe {
            let s_ptr = &*s as *const Queue as *mut Queue;
            let first = Queue::head(s_ptr);
            let second = Queue::next(first);
            let a = &*queue_data!(first, Entry, link);
            let b = &*queue_data!(second, Entry, link);
            assert_eq!((a.value, b.value), (1, 1));
            assert!(a.order < b.order);
        }
        drop(entries);
    }

    #[test]
    fn split_and_add_roundtrip() {
        let (s, entries) = build(&[1, 2, 3, 4, 5]);
        let mut right = Queue::new();
        unsafe {
            let s_ptr = &*s as *const Queue as *mut Queue;
            let third = &entries[2].link as *const Queue as *mut Queue;

            Queue::split(s_ptr, third, &mut right);
            assert_eq!(collect(&s), vec![1, 2]);
            assert_eq!(collect(&right), vec![3, 4, 5]);

            Queue::add(s_ptr, &mut right);
            assert_eq!(collect(&s), vec![1, 2, 3, 4, 5]);
        }
    }
}
