//! Byte-range buffer descriptors.
//!
//! A [`Buf`] describes a window of bytes that may live in pool memory, in
//! read-only storage, in a mapping, or in a file; the flag bits say which.
//! Descriptors are cheap and shared: chains copied with
//! [`chain::chain_add_copy`] alias the same `Buf`, and only the producer
//! identified by [`Buf::tag`] may recycle one.

use core::ptr::NonNull;
use std::os::fd::RawFd;

use bitflags::bitflags;

use crate::error::AllocResult;
use crate::pool::{Pool, alloc_raw};

pub mod chain;

bitflags! {
    /// Content and position flags of a buffer.
    ///
    /// At least one of `TEMPORARY | MEMORY | MMAP | IN_FILE` is set on a
    /// buffer that carries content; a buffer with none of them is "special"
    /// and carries only a control signal such as `FLUSH`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BufFlags: u32 {
        /// Writable heap/pool memory.
        const TEMPORARY = 1 << 0;
        /// Read-only memory.
        const MEMORY = 1 << 1;
        /// Memory-mapped content.
        const MMAP = 1 << 2;
        /// Content resides in a file.
        const IN_FILE = 1 << 3;
        const FLUSH = 1 << 4;
        const SYNC = 1 << 5;
        const LAST_BUF = 1 << 6;
        const LAST_IN_CHAIN = 1 << 7;
        const RECYCLED = 1 << 8;

        const IN_MEMORY = Self::TEMPORARY.bits() | Self::MEMORY.bits() | Self::MMAP.bits();
    }
}

/// Producer identity token; see [`chain::update_chains`]. Zero means
/// "no producer".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufTag(pub usize);

/// A byte-range descriptor. All-zero bytes are a valid (special, empty)
/// buffer, which is what the zeroed allocation in [`Pool::calloc_buf`]
/// produces.
#[repr(C)]
#[derive(Debug)]
pub struct Buf {
    /// First unprocessed byte.
    pub pos: *mut u8,
    /// One past the last byte of content.
    pub last: *mut u8,
    /// File range, meaningful when `IN_FILE` is set.
    pub file_pos: u64,
    pub file_last: u64,
    /// Bounds of the underlying memory region.
    pub start: *mut u8,
    pub end: *mut u8,
    pub tag: BufTag,
    pub file: RawFd,
    /// Original buffer this one was copied from, if any.
    pub shadow: *mut Buf,
    pub flags: BufFlags,
}

impl Buf {
    /// Content lives in addressable memory (as opposed to only in a file).
    #[inline]
    pub fn in_memory(&self) -> bool {
        self.flags.intersects(BufFlags::IN_MEMORY)
    }

    #[inline]
    pub fn in_file(&self) -> bool {
        self.flags.contains(BufFlags::IN_FILE)
    }

    /// Carries no content at all, only control flags.
    #[inline]
    pub fn is_special(&self) -> bool {
        !self.in_memory() && !self.in_file()
    }

    /// Bytes still to process: the memory window when the content is
    /// addressable, the file window otherwise.
    #[inline]
    pub fn size(&self) -> u64 {
        if self.in_memory() {
            self.last as u64 - self.pos as u64
        } else {
            self.file_last - self.file_pos
        }
    }
}

/// Shape of a buffer batch: `num` buffers of `size` bytes each.
#[derive(Debug, Clone, Copy)]
pub struct Bufs {
    pub num: usize,
    pub size: usize,
}

impl Pool {
    /// Allocates a zeroed buffer descriptor: special, empty, no producer.
    pub fn calloc_buf(&self) -> AllocResult<NonNull<Buf>> {
        Ok(self.alloc_zeroed(core::mem::size_of::<Buf>())?.cast())
    }

    /// Allocates a descriptor plus `size` bytes of writable content from
    /// this pool. The window starts empty (`pos == last == start`).
    pub fn create_temp_buf(&self, size: usize) -> AllocResult<NonNull<Buf>> {
        let b = self.calloc_buf()?;

        let start = unsafe { alloc_raw(self.as_inner(), size)? };

        let bp = b.as_ptr();
        unsafe {
            (*bp).start = start.as_ptr();
            (*bp).pos = start.as_ptr();
            (*bp).last = start.as_ptr();
            (*bp).end = start.as_ptr().add(size);
            (*bp).flags = BufFlags::TEMPORARY;
        }

        Ok(b)
    }
}
