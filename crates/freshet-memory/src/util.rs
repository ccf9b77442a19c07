//! Alignment helpers and platform constants.

use once_cell::sync::Lazy;

/// Machine word alignment; small pool allocations are rounded up to this.
pub const ALIGNMENT: usize = core::mem::align_of::<usize>();

/// Alignment of pool blocks themselves.
pub const POOL_ALIGNMENT: usize = 16;

/// Aligns a value up to the nearest multiple of `alignment`.
#[inline(always)]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Aligns a value down to the nearest multiple of `alignment`.
#[inline(always)]
pub const fn align_down(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

/// Checks whether a value is a multiple of `alignment`.
#[inline(always)]
pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    debug_assert!(alignment.is_power_of_two());
    value & (alignment - 1) == 0
}

/// Rounds a pointer up to the nearest multiple of `alignment`.
#[inline(always)]
pub fn align_ptr(ptr: *mut u8, alignment: usize) -> *mut u8 {
    align_up(ptr as usize, alignment) as *mut u8
}

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            // SAFETY: sysconf is async-signal-safe and takes no pointers.
            let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if n > 0 { n as usize } else { 4096 }
        } else {
            4096
        }
    }
});

/// System page size, probed once at first use.
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE
}
