//! Error types for pool allocation.

use thiserror::Error;

/// Allocation failure surfaced by pools and the containers built on them.
///
/// Out-of-memory is the only failure the caller is expected to handle; the
/// other variants flag misuse that is caught before touching the system
/// allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The system allocator refused the request.
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Size/alignment combination not representable as a layout.
    #[error("invalid layout: {reason}")]
    InvalidLayout { reason: &'static str },

    /// Alignment is not a power of two.
    #[error("invalid alignment {align}: must be a power of two")]
    InvalidAlignment { align: usize },
}

/// Result type for allocation operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Outcome of returning a pointer to a pool.
///
/// Small allocations are never reclaimed individually, so a pointer the pool
/// does not track in its large list is `Declined` rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    /// The pointer matched a tracked large allocation and was released.
    Freed,
    /// The pointer is not tracked; nothing was done.
    Declined,
}
