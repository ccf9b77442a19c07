//! # Freshet Memory
//!
//! Region-based memory for the Freshet server. Request-scoped allocations
//! come out of a [`Pool`]: a chained arena that bump-allocates small
//! requests, tracks large ones for bulk release, and runs registered
//! cleanups at teardown. Everything else here is layered on top of it:
//! [`Buf`] descriptors and their chains with per-pool link recycling,
//! a growable [`Array`], a chunked [`List`], and the intrusive [`Queue`].
//!
//! A pool and all structures carved from it belong to a single logical task;
//! nothing in this crate locks and the pool handle is neither `Send` nor
//! `Sync`.

// Raw-pointer substrate; opts out of the workspace `unsafe_code` lint.
#![allow(unsafe_code)]

pub mod array;
pub mod buf;
pub mod error;
pub mod list;
pub mod pool;
pub mod queue;
pub mod util;

pub use array::Array;
pub use buf::chain::{
    Chain, chain_add_copy, chain_coalesce_file, chain_get_free_buf, chain_update_sent,
    create_chain_of_bufs, update_chains,
};
pub use buf::{Buf, BufFlags, BufTag, Bufs};
pub use error::{AllocError, AllocResult, Reclaim};
pub use list::List;
#[cfg(unix)]
pub use pool::cleanup::{FileCleanup, cleanup_file, delete_file};
pub use pool::cleanup::{CleanupHandler, CleanupRecord};
pub use pool::Pool;
pub use queue::{Queue, QueueCmp};
