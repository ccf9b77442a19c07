//! Teardown callbacks registered on a pool.
//!
//! Records are prepended at registration and run in list order when the pool
//! is dropped, i.e. in reverse registration order. [`Pool::reset`] leaves
//! them alone: a long-lived pool can be reset between requests without
//! disturbing cleanup targets that span requests.

use core::mem;
use core::ptr::{self, NonNull};

use tracing::debug;

use crate::error::AllocResult;
use crate::pool::{Pool, alloc_raw};

/// A teardown callback. Receives the record's data pointer; runs at most
/// once, when the pool is dropped or the record is explicitly triggered.
pub type CleanupHandler = unsafe fn(*mut u8);

/// One registered cleanup. Lives in small-block pool memory.
#[repr(C)]
pub struct CleanupRecord {
    /// Callback to run at teardown; `None` disarms the record.
    pub handler: Option<CleanupHandler>,
    /// Opaque payload handed to the handler. Pool-allocated when the record
    /// was registered with a non-zero data size, otherwise whatever the
    /// caller put here.
    pub data: *mut u8,
    pub(crate) next: *mut CleanupRecord,
}

impl Pool {
    /// Registers a cleanup record, with `data_size` bytes of pool-allocated
    /// payload when non-zero. The record comes back disarmed; the caller
    /// fills in `handler` (and `data`, if no payload was requested).
    pub fn add_cleanup(&self, data_size: usize) -> AllocResult<NonNull<CleanupRecord>> {
        unsafe {
            let pool = self.as_inner();

            let c = alloc_raw(pool, mem::size_of::<CleanupRecord>())?.cast::<CleanupRecord>();

            let data = if data_size > 0 {
                alloc_raw(pool, data_size)?.as_ptr()
            } else {
                ptr::null_mut()
            };

            let cp = c.as_ptr();
            (*cp).handler = None;
            (*cp).data = data;
            (*cp).next = (*pool).cleanup;
            (*pool).cleanup = cp;

            debug!(record = ?cp, data_size, "add cleanup");

            Ok(c)
        }
    }
}

#[cfg(unix)]
pub use self::file::{FileCleanup, cleanup_file, delete_file};

#[cfg(unix)]
mod file {
    use core::mem;
    use core::slice;
    use std::ffi::OsStr;
    use std::io;
    use std::os::fd::RawFd;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    use tracing::{debug, error};

    use super::CleanupHandler;
    use crate::error::AllocResult;
    use crate::pool::Pool;

    /// Payload of the prebuilt file handlers: a descriptor and the file name
    /// as pool-allocated bytes.
    #[repr(C)]
    pub struct FileCleanup {
        pub fd: RawFd,
        pub name: *const u8,
        pub name_len: usize,
    }

    impl FileCleanup {
        /// # Safety
        /// `name` must point to `name_len` live bytes.
        unsafe fn path(&self) -> &Path {
            let bytes = unsafe { slice::from_raw_parts(self.name, self.name_len) };
            Path::new(OsStr::from_bytes(bytes))
        }
    }

    /// Closes the payload's descriptor. Close failures cannot fail the
    /// teardown; they are logged at alert severity and swallowed.
    ///
    /// # Safety
    /// `data` must point to a live [`FileCleanup`] whose descriptor is open.
    pub unsafe fn cleanup_file(data: *mut u8) {
        unsafe {
            let c = &*(data as *const FileCleanup);
            debug!(fd = c.fd, "file cleanup");

            if libc::close(c.fd) == -1 {
                error!(fd = c.fd, err = %io::Error::last_os_error(), "close failed");
            }
        }
    }

    /// Deletes the payload's file by name, then closes the descriptor. A
    /// missing file is not an error; any other unlink failure is logged at
    /// critical severity.
    ///
    /// # Safety
    /// `data` must point to a live [`FileCleanup`] whose descriptor is open
    /// and whose name bytes are live.
    pub unsafe fn delete_file(data: *mut u8) {
        unsafe {
            let c = &*(data as *const FileCleanup);
            let name = c.path();
            debug!(fd = c.fd, name = %name.display(), "file cleanup");

            if let Err(err) = std::fs::remove_file(name) {
                if err.kind() != io::ErrorKind::NotFound {
                    error!(name = %name.display(), %err, "delete failed");
                }
            }

            if libc::close(c.fd) == -1 {
                error!(fd = c.fd, err = %io::Error::last_os_error(), "close failed");
            }
        }
    }

    impl Pool {
        /// Registers [`cleanup_file`] for `fd`: the descriptor is closed
        /// when the pool is dropped (or when [`Pool::run_cleanup_file`]
        /// triggers it early). The name is copied into pool memory for the
        /// log line.
        pub fn add_file_cleanup(&self, fd: RawFd, name: &Path) -> AllocResult<()> {
            self.add_file_handler(fd, name, cleanup_file)
        }

        /// Registers [`delete_file`] for `fd`: the file is unlinked and the
        /// descriptor closed when the pool is dropped. For temporary files
        /// that must not outlive the request.
        pub fn add_temp_file_cleanup(&self, fd: RawFd, name: &Path) -> AllocResult<()> {
            self.add_file_handler(fd, name, delete_file)
        }

        fn add_file_handler(
            &self,
            fd: RawFd,
            name: &Path,
            handler: CleanupHandler,
        ) -> AllocResult<()> {
            let bytes = name.as_os_str().as_bytes();
            let copy = self.alloc_unaligned(bytes.len())?;
            unsafe {
                copy.as_ptr().copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());

                let c = self.add_cleanup(mem::size_of::<FileCleanup>())?;
                let cf = (*c.as_ptr()).data as *mut FileCleanup;
                (*cf).fd = fd;
                (*cf).name = copy.as_ptr();
                (*cf).name_len = bytes.len();
                (*c.as_ptr()).handler = Some(handler);
            }
            Ok(())
        }

        /// Runs and disarms the first registered [`cleanup_file`] whose
        /// payload matches `fd`. Lets a caller hand a descriptor off (e.g.
        /// into a cache) without the pool closing it underneath them.
        #[allow(unpredictable_function_pointer_comparisons)]
        pub fn run_cleanup_file(&self, fd: RawFd) {
            unsafe {
                let mut c = (*self.as_inner()).cleanup;
                while !c.is_null() {
                    if (*c).handler == Some(cleanup_file as CleanupHandler) {
                        let cf = (*c).data as *const FileCleanup;
                        if (*cf).fd == fd {
                            cleanup_file((*c).data);
                            (*c).handler = None;
                            return;
                        }
                    }
                    c = (*c).next;
                }
            }
        }
    }
}
