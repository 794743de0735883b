//! In-process memory access.
//!
//! The engine normally runs inside the host whose structures it inspects, so
//! "reading process memory" is a plain copy out of our own address space.
//! There is no kernel in between to reject a bad address: dereferencing an
//! unmapped page faults the whole process. That is why constructing a
//! [`LocalMemory`] is `unsafe`: the caller vouches that every address reaching
//! it came from the host runtime's own pointers or from a resolved import.

use std::ptr;

use tracing::debug;

use super::MemoryAccess;
use crate::error::{LensError, Result};
use crate::types::Address;

/// Accessor for the calling process's own memory
#[derive(Debug, Clone, Copy)]
pub struct LocalMemory
{
    _private: (),
}

impl LocalMemory
{
    /// Create an accessor for the current process
    ///
    /// ## Safety
    ///
    /// Reads and writes go straight through raw pointers. The caller must only
    /// pass addresses that are mapped (and writable, for writes) for the full
    /// length of the access. The null page is rejected, nothing else is.
    pub unsafe fn new() -> Self
    {
        Self { _private: () }
    }

    fn check(address: Address, len: usize) -> Result<()>
    {
        if address.is_null() || address.checked_add(len as u64).is_none() {
            return Err(LensError::InvalidMemoryAccess { address, len });
        }
        Ok(())
    }

    /// Write into a page that is currently not writable (code, read-only data)
    ///
    /// The covering pages are switched to read-write-execute for the duration
    /// of the copy and then set to `restore` (a `PROT_*` combination).
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::Io`] if `mprotect` fails.
    #[cfg(unix)]
    pub fn protect_and_write(&self, address: Address, data: &[u8], restore: libc::c_int) -> Result<()>
    {
        Self::check(address, data.len())?;
        if data.is_empty() {
            return Ok(());
        }

        // SAFETY: sysconf has no preconditions.
        let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            size if size > 0 => size as u64,
            _ => 4096,
        };
        let start = address.value() & !(page_size - 1);
        let end = (address.value() + data.len() as u64 + page_size - 1) & !(page_size - 1);
        #[allow(clippy::cast_possible_truncation)]
        let span = (end - start) as usize;

        debug!(%address, len = data.len(), "patching protected memory");

        // SAFETY: the range is page-aligned and covers the caller-vouched target.
        let rc = unsafe {
            libc::mprotect(
                start as usize as *mut libc::c_void,
                span,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        self.write(address, data)?;

        // SAFETY: same range as above.
        let rc = unsafe { libc::mprotect(start as usize as *mut libc::c_void, span, restore) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl MemoryAccess for LocalMemory
{
    fn read_into(&self, address: Address, buf: &mut [u8]) -> Result<()>
    {
        Self::check(address, buf.len())?;
        // SAFETY: validity of the source range is the contract of `LocalMemory::new`.
        unsafe {
            ptr::copy_nonoverlapping(address.as_usize() as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn write(&self, address: Address, data: &[u8]) -> Result<()>
    {
        Self::check(address, data.len())?;
        // SAFETY: validity and writability are the contract of `LocalMemory::new`.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), address.as_usize() as *mut u8, data.len());
        }
        Ok(())
    }
}
