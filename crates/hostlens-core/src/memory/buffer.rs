//! A byte buffer mapped at a fixed base address.

use std::sync::{PoisonError, RwLock};

use super::MemoryAccess;
use crate::error::{LensError, Result};
use crate::types::Address;

/// Synthetic address space backed by a `Vec<u8>`
///
/// Addresses in `[base, base + len)` map onto the buffer; everything else is
/// an [`LensError::InvalidMemoryAccess`]. Writes are visible to later reads,
/// so tests can simulate the host runtime mutating or relocating objects.
#[derive(Debug)]
pub struct BufferMemory
{
    base: Address,
    bytes: RwLock<Vec<u8>>,
}

impl BufferMemory
{
    /// Map `bytes` at `base`
    pub fn new(base: Address, bytes: Vec<u8>) -> Self
    {
        Self {
            base,
            bytes: RwLock::new(bytes),
        }
    }

    /// Map `len` zero bytes at `base`
    pub fn zeroed(base: Address, len: usize) -> Self
    {
        Self::new(base, vec![0; len])
    }

    /// First mapped address
    pub fn base(&self) -> Address
    {
        self.base
    }

    /// Number of mapped bytes
    pub fn len(&self) -> usize
    {
        self.bytes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the mapping is empty
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Copy of the whole mapping
    pub fn snapshot(&self) -> Vec<u8>
    {
        self.bytes.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn range(&self, address: Address, len: usize, mapped: usize) -> Result<std::ops::Range<usize>>
    {
        let invalid = || LensError::InvalidMemoryAccess { address, len };
        let start = usize::try_from(address.offset_from(self.base).ok_or_else(invalid)?).map_err(|_| invalid())?;
        let end = start.checked_add(len).ok_or_else(invalid)?;
        if end > mapped {
            return Err(invalid());
        }
        Ok(start..end)
    }
}

impl MemoryAccess for BufferMemory
{
    fn read_into(&self, address: Address, buf: &mut [u8]) -> Result<()>
    {
        let bytes = self.bytes.read().unwrap_or_else(PoisonError::into_inner);
        let range = self.range(address, buf.len(), bytes.len())?;
        buf.copy_from_slice(&bytes[range]);
        Ok(())
    }

    fn write(&self, address: Address, data: &[u8]) -> Result<()>
    {
        let mut bytes = self.bytes.write().unwrap_or_else(PoisonError::into_inner);
        let range = self.range(address, data.len(), bytes.len())?;
        bytes[range].copy_from_slice(data);
        Ok(())
    }
}
