//! # Memory Access
//!
//! Raw read/write of process memory, the primitive every overlay accessor and
//! the signature scanner are expressed in.
//!
//! Two implementations ship with the crate:
//!
//! - [`LocalMemory`]: the calling process's own address space (the usual case,
//!   since the engine runs inside the host it inspects)
//! - [`BufferMemory`]: a byte buffer pretending to be mapped at a chosen base,
//!   used for synthetic images and tests
//!
//! Anything else (a remote process, a minidump) only needs to implement
//! [`MemoryAccess`].

mod buffer;
mod local;

use bytemuck::Pod;

pub use buffer::BufferMemory;
pub use local::LocalMemory;

use crate::error::{LensError, Result};
use crate::types::Address;

/// Byte-level access to some address space
pub trait MemoryAccess: Send + Sync
{
    /// Fill `buf` with the bytes at `address`
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::InvalidMemoryAccess`] if any part of the range is
    /// unreachable. Partial reads are never reported as success.
    fn read_into(&self, address: Address, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `address`
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::InvalidMemoryAccess`] if the range cannot be written.
    fn write(&self, address: Address, data: &[u8]) -> Result<()>;
}

/// Typed helpers on top of [`MemoryAccess`]
///
/// Blanket-implemented for every accessor, including `dyn MemoryAccess`.
pub trait MemoryExt: MemoryAccess
{
    /// Read `len` bytes into a fresh vector
    fn read_bytes(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        let mut buf = vec![0u8; len];
        self.read_into(address, &mut buf)?;
        Ok(buf)
    }

    /// Read a plain-old-data value (unaligned, native endian)
    fn read_pod<T: Pod>(&self, address: Address) -> Result<T>
    {
        let mut value = T::zeroed();
        self.read_into(address, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    /// Write a plain-old-data value (unaligned, native endian)
    fn write_pod<T: Pod>(&self, address: Address, value: T) -> Result<()>
    {
        self.write(address, bytemuck::bytes_of(&value))
    }

    /// Read a pointer-sized slot
    fn read_pointer(&self, address: Address) -> Result<Address>
    {
        self.read_pod::<u64>(address).map(Address::new)
    }

    /// Read a NUL-terminated string of at most `max_len` bytes
    ///
    /// Reads byte-by-byte in small chunks so a string that ends just before an
    /// unmapped page does not fail. Invalid UTF-8 is replaced.
    fn read_c_string(&self, address: Address, max_len: usize) -> Result<String>
    {
        const CHUNK: usize = 64;

        if address.is_null() {
            return Err(LensError::NullPointer("C string"));
        }

        let mut bytes = Vec::new();
        let mut cursor = address;
        while bytes.len() < max_len {
            let want = CHUNK.min(max_len - bytes.len());
            let mut buffer = [0u8; CHUNK];
            let chunk = &mut buffer[..want];
            if self.read_into(cursor, chunk).is_err() {
                // Retry byte-wise up to the fault.
                for index in 0..want {
                    let mut byte = [0u8; 1];
                    self.read_into(cursor + index as u64, &mut byte)?;
                    if byte[0] == 0 {
                        return Ok(String::from_utf8_lossy(&bytes).into_owned());
                    }
                    bytes.push(byte[0]);
                }
                cursor = cursor + want as u64;
                continue;
            }
            if let Some(end) = chunk.iter().position(|&b| b == 0) {
                bytes.extend_from_slice(&chunk[..end]);
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.extend_from_slice(chunk);
            cursor = cursor + want as u64;
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl<M: MemoryAccess + ?Sized> MemoryExt for M {}
