//! `MethodDesc` and the `MethodDescChunk` that holds it.
//!
//! Method descs are allocated in chunks that share a method table and the
//! high bits of their `MethodDef` tokens. A desc finds its chunk by stepping
//! back `chunk_index` alignment units from itself, then over the chunk header.
//! Descs vary in size by classification, so walking a chunk needs the
//! runtime's own `SizeOf`.

use serde::{Deserialize, Serialize};

use super::MethodTable;
use crate::error::{LensError, Result};
use crate::imports::{ImportDescriptor, Importable};
use crate::memory::MemoryExt;
use crate::overlay::{define_overlay, Field, Overlay};
use crate::types::Address;

/// `mdtMethodDef`
pub const METHOD_DEF_TOKEN_TYPE: u32 = 0x0600_0000;

/// Longest name read back from `GetName`
const MAX_NAME_LEN: usize = 1024;

/// Offsets and constants of `MethodDesc`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodDescLayout
{
    /// Low token bits share this word with flags
    pub flags3_and_token_remainder: Field<u16>,
    pub chunk_index: Field<u8>,
    pub flags2: Field<u8>,
    pub slot: Field<u16>,
    pub flags: Field<u16>,
    pub classification_mask: u16,
    /// `MethodDesc::ALIGNMENT`
    pub alignment: u64,
    pub token_remainder_bits: u8,
}

impl Default for MethodDescLayout
{
    fn default() -> Self
    {
        Self {
            flags3_and_token_remainder: Field::new(0x00),
            chunk_index: Field::new(0x02),
            flags2: Field::new(0x03),
            slot: Field::new(0x04),
            flags: Field::new(0x06),
            classification_mask: 0x0007,
            alignment: 8,
            token_remainder_bits: 12,
        }
    }
}

impl MethodDescLayout
{
    /// `token_remainder_bits`, checked to fit the 16-bit remainder word
    ///
    /// ## Errors
    ///
    /// [`LensError::InvalidLayout`] outside `1..=16`.
    pub fn token_remainder_width(&self) -> Result<u32>
    {
        match self.token_remainder_bits {
            bits @ 1..=16 => Ok(u32::from(bits)),
            bits => Err(LensError::InvalidLayout {
                field: "method_desc.token_remainder_bits",
                reason: format!("{bits} is outside 1..=16"),
            }),
        }
    }
}

/// Offsets of `MethodDescChunk`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodDescChunkLayout
{
    pub method_table: Field<Address>,
    pub next: Field<Address>,
    /// Size in alignment units, minus one
    pub size: Field<u8>,
    /// Number of descs, minus one
    pub count: Field<u8>,
    pub flags_and_token_range: Field<u16>,
    /// Bytes before the first desc
    pub header_size: u64,
}

impl Default for MethodDescChunkLayout
{
    fn default() -> Self
    {
        Self {
            method_table: Field::new(0x00),
            next: Field::new(0x08),
            size: Field::new(0x10),
            count: Field::new(0x11),
            flags_and_token_range: Field::new(0x12),
            header_size: 0x18,
        }
    }
}

/// `MethodClassification`, the low bits of the flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClassification
{
    IL,
    FCall,
    NDirect,
    EEImpl,
    Array,
    Instantiated,
    ComInterop,
    Dynamic,
}

impl MethodClassification
{
    pub fn from_bits(bits: u16) -> Self
    {
        match bits & 0x7 {
            0 => Self::IL,
            1 => Self::FCall,
            2 => Self::NDirect,
            3 => Self::EEImpl,
            4 => Self::Array,
            5 => Self::Instantiated,
            6 => Self::ComInterop,
            _ => Self::Dynamic,
        }
    }
}

define_overlay! {
    /// Typed view of a `MethodDesc`
    pub struct MethodDesc = "MethodDesc";
}

impl Importable for MethodDesc<'static>
{
    const TYPE_NAME: &'static str = "MethodDesc";
    const IMPORTS: &'static [ImportDescriptor] = &[
        ImportDescriptor::symbol("SizeOf"),
        ImportDescriptor::symbol("GetMethodTable"),
        ImportDescriptor::symbol("GetName"),
    ];
}

impl<'rt> MethodDesc<'rt>
{
    fn layout(&self) -> &'rt MethodDescLayout
    {
        &self.view.runtime().layout().method_desc
    }

    pub fn flags(&self) -> Result<u16>
    {
        self.view.read(self.layout().flags)
    }

    pub fn flags2(&self) -> Result<u8>
    {
        self.view.read(self.layout().flags2)
    }

    pub fn classification(&self) -> Result<MethodClassification>
    {
        Ok(MethodClassification::from_bits(self.flags()? & self.layout().classification_mask))
    }

    /// Position of this desc within its chunk, in alignment units
    pub fn chunk_index(&self) -> Result<u8>
    {
        self.view.read(self.layout().chunk_index)
    }

    pub fn slot(&self) -> Result<u16>
    {
        self.view.read(self.layout().slot)
    }

    /// Low bits of the `MethodDef` RID
    pub fn token_remainder(&self) -> Result<u16>
    {
        let layout = self.layout();
        let mask = u16::MAX >> (16 - layout.token_remainder_width()?);
        Ok(self.view.read(layout.flags3_and_token_remainder)? & mask)
    }

    /// The chunk this desc lives in
    pub fn chunk(&self) -> Result<MethodDescChunk<'rt>>
    {
        let runtime = self.view.runtime();
        let back = runtime.layout().method_desc_chunk.header_size
            + u64::from(self.chunk_index()?) * self.layout().alignment;
        let address = self
            .base()
            .checked_sub(back)
            .ok_or(LensError::NullPointer("MethodDesc::GetMethodDescChunk"))?;
        Ok(MethodDescChunk::at(runtime, address))
    }

    /// Full `MethodDef` token, recombined from the chunk's range and our remainder
    pub fn token(&self) -> Result<u32>
    {
        let bits = self.layout().token_remainder_width()?;
        let range_mask = (1u32 << bits) - 1;
        let range = u32::from(self.chunk()?.token_range()?) & range_mask;
        Ok(METHOD_DEF_TOKEN_TYPE | (range << bits) | u32::from(self.token_remainder()?))
    }

    /// The chunk's method table, read directly
    pub fn chunk_method_table(&self) -> Result<Option<MethodTable<'rt>>>
    {
        self.chunk()?.method_table()
    }

    /// Size of this desc, classification-specific parts included
    pub fn size(&self) -> Result<usize>
    {
        // SAFETY: `MethodDesc::SizeOf() -> SIZE_T`.
        unsafe {
            self.view
                .runtime()
                .call::<MethodDesc<'static>, usize>("SizeOf", self.base(), &[])
        }
    }

    /// Owning method table, as the runtime computes it
    pub fn method_table(&self) -> Result<MethodTable<'rt>>
    {
        // SAFETY: `MethodDesc::GetMethodTable() -> MethodTable*`.
        let address: Address = unsafe {
            self.view
                .runtime()
                .call::<MethodDesc<'static>, Address>("GetMethodTable", self.base(), &[])?
        };
        if address.is_null() {
            return Err(LensError::NullPointer("MethodDesc::GetMethodTable"));
        }
        Ok(MethodTable::at(self.view.runtime(), address))
    }

    /// Simple method name
    pub fn name(&self) -> Result<String>
    {
        let runtime = self.view.runtime();
        // SAFETY: `MethodDesc::GetName() -> LPCUTF8`, a string owned by the runtime.
        let address: Address = unsafe { runtime.call::<MethodDesc<'static>, Address>("GetName", self.base(), &[])? };
        runtime.memory().read_c_string(address, MAX_NAME_LEN)
    }
}

define_overlay! {
    /// Typed view of a `MethodDescChunk`
    pub struct MethodDescChunk = "MethodDescChunk";
}

impl<'rt> MethodDescChunk<'rt>
{
    fn layout(&self) -> &'rt MethodDescChunkLayout
    {
        &self.view.runtime().layout().method_desc_chunk
    }

    pub fn method_table(&self) -> Result<Option<MethodTable<'rt>>>
    {
        self.view.follow(self.layout().method_table)
    }

    /// Next chunk of the same type
    pub fn next(&self) -> Result<Option<MethodDescChunk<'rt>>>
    {
        self.view.follow(self.layout().next)
    }

    /// Size of the desc area in alignment units
    pub fn size(&self) -> Result<u32>
    {
        Ok(u32::from(self.view.read(self.layout().size)?) + 1)
    }

    /// Number of descs in the chunk
    pub fn count(&self) -> Result<u32>
    {
        Ok(u32::from(self.view.read(self.layout().count)?) + 1)
    }

    /// High bits shared by every token in the chunk
    pub fn token_range(&self) -> Result<u16>
    {
        self.view.read(self.layout().flags_and_token_range)
    }

    pub fn first(&self) -> MethodDesc<'rt>
    {
        self.view.embedded(self.layout().header_size)
    }

    /// Every desc in the chunk, walked with the runtime's `SizeOf`
    ///
    /// ## Errors
    ///
    /// Fails if a desc reports size zero, which would never advance.
    pub fn methods(&self) -> Result<Vec<MethodDesc<'rt>>>
    {
        let count = self.count()?;
        let mut methods = Vec::with_capacity(count as usize);
        let mut current = self.first();
        for index in 0..count {
            methods.push(current);
            if index + 1 == count {
                break;
            }
            let size = current.size()?;
            if size == 0 {
                return Err(LensError::NullPointer("MethodDesc::SizeOf"));
            }
            current = MethodDesc::at(self.view.runtime(), current.base() + size as u64);
        }
        Ok(methods)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_classification()
    {
        assert_eq!(MethodClassification::from_bits(0), MethodClassification::IL);
        assert_eq!(MethodClassification::from_bits(0x0012), MethodClassification::NDirect);
        assert_eq!(MethodClassification::from_bits(7), MethodClassification::Dynamic);
    }
}
