//! Managed object header.
//!
//! Every object reference points at the method table pointer; the sync block
//! sits one pointer *before* it. The collector borrows the low bits of the
//! method table pointer during marking, so they are always masked off.

use serde::{Deserialize, Serialize};

use super::MethodTable;
use crate::error::{LensError, Result};
use crate::memory::MemoryExt;
use crate::overlay::{define_overlay, Field, Overlay};
use crate::types::Address;

/// Offsets of the object header and of string/array payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectLayout
{
    pub method_table: Field<Address>,
    /// GC bits in the method table pointer
    pub method_table_mask: u64,
    /// String length or array element count
    pub component_count: Field<u32>,
    /// First UTF-16 unit of a string
    pub string_chars: u64,
    /// First element of a single-dimension array
    pub array_data: u64,
}

impl Default for ObjectLayout
{
    fn default() -> Self
    {
        Self {
            method_table: Field::new(0x00),
            method_table_mask: 0x7,
            component_count: Field::new(0x08),
            string_chars: 0x0c,
            array_data: 0x10,
        }
    }
}

define_overlay! {
    /// A managed object reference
    pub struct ManagedObject = "Object";
}

impl<'rt> ManagedObject<'rt>
{
    fn layout(&self) -> &'rt ObjectLayout
    {
        &self.view.runtime().layout().object
    }

    /// The object's type, GC bits cleared
    pub fn method_table(&self) -> Result<MethodTable<'rt>>
    {
        let layout = self.layout();
        let raw: Address = self.view.read(layout.method_table)?;
        let table = raw.untagged(layout.method_table_mask);
        if table.is_null() {
            return Err(LensError::NullPointer("Object::m_pMethTab"));
        }
        Ok(MethodTable::at(self.view.runtime(), table))
    }

    /// Length of a string, or element count of an array
    ///
    /// Meaningless for types without a component size.
    pub fn component_count(&self) -> Result<u32>
    {
        self.view.read(self.layout().component_count)
    }

    pub fn is_string(&self) -> Result<bool>
    {
        self.method_table()?.is_string()
    }

    /// Contents of a `System.String`; unpaired surrogates are replaced
    pub fn string_value(&self) -> Result<String>
    {
        let length = self.component_count()? as usize;
        let bytes = self
            .view
            .runtime()
            .memory()
            .read_bytes(self.base() + self.layout().string_chars, length * 2)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|unit| u16::from_le_bytes([unit[0], unit[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    /// First element of an array
    pub fn array_data_address(&self) -> Address
    {
        self.base() + self.layout().array_data
    }

    /// Address of element `index` of an array, given its component size
    pub fn array_element_address(&self, index: u32) -> Result<Address>
    {
        let count = self.component_count()?;
        if index >= count {
            return Err(LensError::FieldIndexOutOfRange {
                index: index as usize,
                count: count as usize,
            });
        }
        let component_size = self
            .method_table()?
            .component_size()?
            .ok_or(LensError::NullPointer("MethodTable::GetComponentSize"))?;
        Ok(self.array_data_address() + u64::from(index) * u64::from(component_size))
    }
}
