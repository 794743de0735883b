//! `EEClass`: the cold, per-type metadata behind a canonical `MethodTable`.
//!
//! The fixed part is followed by a block of packed counts
//! ([`PackedField`]). The block starts where the fixed part ends, and the
//! fixed part's size is stored *in the structure itself*, since subclasses of
//! `EEClass` (delegates, arrays, layout classes) are larger. Its address is
//! therefore always read, never assumed.

use serde::{Deserialize, Serialize};

use super::{FieldDesc, MethodDescChunk, MethodTable};
use crate::error::Result;
use crate::memory::MemoryExt;
use crate::overlay::{define_overlay, Field, Overlay, PackedBitVector};
use crate::types::Address;

/// Offsets of `EEClass` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EEClassLayout
{
    pub method_table: Field<Address>,
    pub field_desc_list: Field<Address>,
    pub chunks: Field<Address>,
    pub attributes: Field<u32>,
    pub vm_flags: Field<u32>,
    pub norm_type: Field<u8>,
    pub fields_are_packed: Field<u8>,
    /// `cbFixedEEClassFields`
    pub fixed_fields_size: Field<u8>,
    pub base_size_padding: Field<u8>,
}

impl Default for EEClassLayout
{
    fn default() -> Self
    {
        Self {
            method_table: Field::new(0x10),
            field_desc_list: Field::new(0x18),
            chunks: Field::new(0x20),
            attributes: Field::new(0x38),
            vm_flags: Field::new(0x3c),
            norm_type: Field::new(0x40),
            fields_are_packed: Field::new(0x41),
            fixed_fields_size: Field::new(0x42),
            base_size_padding: Field::new(0x43),
        }
    }
}

/// The packed counts, in storage order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackedField
{
    NumInstanceFields,
    NumMethods,
    NumStaticFields,
    NumHandleStatics,
    NumBoxedStatics,
    NonGCStaticFieldBytes,
    NumThreadStaticFields,
    NumHandleThreadStatics,
    NumBoxedThreadStatics,
    NonGCThreadStaticFieldBytes,
    NumNonVirtualSlots,
}

impl PackedField
{
    pub const COUNT: usize = 11;

    pub const ALL: [PackedField; PackedField::COUNT] = [
        Self::NumInstanceFields,
        Self::NumMethods,
        Self::NumStaticFields,
        Self::NumHandleStatics,
        Self::NumBoxedStatics,
        Self::NonGCStaticFieldBytes,
        Self::NumThreadStaticFields,
        Self::NumHandleThreadStatics,
        Self::NumBoxedThreadStatics,
        Self::NonGCThreadStaticFieldBytes,
        Self::NumNonVirtualSlots,
    ];

    pub const fn index(self) -> usize
    {
        self as usize
    }
}

define_overlay! {
    /// Typed view of an `EEClass`
    pub struct EEClass = "EEClass";
}

impl<'rt> EEClass<'rt>
{
    fn layout(&self) -> &'rt EEClassLayout
    {
        &self.view.runtime().layout().ee_class
    }

    /// Back-pointer to the canonical table
    pub fn method_table(&self) -> Result<Option<MethodTable<'rt>>>
    {
        self.view.follow(self.layout().method_table)
    }

    /// First of the type's own field descriptors
    pub fn field_desc_list(&self) -> Result<Option<FieldDesc<'rt>>>
    {
        self.view.follow(self.layout().field_desc_list)
    }

    /// First method desc chunk
    pub fn chunks(&self) -> Result<Option<MethodDescChunk<'rt>>>
    {
        self.view.follow(self.layout().chunks)
    }

    /// `TypeAttributes` from metadata
    pub fn attributes(&self) -> Result<u32>
    {
        self.view.read(self.layout().attributes)
    }

    pub fn vm_flags(&self) -> Result<u32>
    {
        self.view.read(self.layout().vm_flags)
    }

    /// `CorElementType` the type normalises to
    pub fn norm_type(&self) -> Result<u8>
    {
        self.view.read(self.layout().norm_type)
    }

    pub fn fields_are_packed(&self) -> Result<bool>
    {
        Ok(self.view.read(self.layout().fields_are_packed)? != 0)
    }

    pub fn fixed_fields_size(&self) -> Result<u8>
    {
        self.view.read(self.layout().fixed_fields_size)
    }

    pub fn base_size_padding(&self) -> Result<u8>
    {
        self.view.read(self.layout().base_size_padding)
    }

    /// Start of the packed block: `this + cbFixedEEClassFields`
    pub fn packed_fields_address(&self) -> Result<Address>
    {
        Ok(self.base() + u64::from(self.fixed_fields_size()?))
    }

    /// Current words of the packed block
    pub fn packed_words(&self) -> Result<Vec<u32>>
    {
        let bytes = self
            .view
            .runtime()
            .memory()
            .read_bytes(self.packed_fields_address()?, PackedField::COUNT * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|word| u32::from_ne_bytes([word[0], word[1], word[2], word[3]]))
            .collect())
    }

    /// One packed count
    ///
    /// ## Errors
    ///
    /// [`crate::error::LensError::FieldIndexOutOfRange`] if the encoded
    /// lengths run past the block, plus memory errors.
    pub fn packed_field(&self, field: PackedField) -> Result<u32>
    {
        let words = self.packed_words()?;
        PackedBitVector::new(&words, PackedField::COUNT, self.fields_are_packed()?).get(field.index())
    }

    pub fn num_instance_fields(&self) -> Result<u32>
    {
        self.packed_field(PackedField::NumInstanceFields)
    }

    pub fn num_methods(&self) -> Result<u32>
    {
        self.packed_field(PackedField::NumMethods)
    }

    pub fn num_static_fields(&self) -> Result<u32>
    {
        self.packed_field(PackedField::NumStaticFields)
    }

    pub fn num_non_virtual_slots(&self) -> Result<u32>
    {
        self.packed_field(PackedField::NumNonVirtualSlots)
    }

    /// Instance fields this type adds to its parent's
    ///
    /// `NumInstanceFields` counts inherited fields too; the parent's count is
    /// taken off. A type without a parent introduces all of them.
    pub fn num_introduced_instance_fields(&self) -> Result<u32>
    {
        let total = self.num_instance_fields()?;
        let parent = match self.method_table()? {
            Some(table) => table.parent()?,
            None => None,
        };
        match parent {
            Some(parent) => Ok(total.saturating_sub(parent.ee_class()?.num_instance_fields()?)),
            None => Ok(total),
        }
    }

    /// The type's own instance and static field descriptors
    ///
    /// Inherited fields live in the parent's EEClass.
    pub fn field_descs(&self) -> Result<Vec<FieldDesc<'rt>>>
    {
        let Some(first) = self.field_desc_list()? else {
            return Ok(Vec::new());
        };
        let count = self.num_introduced_instance_fields()? + self.num_static_fields()?;
        let stride = self.view.runtime().layout().field_desc.size;
        let runtime = self.view.runtime();
        Ok((0..u64::from(count))
            .map(|index| FieldDesc::at(runtime, first.base() + index * stride))
            .collect())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_packed_field_order()
    {
        assert_eq!(PackedField::ALL.len(), PackedField::COUNT);
        for (index, field) in PackedField::ALL.iter().enumerate() {
            assert_eq!(field.index(), index);
        }
        assert_eq!(PackedField::NumNonVirtualSlots.index(), 10);
    }
}
