//! `MethodTable`: the per-type structure every object header points at.

use serde::{Deserialize, Serialize};

use super::{EEClass, MethodDesc};
use crate::error::{LensError, Result};
use crate::imports::{ImportDescriptor, Importable};
use crate::memory::MemoryExt;
use crate::overlay::{define_overlay, Field, Overlay, TaggedSlot};
use crate::types::Address;

/// Component size lives in the low 16 bits of the flags
pub const FLAG_HAS_COMPONENT_SIZE: u32 = 0x8000_0000;
pub const FLAG_CONTAINS_POINTERS: u32 = 0x0100_0000;
pub const CATEGORY_MASK: u32 = 0x000F_0000;

const CANONICAL_UNION: &str = "MethodTable::m_pEEClass";
/// Indirections followed before giving up on a canonical chain
const MAX_CANONICAL_HOPS: usize = 4;

/// Offsets of `MethodTable` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodTableLayout
{
    pub flags: Field<u32>,
    pub base_size: Field<u32>,
    pub flags2: Field<u16>,
    /// TypeDef RID
    pub token: Field<u16>,
    pub num_virtuals: Field<u16>,
    pub num_interfaces: Field<u16>,
    pub parent: Field<Address>,
    pub loader_module: Field<Address>,
    pub writeable_data: Field<Address>,
    /// EEClass / canonical MethodTable tagged union
    pub canonical: Field<Address>,
    pub per_inst_info: Field<Address>,
    pub interface_map: Field<Address>,
}

impl Default for MethodTableLayout
{
    fn default() -> Self
    {
        Self {
            flags: Field::new(0x00),
            base_size: Field::new(0x04),
            flags2: Field::new(0x08),
            token: Field::new(0x0a),
            num_virtuals: Field::new(0x0c),
            num_interfaces: Field::new(0x0e),
            parent: Field::new(0x10),
            loader_module: Field::new(0x18),
            writeable_data: Field::new(0x20),
            canonical: Field::new(0x28),
            per_inst_info: Field::new(0x30),
            interface_map: Field::new(0x38),
        }
    }
}

/// Type category, from the flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory
{
    Class,
    ValueType,
    Nullable,
    PrimitiveValueType,
    TruePrimitive,
    Array,
    SzArray,
    Interface,
    Unknown(u32),
}

impl TypeCategory
{
    pub fn from_flags(flags: u32) -> Self
    {
        match flags & CATEGORY_MASK {
            0x0000_0000 => Self::Class,
            0x0004_0000 => Self::ValueType,
            0x0005_0000 => Self::Nullable,
            0x0006_0000 => Self::PrimitiveValueType,
            0x0007_0000 => Self::TruePrimitive,
            0x0008_0000 => Self::Array,
            0x000A_0000 => Self::SzArray,
            0x000C_0000 => Self::Interface,
            other => Self::Unknown(other),
        }
    }

    pub fn is_array(self) -> bool
    {
        matches!(self, Self::Array | Self::SzArray)
    }

    pub fn is_value_type(self) -> bool
    {
        matches!(
            self,
            Self::ValueType | Self::Nullable | Self::PrimitiveValueType | Self::TruePrimitive
        )
    }
}

/// What the `m_pEEClass` / `m_pCanonMT` slot holds
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CanonicalInfo<'rt>
{
    /// Tag 0: this is the canonical table and owns the EEClass
    EEClass(EEClass<'rt>),
    /// Tag 2: a generic instantiation sharing a canonical table
    Canonical(MethodTable<'rt>),
    /// Tag 3: address of a cell holding the canonical table
    Indirection(Address),
}

define_overlay! {
    /// Typed view of a `MethodTable`
    pub struct MethodTable = "MethodTable";
}

impl Importable for MethodTable<'static>
{
    const TYPE_NAME: &'static str = "MethodTable";
    const IMPORTS: &'static [ImportDescriptor] = &[
        ImportDescriptor::symbol("GetNumInstanceFieldBytes"),
        ImportDescriptor::symbol("GetModule"),
        ImportDescriptor::symbol("GetMethodDescForSlot"),
    ];
}

impl<'rt> MethodTable<'rt>
{
    fn layout(&self) -> &'rt MethodTableLayout
    {
        &self.view.runtime().layout().method_table
    }

    pub fn flags(&self) -> Result<u32>
    {
        self.view.read(self.layout().flags)
    }

    /// Per-element size of arrays and strings, if the type has one
    pub fn component_size(&self) -> Result<Option<u16>>
    {
        let flags = self.flags()?;
        Ok((flags & FLAG_HAS_COMPONENT_SIZE != 0).then_some((flags & 0xffff) as u16))
    }

    pub fn contains_pointers(&self) -> Result<bool>
    {
        Ok(self.flags()? & FLAG_CONTAINS_POINTERS != 0)
    }

    pub fn category(&self) -> Result<TypeCategory>
    {
        Ok(TypeCategory::from_flags(self.flags()?))
    }

    /// Instance size in bytes, header and method table pointer included
    pub fn base_size(&self) -> Result<u32>
    {
        self.view.read(self.layout().base_size)
    }

    pub fn flags2(&self) -> Result<u16>
    {
        self.view.read(self.layout().flags2)
    }

    /// Full `mdtTypeDef` token
    pub fn type_def_token(&self) -> Result<u32>
    {
        Ok(0x0200_0000 | u32::from(self.view.read(self.layout().token)?))
    }

    pub fn num_virtuals(&self) -> Result<u16>
    {
        self.view.read(self.layout().num_virtuals)
    }

    pub fn num_interfaces(&self) -> Result<u16>
    {
        self.view.read(self.layout().num_interfaces)
    }

    /// Base type; `None` for `System.Object` and interfaces
    pub fn parent(&self) -> Result<Option<MethodTable<'rt>>>
    {
        self.view.follow(self.layout().parent)
    }

    pub fn loader_module(&self) -> Result<Address>
    {
        self.view.read(self.layout().loader_module)
    }

    pub fn writeable_data(&self) -> Result<Address>
    {
        self.view.read(self.layout().writeable_data)
    }

    pub fn per_inst_info(&self) -> Result<Address>
    {
        self.view.read(self.layout().per_inst_info)
    }

    pub fn interface_map(&self) -> Result<Address>
    {
        self.view.read(self.layout().interface_map)
    }

    /// Decode the EEClass / canonical table union
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::UnionTagUnsupported`] for tag 1, which the
    /// runtime never stores.
    pub fn canonical_info(&self) -> Result<CanonicalInfo<'rt>>
    {
        let runtime = self.view.runtime();
        let slot = TaggedSlot::read(runtime.memory(), self.view.address_of(self.layout().canonical))?;
        match slot.tag() {
            0 => Ok(CanonicalInfo::EEClass(EEClass::at(runtime, slot.pointer()))),
            2 => Ok(CanonicalInfo::Canonical(MethodTable::at(runtime, slot.pointer()))),
            3 => Ok(CanonicalInfo::Indirection(slot.pointer())),
            _ => Err(slot.unsupported(CANONICAL_UNION)),
        }
    }

    /// The canonical table: `self` unless this is a shared instantiation
    pub fn canonical(&self) -> Result<MethodTable<'rt>>
    {
        let runtime = self.view.runtime();
        let mut current = *self;
        for _ in 0..MAX_CANONICAL_HOPS {
            current = match current.canonical_info()? {
                CanonicalInfo::EEClass(_) => return Ok(current),
                CanonicalInfo::Canonical(table) => table,
                CanonicalInfo::Indirection(cell) => {
                    let target = runtime.memory().read_pointer(cell)?;
                    if target.is_null() {
                        return Err(LensError::NullPointer(CANONICAL_UNION));
                    }
                    MethodTable::at(runtime, target)
                }
            };
        }
        Err(LensError::NullPointer(CANONICAL_UNION))
    }

    /// The EEClass, through the canonical table if necessary
    pub fn ee_class(&self) -> Result<EEClass<'rt>>
    {
        match self.canonical()?.canonical_info()? {
            CanonicalInfo::EEClass(class) if !class.base().is_null() => Ok(class),
            _ => Err(LensError::NullPointer(CANONICAL_UNION)),
        }
    }

    /// Whether this is the runtime's `System.String` table
    pub fn is_string(&self) -> Result<bool>
    {
        Ok(self.view.runtime().globals().string_class()? == *self)
    }

    /// Bytes of instance field data, computed by the runtime
    pub fn num_instance_field_bytes(&self) -> Result<u32>
    {
        // SAFETY: `MethodTable::GetNumInstanceFieldBytes() const -> uint32_t`.
        unsafe {
            self.view
                .runtime()
                .call::<MethodTable<'static>, u32>("GetNumInstanceFieldBytes", self.base(), &[])
        }
    }

    /// Address of the owning `Module`
    pub fn module(&self) -> Result<Address>
    {
        // SAFETY: `MethodTable::GetModule() -> Module*`.
        unsafe {
            self.view
                .runtime()
                .call::<MethodTable<'static>, Address>("GetModule", self.base(), &[])
        }
    }

    /// The method in vtable slot `slot`
    pub fn method_desc_for_slot(&self, slot: u32) -> Result<MethodDesc<'rt>>
    {
        // SAFETY: `MethodTable::GetMethodDescForSlot(DWORD) -> MethodDesc*`.
        let address: Address = unsafe {
            self.view
                .runtime()
                .call::<MethodTable<'static>, Address>("GetMethodDescForSlot", self.base(), &[slot as usize])?
        };
        if address.is_null() {
            return Err(LensError::NullPointer("MethodTable::GetMethodDescForSlot"));
        }
        Ok(MethodDesc::at(self.view.runtime(), address))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_categories()
    {
        assert_eq!(TypeCategory::from_flags(0x8000_0000 | 0x000A_0000 | 2), TypeCategory::SzArray);
        assert!(TypeCategory::from_flags(0x0007_0000).is_value_type());
        assert!(TypeCategory::from_flags(0x0008_0000).is_array());
        assert_eq!(TypeCategory::from_flags(0x0001_0000), TypeCategory::Unknown(0x0001_0000));
    }
}
