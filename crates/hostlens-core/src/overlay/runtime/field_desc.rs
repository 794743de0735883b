//! `FieldDesc`: one field of a type, packed into two bitfield words.
//!
//! ```text
//! dword1: | mb:24 | static:1 | threadlocal:1 | rva:1 | protection:3 | requiresFullMb:1 | :1 |
//! dword2: | offset:27 | type:5 |
//! ```

use serde::{Deserialize, Serialize};

use super::MethodTable;
use crate::error::Result;
use crate::imports::{ImportDescriptor, Importable};
use crate::overlay::{define_overlay, Bits, Field, Overlay};
use crate::types::Address;

/// `mdtFieldDef`
pub const FIELD_DEF_TOKEN_TYPE: u32 = 0x0400_0000;

/// Offsets and bit positions of `FieldDesc`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldDescLayout
{
    pub enclosing_method_table: Field<Address>,
    pub dword1: Field<u32>,
    pub dword2: Field<u32>,
    /// Stride of the field desc array
    pub size: u64,
    pub member_def: Bits,
    pub is_static: Bits,
    pub is_thread_local: Bits,
    pub is_rva: Bits,
    pub protection: Bits,
    pub requires_full_member_def: Bits,
    pub offset: Bits,
    pub element_type: Bits,
}

impl Default for FieldDescLayout
{
    fn default() -> Self
    {
        Self {
            enclosing_method_table: Field::new(0x00),
            dword1: Field::new(0x08),
            dword2: Field::new(0x0c),
            size: 0x10,
            member_def: Bits::new(0, 24),
            is_static: Bits::new(24, 1),
            is_thread_local: Bits::new(25, 1),
            is_rva: Bits::new(26, 1),
            protection: Bits::new(27, 3),
            requires_full_member_def: Bits::new(30, 1),
            offset: Bits::new(0, 27),
            element_type: Bits::new(27, 5),
        }
    }
}

impl FieldDescLayout
{
    /// Check every bit slice against its word
    ///
    /// ## Errors
    ///
    /// [`crate::error::LensError::InvalidLayout`] for the first slice that
    /// does not fit.
    pub fn validate(&self) -> Result<()>
    {
        let slices = [
            ("field_desc.member_def", self.member_def),
            ("field_desc.is_static", self.is_static),
            ("field_desc.is_thread_local", self.is_thread_local),
            ("field_desc.is_rva", self.is_rva),
            ("field_desc.protection", self.protection),
            ("field_desc.requires_full_member_def", self.requires_full_member_def),
            ("field_desc.offset", self.offset),
            ("field_desc.element_type", self.element_type),
        ];
        for (field, bits) in slices {
            bits.check(field)?;
        }
        Ok(())
    }
}

/// Field visibility, `fdFieldAccessMask`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess
{
    PrivateScope,
    Private,
    FamilyAndAssembly,
    Assembly,
    Family,
    FamilyOrAssembly,
    Public,
    Unknown(u32),
}

impl From<u32> for FieldAccess
{
    fn from(raw: u32) -> Self
    {
        match raw {
            0 => Self::PrivateScope,
            1 => Self::Private,
            2 => Self::FamilyAndAssembly,
            3 => Self::Assembly,
            4 => Self::Family,
            5 => Self::FamilyOrAssembly,
            6 => Self::Public,
            other => Self::Unknown(other),
        }
    }
}

/// `CorElementType` of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorElementType
{
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Ptr,
    ByRef,
    ValueType,
    Class,
    Var,
    Array,
    GenericInst,
    TypedByRef,
    I,
    U,
    FnPtr,
    Object,
    SzArray,
    MVar,
    Other(u8),
}

impl From<u8> for CorElementType
{
    fn from(raw: u8) -> Self
    {
        match raw {
            0x01 => Self::Void,
            0x02 => Self::Boolean,
            0x03 => Self::Char,
            0x04 => Self::I1,
            0x05 => Self::U1,
            0x06 => Self::I2,
            0x07 => Self::U2,
            0x08 => Self::I4,
            0x09 => Self::U4,
            0x0a => Self::I8,
            0x0b => Self::U8,
            0x0c => Self::R4,
            0x0d => Self::R8,
            0x0e => Self::String,
            0x0f => Self::Ptr,
            0x10 => Self::ByRef,
            0x11 => Self::ValueType,
            0x12 => Self::Class,
            0x13 => Self::Var,
            0x14 => Self::Array,
            0x15 => Self::GenericInst,
            0x16 => Self::TypedByRef,
            0x18 => Self::I,
            0x19 => Self::U,
            0x1b => Self::FnPtr,
            0x1c => Self::Object,
            0x1d => Self::SzArray,
            0x1e => Self::MVar,
            other => Self::Other(other),
        }
    }
}

impl CorElementType
{
    /// Whether the field holds an object reference the GC tracks
    pub fn is_reference(self) -> bool
    {
        matches!(
            self,
            Self::String | Self::Class | Self::Array | Self::Object | Self::SzArray | Self::Var | Self::GenericInst
        )
    }
}

define_overlay! {
    /// Typed view of a `FieldDesc`
    pub struct FieldDesc = "FieldDesc";
}

impl Importable for FieldDesc<'static>
{
    const TYPE_NAME: &'static str = "FieldDesc";
    const IMPORTS: &'static [ImportDescriptor] = &[ImportDescriptor::symbol("GetSize")];
}

impl<'rt> FieldDesc<'rt>
{
    fn layout(&self) -> &'rt FieldDescLayout
    {
        &self.view.runtime().layout().field_desc
    }

    pub fn enclosing_method_table(&self) -> Result<Option<MethodTable<'rt>>>
    {
        self.view.follow(self.layout().enclosing_method_table)
    }

    /// Low 24 bits of the `FieldDef` RID
    pub fn member_def(&self) -> Result<u32>
    {
        let layout = self.layout();
        self.view.bits(layout.dword1, layout.member_def)
    }

    /// The `FieldDef` token, when the RID fits in the descriptor
    ///
    /// `None` when the runtime had to keep the full token elsewhere.
    pub fn token(&self) -> Result<Option<u32>>
    {
        if self.requires_full_member_def()? {
            return Ok(None);
        }
        Ok(Some(FIELD_DEF_TOKEN_TYPE | self.member_def()?))
    }

    pub fn is_static(&self) -> Result<bool>
    {
        self.flag(self.layout().is_static)
    }

    pub fn is_thread_local(&self) -> Result<bool>
    {
        self.flag(self.layout().is_thread_local)
    }

    pub fn is_rva(&self) -> Result<bool>
    {
        self.flag(self.layout().is_rva)
    }

    pub fn requires_full_member_def(&self) -> Result<bool>
    {
        self.flag(self.layout().requires_full_member_def)
    }

    pub fn protection(&self) -> Result<FieldAccess>
    {
        let layout = self.layout();
        Ok(FieldAccess::from(self.view.bits(layout.dword1, layout.protection)?))
    }

    /// Byte offset of the field within the instance data (or statics block)
    pub fn offset(&self) -> Result<u32>
    {
        let layout = self.layout();
        self.view.bits(layout.dword2, layout.offset)
    }

    /// Rewrite the offset; the type bits sharing the word are preserved
    ///
    /// Values wider than the offset bitfield are truncated to it.
    pub fn set_offset(&self, offset: u32) -> Result<()>
    {
        let layout = self.layout();
        self.view.set_bits(layout.dword2, layout.offset, offset)
    }

    pub fn element_type(&self) -> Result<CorElementType>
    {
        let layout = self.layout();
        #[allow(clippy::cast_possible_truncation)]
        let raw = self.view.bits(layout.dword2, layout.element_type)? as u8;
        Ok(CorElementType::from(raw))
    }

    /// Size of the field's storage, computed by the runtime
    pub fn size(&self) -> Result<u32>
    {
        // SAFETY: `FieldDesc::GetSize() -> UINT`.
        unsafe {
            self.view
                .runtime()
                .call::<FieldDesc<'static>, u32>("GetSize", self.base(), &[])
        }
    }

    fn flag(&self, bits: Bits) -> Result<bool>
    {
        Ok(self.view.bits(self.layout().dword1, bits)? != 0)
    }
}
