//! # Structure Overlays
//!
//! Typed views over runtime structures nobody gave us headers for.
//!
//! An overlay is a base [`Address`] plus a borrowed [`Runtime`]. It owns no
//! memory and carries no state; every accessor recomputes `base + offset`
//! and reads through the runtime's memory accessor at call time. The
//! collector may move objects between two calls, so nothing derived from an
//! address is ever cached.
//!
//! ## Building Blocks
//!
//! - [`Field`]: a typed byte offset (scalars, pointers)
//! - [`Bits`]: a `(shift, width)` slice of a `u32` word, for C bitfields
//! - [`PackedBitVector`]: self-describing variable-width fields
//! - [`TaggedSlot`]: a pointer whose low two bits select its meaning
//!
//! Offsets live in [`layout::RuntimeLayout`] and are configuration, not
//! constants: they belong to one build of the runtime.

pub mod bitfield;
pub mod layout;
pub mod runtime;
pub mod union;

use std::fmt;
use std::marker::PhantomData;

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

pub use self::bitfield::{Bits, PackedBitVector};
pub use self::layout::RuntimeLayout;
pub use self::union::TaggedSlot;
use crate::error::Result;
use crate::memory::MemoryExt;
use crate::runtime::Runtime;
use crate::types::Address;

/// Typed byte offset into a structure
///
/// Serialises as the bare offset, so layouts read naturally in JSON.
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Field<T>
{
    offset: u64,
    #[serde(skip)]
    _type: PhantomData<fn() -> T>,
}

impl<T> Field<T>
{
    pub const fn new(offset: u64) -> Self
    {
        Self {
            offset,
            _type: PhantomData,
        }
    }

    pub const fn offset(&self) -> u64
    {
        self.offset
    }
}

impl<T> Clone for Field<T>
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T> PartialEq for Field<T>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.offset == other.offset
    }
}

impl<T> Eq for Field<T> {}

impl<T> fmt::Debug for Field<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "Field<{}>(+0x{:x})", std::any::type_name::<T>(), self.offset)
    }
}

/// Base address plus the runtime to read it through
#[derive(Clone, Copy)]
pub struct View<'rt>
{
    base: Address,
    runtime: &'rt Runtime,
}

impl<'rt> View<'rt>
{
    pub fn new(runtime: &'rt Runtime, base: Address) -> Self
    {
        Self { base, runtime }
    }

    pub fn base(&self) -> Address
    {
        self.base
    }

    pub fn runtime(&self) -> &'rt Runtime
    {
        self.runtime
    }

    /// `base + offset`, computed now
    pub fn address_of<T>(&self, field: Field<T>) -> Address
    {
        self.base + field.offset()
    }

    pub fn read<T: Pod>(&self, field: Field<T>) -> Result<T>
    {
        self.runtime.memory().read_pod(self.address_of(field))
    }

    pub fn write<T: Pod>(&self, field: Field<T>, value: T) -> Result<()>
    {
        self.runtime.memory().write_pod(self.address_of(field), value)
    }

    /// Extract a fixed bitfield
    ///
    /// ## Errors
    ///
    /// [`crate::error::LensError::InvalidLayout`] for a slice outside the word.
    pub fn bits(&self, word: Field<u32>, bits: Bits) -> Result<u32>
    {
        let bits = bits.check("bitfield")?;
        Ok(bits.extract(self.read(word)?))
    }

    /// Read-modify-write a fixed bitfield; bits outside the slice are preserved
    pub fn set_bits(&self, word: Field<u32>, bits: Bits, value: u32) -> Result<()>
    {
        let bits = bits.check("bitfield")?;
        let current = self.read(word)?;
        self.write(word, bits.insert(current, value))
    }

    /// Follow a pointer field; null is `None`
    pub fn follow<O: Overlay<'rt>>(&self, field: Field<Address>) -> Result<Option<O>>
    {
        let target = self.read(field)?;
        Ok((!target.is_null()).then(|| O::at(self.runtime, target)))
    }

    /// A structure embedded at `offset` from this one
    pub fn embedded<O: Overlay<'rt>>(&self, offset: u64) -> O
    {
        O::at(self.runtime, self.base + offset)
    }
}

impl fmt::Debug for View<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.base)
    }
}

/// A typed lens over one runtime structure
pub trait Overlay<'rt>: Copy
{
    /// Structure name, for diagnostics
    const NAME: &'static str;

    fn from_view(view: View<'rt>) -> Self;

    fn view(&self) -> View<'rt>;

    fn at(runtime: &'rt Runtime, base: Address) -> Self
    {
        Self::from_view(View::new(runtime, base))
    }

    fn base(&self) -> Address
    {
        self.view().base()
    }
}

/// Declare an overlay struct over a [`View`]
macro_rules! define_overlay {
    ($(#[$meta:meta])* $vis:vis struct $name:ident = $native:literal;) => {
        $(#[$meta])*
        #[derive(Clone, Copy)]
        $vis struct $name<'rt>
        {
            view: $crate::overlay::View<'rt>,
        }

        impl<'rt> $crate::overlay::Overlay<'rt> for $name<'rt>
        {
            const NAME: &'static str = $native;

            fn from_view(view: $crate::overlay::View<'rt>) -> Self
            {
                Self { view }
            }

            fn view(&self) -> $crate::overlay::View<'rt>
            {
                self.view
            }
        }

        impl ::std::fmt::Debug for $name<'_>
        {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result
            {
                write!(f, "{}@{}", $native, self.view.base())
            }
        }

        impl PartialEq for $name<'_>
        {
            fn eq(&self, other: &Self) -> bool
            {
                self.view.base() == other.view.base()
            }
        }
    };
}

pub(crate) use define_overlay;
