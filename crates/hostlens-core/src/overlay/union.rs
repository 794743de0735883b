//! Low-bit tagged pointer slots.
//!
//! Runtime structures are pointer-aligned, so the two low bits of a pointer
//! to one are free. A tagged slot stores the pointer with those bits holding
//! a discriminator that says what the pointer points *at*. Callers match on
//! [`TaggedSlot::tag`] and turn every tag they do not define into
//! [`TaggedSlot::unsupported`]; no tag is ever given a default meaning.

use tracing::trace;

use crate::error::{LensError, Result};
use crate::memory::{MemoryAccess, MemoryExt};
use crate::types::Address;

/// Discriminator bits
pub const TAG_MASK: u64 = 0b11;

/// A pointer slot read together with its tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedSlot
{
    slot: Address,
    raw: u64,
}

impl TaggedSlot
{
    /// Read the slot at `slot`
    ///
    /// ## Errors
    ///
    /// Memory errors from the accessor.
    pub fn read(memory: &(impl MemoryAccess + ?Sized), slot: Address) -> Result<Self>
    {
        let raw = memory.read_pod::<u64>(slot)?;
        let tagged = Self { slot, raw };
        trace!(%slot, tag = tagged.tag(), pointer = %tagged.pointer(), "tagged slot");
        Ok(tagged)
    }

    /// Address the slot itself lives at
    pub fn slot(&self) -> Address
    {
        self.slot
    }

    pub fn raw(&self) -> u64
    {
        self.raw
    }

    pub fn tag(&self) -> u64
    {
        self.raw & TAG_MASK
    }

    /// The pointer with the tag cleared
    pub fn pointer(&self) -> Address
    {
        Address::new(self.raw).untagged(TAG_MASK)
    }

    /// The error for a tag the union does not define
    pub fn unsupported(&self, union: &'static str) -> LensError
    {
        LensError::UnionTagUnsupported {
            union,
            address: self.slot,
            tag: self.tag(),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::memory::BufferMemory;

    #[test]
    fn test_tag_and_pointer()
    {
        let memory = BufferMemory::zeroed(Address::new(0x1000), 16);
        memory.write_pod(Address::new(0x1008), 0x7f00_1234_5670_u64 | 2).unwrap();

        let slot = TaggedSlot::read(&memory, Address::new(0x1008)).unwrap();
        assert_eq!(slot.tag(), 2);
        assert_eq!(slot.pointer(), Address::new(0x7f00_1234_5670));
        assert!(matches!(
            slot.unsupported("Test::m_union"),
            LensError::UnionTagUnsupported { tag: 2, union: "Test::m_union", .. }
        ));
    }
}
