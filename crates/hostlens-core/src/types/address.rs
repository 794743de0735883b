//! Memory address and relative-address types.

use std::fmt;
use std::ops::{Add, Sub};

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Strongly typed absolute memory address
///
/// This wrapper around `u64` keeps absolute addresses apart from sizes,
/// counts, and module-relative offsets ([`Rva`]). Mixing an RVA with an
/// absolute address is the classic bug of this domain; the two types only
/// meet through [`crate::image::ModuleImage`].
///
/// ## Example
///
/// ```rust
/// use hostlens_core::types::Address;
///
/// let addr = Address::from(0x1000_u64);
/// let next_addr = addr + 0x100; // Add offset
/// assert_eq!(next_addr.value(), 0x1100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, Pod, Zeroable)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// ```rust
    /// use hostlens_core::types::Address;
    ///
    /// const HEAP_BASE: Address = Address::new(0x7fff00000000);
    /// ```
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Address of a live Rust object in this process
    pub fn of<T: ?Sized>(value: &T) -> Self
    {
        Address((value as *const T).cast::<u8>() as usize as u64)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// The address as a native pointer-sized integer
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_usize(self) -> usize
    {
        self.0 as usize
    }

    /// Whether this is the null address
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use hostlens_core::types::Address;
    ///
    /// let addr = Address::from(0x1000_u64);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100_u64)));
    /// assert_eq!(addr.checked_add(u64::MAX), None); // Overflow
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset from this address, checking for underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Distance from `base` to this address, if this address is not below it
    pub fn offset_from(self, base: Address) -> Option<u64>
    {
        self.0.checked_sub(base.0)
    }

    /// Clear the low bits selected by `mask`
    ///
    /// Used for tagged pointers and GC mark bits.
    pub const fn untagged(self, mask: u64) -> Self
    {
        Address(self.0 & !mask)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<usize> for Address
{
    fn from(value: usize) -> Self
    {
        Address(value as u64)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}

/// Relative virtual address: an offset from a module's load base
///
/// RVAs are what symbol stores and section tables speak. They only become
/// usable addresses once combined with the base of the module they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rva(u64);

impl Rva
{
    /// Create an RVA from a raw offset
    pub const fn new(value: u64) -> Self
    {
        Rva(value)
    }

    /// Raw offset value
    pub const fn value(self) -> u64
    {
        self.0
    }
}

impl From<u64> for Rva
{
    fn from(value: u64) -> Self
    {
        Rva(value)
    }
}

impl fmt::Display for Rva
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "+0x{:x}", self.0)
    }
}

impl Add<u64> for Rva
{
    type Output = Rva;

    fn add(self, rhs: u64) -> Self::Output
    {
        Rva(self.0.wrapping_add(rhs))
    }
}
