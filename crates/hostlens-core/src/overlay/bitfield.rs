//! Fixed and packed bitfields.
//!
//! ## Fixed
//!
//! C bitfields inside a 32-bit word, allocated from the least significant bit
//! (what MSVC, GCC and Clang all do on little-endian targets).
//!
//! ## Packed
//!
//! A bit vector of logical fields, each prefixed with its own length:
//!
//! ```text
//! | len-1 (5 bits) | value (len bits) | len-1 (5 bits) | value (len bits) | ...
//! ```
//!
//! The stream starts at the most significant bit of the first 32-bit word and
//! runs on into the next word, so a field may straddle two words. The high
//! part of a straddling field sits at the end of the first word:
//!
//! ```text
//! word 0: 11001 11111111111111111111111111 0   word 1: 0010 101 0000...
//!         ^ bit 31                           ^ bit 0       ^ bit 31
//!
//! field 0 = 0x3ffffff (26 bits); field 1's length prefix 00010 is split
//! 0 | 0010 across the boundary, then its value 101 follows.
//! ```
//!
//! Small counts take 6 bits instead of 32. There is no index: reaching field
//! `n` means walking the `n` fields before it.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{LensError, Result};

/// A `(shift, width)` slice of a `u32`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bits
{
    pub shift: u8,
    pub width: u8,
}

impl Bits
{
    pub const fn new(shift: u8, width: u8) -> Self
    {
        Self { shift, width }
    }

    /// `self` if the slice is non-empty and lies inside a `u32`
    ///
    /// ## Errors
    ///
    /// [`LensError::InvalidLayout`] naming `field` otherwise.
    pub fn check(self, field: &'static str) -> Result<Self>
    {
        if self.width == 0 || u32::from(self.shift) + u32::from(self.width) > WORD_BITS {
            return Err(LensError::InvalidLayout {
                field,
                reason: format!("shift {} + width {} does not fit 32 bits", self.shift, self.width),
            });
        }
        Ok(self)
    }

    /// Mask of the slice, in place
    pub const fn mask(self) -> u32
    {
        low_mask(self.width as u32) << self.shift
    }

    pub const fn extract(self, word: u32) -> u32
    {
        (word >> self.shift) & low_mask(self.width as u32)
    }

    /// `word` with the slice replaced by `value`; excess high bits of `value` are dropped
    pub const fn insert(self, word: u32, value: u32) -> u32
    {
        (word & !self.mask()) | ((value << self.shift) & self.mask())
    }
}

const fn low_mask(width: u32) -> u32
{
    if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

/// Bits of the length prefix of each packed field
pub const LENGTH_BITS: u32 = 5;

const WORD_BITS: u32 = 32;

/// Reader over a packed (or plain) array of `u32` fields
///
/// ```rust
/// use hostlens_core::overlay::PackedBitVector;
///
/// let words = PackedBitVector::pack(&[3, 0, 1000]).unwrap();
/// let vector = PackedBitVector::new(&words, 3, true);
/// assert_eq!(vector.get(2).unwrap(), 1000);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PackedBitVector<'a>
{
    words: &'a [u32],
    count: usize,
    packed: bool,
}

impl<'a> PackedBitVector<'a>
{
    /// `count` logical fields stored in `words`
    ///
    /// When `packed` is false the words are a plain array, one field each.
    pub fn new(words: &'a [u32], count: usize, packed: bool) -> Self
    {
        Self { words, count, packed }
    }

    /// Logical field `index`
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::FieldIndexOutOfRange`] for `index >= count`, and
    /// when the encoded lengths run past the end of the words.
    pub fn get(&self, index: usize) -> Result<u32>
    {
        let out_of_range = || LensError::FieldIndexOutOfRange {
            index,
            count: self.count,
        };
        if index >= self.count {
            return Err(out_of_range());
        }
        if !self.packed {
            return self.words.get(index).copied().ok_or_else(out_of_range);
        }

        let mut offset = 0u32;
        for _ in 0..index {
            let length = self.bits_at(offset, LENGTH_BITS).ok_or_else(out_of_range)? + 1;
            offset += LENGTH_BITS + length;
        }
        let length = self.bits_at(offset, LENGTH_BITS).ok_or_else(out_of_range)? + 1;
        self.bits_at(offset + LENGTH_BITS, length).ok_or_else(out_of_range)
    }

    /// Every logical field, in order
    ///
    /// ## Errors
    ///
    /// As for [`PackedBitVector::get`].
    pub fn values(&self) -> Result<SmallVec<[u32; 16]>>
    {
        (0..self.count).map(|index| self.get(index)).collect()
    }

    /// `length` bits (1..=32) starting at stream bit `offset`, most significant first
    fn bits_at(&self, offset: u32, length: u32) -> Option<u32>
    {
        let end = offset.checked_add(length)?;
        if end as usize > self.words.len() * WORD_BITS as usize {
            return None;
        }

        let word = (offset / WORD_BITS) as usize;
        let start = offset % WORD_BITS;
        let head = (WORD_BITS - start).min(length);
        let mut value = (self.words[word] >> (WORD_BITS - start - head)) & low_mask(head);
        let tail = length - head;
        if tail > 0 {
            // High part came from the end of the first word
            value = (value << tail) | (self.words[word + 1] >> (WORD_BITS - tail));
        }
        Some(value)
    }

    /// Encode `values` into as many words as there are values
    ///
    /// Returns `None` when the encoding does not fit; such a structure keeps
    /// its fields unpacked.
    pub fn pack(values: &[u32]) -> Option<Vec<u32>>
    {
        let mut words = vec![0u32; values.len()];
        let capacity = values.len() as u64 * u64::from(WORD_BITS);
        let mut offset = 0u64;

        for &value in values {
            let length = (WORD_BITS - value.leading_zeros()).max(1);
            if offset + u64::from(LENGTH_BITS + length) > capacity {
                return None;
            }
            put_bits(&mut words, offset, LENGTH_BITS, length - 1);
            offset += u64::from(LENGTH_BITS);
            put_bits(&mut words, offset, length, value);
            offset += u64::from(length);
        }
        Some(words)
    }
}

fn put_bits(words: &mut [u32], offset: u64, length: u32, value: u32)
{
    let word = (offset / u64::from(WORD_BITS)) as usize;
    let start = (offset % u64::from(WORD_BITS)) as u32;
    let head = (WORD_BITS - start).min(length);
    let tail = length - head;
    words[word] |= ((value >> tail) & low_mask(head)) << (WORD_BITS - start - head);
    if tail > 0 {
        words[word + 1] |= (value & low_mask(tail)) << (WORD_BITS - tail);
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_bits_extract_insert()
    {
        // 24-bit token, then a 1-bit flag
        let token = Bits::new(0, 24);
        let is_static = Bits::new(24, 1);
        let word = 0x0100_0042;
        assert_eq!(token.extract(word), 0x42);
        assert_eq!(is_static.extract(word), 1);
        assert_eq!(token.insert(word, 0xabcdef), 0x01ab_cdef);
        assert_eq!(is_static.insert(word, 0), 0x0000_0042);
    }

    #[test]
    fn test_bits_check_rejects_overflow()
    {
        assert!(Bits::new(27, 5).check("offset").is_ok());
        assert!(matches!(
            Bits::new(30, 3).check("protection"),
            Err(LensError::InvalidLayout { field: "protection", .. })
        ));
        assert!(Bits::new(40, 1).check("flag").is_err());
        assert!(Bits::new(0, 0).check("empty").is_err());
    }

    #[test]
    fn test_full_width_bits()
    {
        let all = Bits::new(0, 32);
        assert_eq!(all.mask(), u32::MAX);
        assert_eq!(all.extract(0xdead_beef), 0xdead_beef);
    }

    #[test]
    fn test_hand_encoded_vector()
    {
        // 00001 11 | 00000 0, from bit 31 down
        let word = 0b0000_1110_0000_0000_0000_0000_0000_0000;
        let words = [word];
        let vector = PackedBitVector::new(&words, 2, true);
        assert_eq!(vector.get(0).unwrap(), 3);
        assert_eq!(vector.get(1).unwrap(), 0);
    }

    #[test]
    fn test_runtime_encoded_class_counts()
    {
        // Eleven EEClass counts as the runtime lays them out
        let mut words = [0u32; 11];
        words[..3].copy_from_slice(&[0x0c2a_0800, 0x1300_0000, 0x01c0_0000]);
        let vector = PackedBitVector::new(&words, 11, true);
        assert_eq!(vector.values().unwrap().as_slice(), &[2, 5, 1, 0, 0, 24, 0, 0, 0, 0, 3]);
        assert_eq!(PackedBitVector::pack(&[2, 5, 1, 0, 0, 24, 0, 0, 0, 0, 3]).unwrap(), words);
    }

    #[test]
    fn test_hand_encoded_straddle()
    {
        // 11001 + 26 ones end at bit 1; the next prefix 00010 starts at bit 0
        // of word 0 and finishes in word 1, then value 101
        let words = [0xcfff_fffe, 0x2a00_0000];
        let vector = PackedBitVector::new(&words, 2, true);
        assert_eq!(vector.get(0).unwrap(), 0x03ff_ffff);
        assert_eq!(vector.get(1).unwrap(), 5);
        assert_eq!(PackedBitVector::pack(&[0x03ff_ffff, 5]).unwrap(), words);
    }

    #[test]
    fn test_straddling_field()
    {
        let values = [u32::MAX, 0x7fff_ffff, 5];
        let words = PackedBitVector::pack(&values).unwrap();
        let vector = PackedBitVector::new(&words, 3, true);
        assert_eq!(vector.values().unwrap().as_slice(), &values);
    }

    #[test]
    fn test_pack_overflow()
    {
        assert!(PackedBitVector::pack(&[u32::MAX]).is_none());
    }
}
