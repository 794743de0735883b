//! # Signature Scanning
//!
//! Locates non-exported functions by matching a byte pattern against the
//! executable sections of a module.
//!
//! Patterns are written the way reverse engineers copy them out of a
//! disassembler: whitespace-separated hex bytes, with `?` or `??` for bytes
//! that vary between builds (relocated displacements, register choices).
//!
//! ```text
//! 48 89 5C 24 ?? 57 48 83 EC 20 8B 41 ??
//! ```
//!
//! The first match in increasing address order is authoritative. Patterns are
//! expected to be unique prologues; a pattern that matches twice is a mistake
//! in the pattern, not something the scanner tries to arbitrate.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use crate::error::{LensError, Result};
use crate::image::ModuleImage;
use crate::memory::{MemoryAccess, MemoryExt};
use crate::types::{Address, Section};

/// A parsed byte pattern; `None` elements are wildcards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature
{
    bytes: SmallVec<[Option<u8>; 32]>,
}

impl Signature
{
    /// Parse the textual form
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::InvalidSignature`] for tokens that are neither a
    /// two-digit hex byte nor `?`/`??`, and for patterns without a single
    /// concrete byte (they would match everywhere).
    pub fn parse(pattern: &str) -> Result<Self>
    {
        let invalid = |reason: String| LensError::InvalidSignature {
            pattern: pattern.to_string(),
            reason,
        };

        let mut bytes = SmallVec::new();
        for token in pattern.split_whitespace() {
            match token {
                "?" | "??" => bytes.push(None),
                hex if hex.len() == 2 && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
                    let byte = u8::from_str_radix(hex, 16).map_err(|_| invalid(format!("bad byte `{hex}`")))?;
                    bytes.push(Some(byte));
                }
                other => return Err(invalid(format!("bad token `{other}`"))),
            }
        }

        if bytes.is_empty() {
            return Err(invalid("empty pattern".to_string()));
        }
        if bytes.iter().all(Option::is_none) {
            return Err(invalid("pattern has no concrete bytes".to_string()));
        }
        Ok(Self { bytes })
    }

    /// Build from already-split elements
    pub fn from_elements(elements: &[Option<u8>]) -> Self
    {
        Self {
            bytes: elements.iter().copied().collect(),
        }
    }

    /// Number of bytes the pattern spans
    pub fn len(&self) -> usize
    {
        self.bytes.len()
    }

    /// Whether the pattern is empty
    pub fn is_empty(&self) -> bool
    {
        self.bytes.is_empty()
    }

    /// Whether the pattern matches at the start of `window`
    pub fn matches(&self, window: &[u8]) -> bool
    {
        window.len() >= self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(window)
                .all(|(expected, actual)| expected.map_or(true, |byte| byte == *actual))
    }

    /// Offset of the first match in `haystack`
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize>
    {
        self.find_all_in(haystack).next()
    }

    /// Offsets of every match in `haystack`, ascending
    pub fn find_all_in<'a>(&'a self, haystack: &'a [u8]) -> impl Iterator<Item = usize> + 'a
    {
        // Anchor on the first concrete byte to skip most candidates cheaply.
        let anchor = self
            .bytes
            .iter()
            .enumerate()
            .find_map(|(index, byte)| byte.map(|b| (index, b)));
        let last_start = haystack.len().checked_sub(self.bytes.len());

        (0..=last_start.unwrap_or(0))
            .filter(move |_| last_start.is_some())
            .filter(move |&start| anchor.map_or(true, |(index, byte)| haystack[start + index] == byte))
            .filter(move |&start| self.matches(&haystack[start..]))
    }
}

impl FromStr for Signature
{
    type Err = LensError;

    fn from_str(s: &str) -> Result<Self>
    {
        Self::parse(s)
    }
}

impl fmt::Display for Signature
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        for (index, byte) in self.bytes.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            match byte {
                Some(byte) => write!(f, "{byte:02X}")?,
                None => f.write_str("??")?,
            }
        }
        Ok(())
    }
}

/// Scans module code through a memory accessor
#[derive(Clone)]
pub struct SignatureScanner
{
    memory: Arc<dyn MemoryAccess>,
}

impl SignatureScanner
{
    /// Scanner reading module bytes through `memory`
    pub fn new(memory: Arc<dyn MemoryAccess>) -> Self
    {
        Self { memory }
    }

    /// First match of `signature` in the executable sections of `module`
    ///
    /// ## Errors
    ///
    /// - [`LensError::SignatureNotFound`] if no executable section contains it
    /// - memory errors if a section cannot be read
    pub fn scan(&self, module: &ModuleImage, signature: &Signature) -> Result<Address>
    {
        for section in module.executable_sections() {
            let bytes = self.section_bytes(module, section)?;
            if let Some(offset) = signature.find_in(&bytes) {
                let address = module.rva_to_absolute(section.virtual_address) + offset as u64;
                debug!(module = module.name(), section = %section.name, %address, "signature matched");
                return Ok(address);
            }
        }

        Err(LensError::SignatureNotFound {
            module: module.name().to_string(),
            signature: signature.to_string(),
        })
    }

    /// Every match of `signature`, ascending
    ///
    /// Useful when authoring a pattern to confirm it is unique.
    ///
    /// ## Errors
    ///
    /// Memory errors if a section cannot be read. No matches is an empty vector.
    pub fn scan_all(&self, module: &ModuleImage, signature: &Signature) -> Result<Vec<Address>>
    {
        let mut found = Vec::new();
        for section in module.executable_sections() {
            let bytes = self.section_bytes(module, section)?;
            let start = module.rva_to_absolute(section.virtual_address);
            found.extend(signature.find_all_in(&bytes).map(|offset| start + offset as u64));
        }
        Ok(found)
    }

    fn section_bytes(&self, module: &ModuleImage, section: &Section) -> Result<Vec<u8>>
    {
        let start = module.rva_to_absolute(section.virtual_address);
        let len = usize::try_from(section.size).map_err(|_| LensError::InvalidMemoryAccess { address: start, len: 0 })?;
        debug!(module = module.name(), section = %section.name, %start, len, "scanning section");
        self.memory.read_bytes(start, len)
    }
}
