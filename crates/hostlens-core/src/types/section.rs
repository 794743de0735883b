//! Section table entries of a loaded image.

use std::fmt;

use bitflags::bitflags;

use super::Rva;

bitflags! {
    /// Normalised section characteristics
    ///
    /// PE `IMAGE_SCN_*` bits, ELF `SHF_*` flags and Mach-O section kinds are
    /// all folded into this one set so the scanner can ask a single question:
    /// "is this executable?".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SectionCharacteristics: u32 {
        /// Contains executable code
        const CODE = 0x0000_0020;
        /// Contains initialized data
        const INITIALIZED_DATA = 0x0000_0040;
        /// Contains uninitialized data (bss)
        const UNINITIALIZED_DATA = 0x0000_0080;
        /// Mapped executable
        const EXECUTE = 0x2000_0000;
        /// Mapped readable
        const READ = 0x4000_0000;
        /// Mapped writable
        const WRITE = 0x8000_0000;
    }
}

impl SectionCharacteristics
{
    /// Fold PE/COFF `IMAGE_SCN_*` characteristics into the normalised set
    ///
    /// The normalised bit values deliberately coincide with the COFF ones, so
    /// this is a truncating conversion.
    pub fn from_coff(characteristics: u32) -> Self
    {
        Self::from_bits_truncate(characteristics)
    }

    /// Fold ELF `SHF_*` flags into the normalised set
    pub fn from_elf(sh_flags: u64, is_nobits: bool) -> Self
    {
        const SHF_WRITE: u64 = 0x1;
        const SHF_ALLOC: u64 = 0x2;
        const SHF_EXECINSTR: u64 = 0x4;

        let mut flags = Self::empty();
        if sh_flags & SHF_ALLOC != 0 {
            flags |= Self::READ;
        }
        if sh_flags & SHF_WRITE != 0 {
            flags |= Self::WRITE;
        }
        if sh_flags & SHF_EXECINSTR != 0 {
            flags |= Self::EXECUTE | Self::CODE;
        } else if is_nobits {
            flags |= Self::UNINITIALIZED_DATA;
        } else if sh_flags & SHF_ALLOC != 0 {
            flags |= Self::INITIALIZED_DATA;
        }
        flags
    }
}

/// One entry of a module's section table
///
/// Addresses are stored as RVAs; the owning [`crate::image::ModuleImage`]
/// turns them into absolute addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section
{
    /// Section name (`.text`, `__text`, ...)
    pub name: String,
    /// Start of the section relative to the module base
    pub virtual_address: Rva,
    /// Mapped size in bytes
    pub size: u64,
    /// Normalised protection / content flags
    pub characteristics: SectionCharacteristics,
}

impl Section
{
    /// Create a section entry
    pub fn new(name: impl Into<String>, virtual_address: Rva, size: u64, characteristics: SectionCharacteristics) -> Self
    {
        Self {
            name: name.into(),
            virtual_address,
            size,
            characteristics,
        }
    }

    /// End of the section (exclusive), as an RVA
    pub fn end(&self) -> Rva
    {
        self.virtual_address + self.size
    }

    /// Whether `rva` falls in `[start, start + size)`
    pub fn contains(&self, rva: Rva) -> bool
    {
        rva >= self.virtual_address && rva < self.end()
    }

    /// Whether the scanner should look at this section
    pub fn is_executable(&self) -> bool
    {
        self.characteristics
            .intersects(SectionCharacteristics::EXECUTE | SectionCharacteristics::CODE)
    }
}

impl fmt::Display for Section
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(
            f,
            "{:<12} {}..{} ({:#x} bytes, {:?})",
            self.name,
            self.virtual_address,
            self.end(),
            self.size,
            self.characteristics
        )
    }
}
