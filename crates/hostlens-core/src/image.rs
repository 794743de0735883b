//! # Module Images
//!
//! A [`ModuleImage`] is one native binary mapped into the inspected process:
//! where it was loaded and what its section table looks like. Everything that
//! turns a module-relative offset into something callable goes through it.
//!
//! The section table is read once, from the image file on disk, with the
//! `object` crate. Section addresses are stored as RVAs relative to the
//! image's link base, the link-time address of its first mapped byte, so they
//! combine directly with the runtime load base:
//!
//! - PE: the preferred image base
//! - ELF: the page of the lowest `PT_LOAD` segment; zero for shared objects
//!   and position-independent executables, the fixed load address (often
//!   `0x400000`) for `ET_EXEC`
//! - Mach-O: zero, so executables linked above `__PAGEZERO` are not supported
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hostlens_core::image::ModuleImage;
//! use hostlens_core::platform;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>>
//! {
//!     let provider = platform::current_process().expect("no module provider");
//!     let clr = ModuleImage::load(provider.as_ref(), "libcoreclr")?;
//!     let text = clr.section(".text")?;
//!     println!("{} at {}", text.name, clr.rva_to_absolute(text.virtual_address));
//!     Ok(())
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use object::{BinaryFormat, Object, ObjectSection, ObjectSegment, SectionFlags, SectionKind};
use tracing::{debug, info};

use crate::error::{LensError, Result};
use crate::platform::{LoadedModule, ModuleProvider};
use crate::types::{Address, Rva, Section, SectionCharacteristics};

/// Mapping granularity of ELF segments
const ELF_PAGE_SIZE: u64 = 0x1000;

/// A native module loaded in the process, with its section table
///
/// Identity is `(path, base)`. The base never changes once the module is
/// loaded, and the section table is immutable after construction.
#[derive(Debug, Clone)]
pub struct ModuleImage
{
    name: String,
    path: PathBuf,
    base: Address,
    size: u64,
    sections: Vec<Section>,
}

impl ModuleImage
{
    /// Locate `name` in the process module list and read its section table
    ///
    /// ## Errors
    ///
    /// - [`LensError::ModuleNotFound`] if no loaded module answers to `name`
    /// - [`LensError::Io`] if the backing file cannot be read
    /// - [`LensError::ModuleNotFound`] with the parser message if `object`
    ///   cannot make sense of the file
    pub fn load(provider: &dyn ModuleProvider, name: &str) -> Result<Self>
    {
        let module = provider
            .find(name)?
            .ok_or_else(|| LensError::ModuleNotFound(name.to_string()))?;
        Self::from_loaded(module)
    }

    /// Read the section table of an already located module
    ///
    /// ## Errors
    ///
    /// See [`ModuleImage::load`].
    pub fn from_loaded(module: LoadedModule) -> Result<Self>
    {
        let bytes = fs::read(&module.path)?;
        let sections = read_sections(&module.path, &bytes)?;
        info!(
            module = %module.name,
            base = %module.base,
            sections = sections.len(),
            "loaded module image"
        );
        Ok(Self {
            name: module.name,
            path: module.path,
            base: module.base,
            size: module.size,
            sections,
        })
    }

    /// Build an image from an explicit section table
    ///
    /// For synthetic buffers, remote images and tests. Sections are sorted by
    /// RVA so scans run in increasing address order.
    pub fn from_parts(path: impl Into<PathBuf>, base: Address, size: u64, mut sections: Vec<Section>) -> Self
    {
        let path = path.into();
        sections.sort_by_key(|section| section.virtual_address);
        Self {
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            path,
            base,
            size,
            sections,
        }
    }

    /// Short name
    pub fn name(&self) -> &str
    {
        &self.name
    }

    /// Path of the backing image file
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// Load base
    pub fn base(&self) -> Address
    {
        self.base
    }

    /// Size of the mapped range
    pub fn size(&self) -> u64
    {
        self.size
    }

    /// All sections, in increasing RVA order
    pub fn sections(&self) -> &[Section]
    {
        &self.sections
    }

    /// Sections the signature scanner searches
    pub fn executable_sections(&self) -> impl Iterator<Item = &Section>
    {
        self.sections.iter().filter(|section| section.is_executable())
    }

    /// Section by exact name
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::SectionNotFound`] if the section is absent.
    pub fn section(&self, name: &str) -> Result<&Section>
    {
        self.sections
            .iter()
            .find(|section| section.name == name)
            .ok_or_else(|| LensError::SectionNotFound {
                module: self.name.clone(),
                section: name.to_string(),
            })
    }

    /// Section containing `rva`
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::RvaOutOfRange`] if no section covers `rva`.
    pub fn section_for_rva(&self, rva: Rva) -> Result<&Section>
    {
        self.sections
            .iter()
            .find(|section| section.contains(rva))
            .ok_or(LensError::RvaOutOfRange(rva))
    }

    /// `base + rva`
    pub fn rva_to_absolute(&self, rva: Rva) -> Address
    {
        self.base + rva.value()
    }

    /// Inverse of [`ModuleImage::rva_to_absolute`]
    ///
    /// Only defined for addresses that land inside a section.
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::AddressOutOfRange`] for addresses below the base
    /// or outside every section's `[start, start + size)`.
    pub fn absolute_to_rva(&self, address: Address) -> Result<Rva>
    {
        let out_of_range = || LensError::AddressOutOfRange {
            module: self.name.clone(),
            address,
        };
        let rva = Rva::new(address.offset_from(self.base).ok_or_else(out_of_range)?);
        if self.sections.iter().any(|section| section.contains(rva)) {
            Ok(rva)
        } else {
            Err(out_of_range())
        }
    }

    /// Whether `address` lies in the mapped range `[base, base + size)`
    pub fn contains(&self, address: Address) -> bool
    {
        address.offset_from(self.base).is_some_and(|offset| offset < self.size)
    }
}

/// Link-time address the runtime load base corresponds to
///
/// Subtracting it from a linked address (section, symbol, DWARF `low_pc`)
/// gives the RVA.
pub(crate) fn link_base(file: &object::File<'_>) -> u64
{
    match file.format() {
        // The first mapping starts on the page of the lowest PT_LOAD.
        BinaryFormat::Elf => file
            .segments()
            .map(|segment| segment.address())
            .min()
            .map_or(0, |lowest| lowest & !(ELF_PAGE_SIZE - 1)),
        _ => file.relative_address_base(),
    }
}

fn read_sections(path: &Path, bytes: &[u8]) -> Result<Vec<Section>>
{
    let file = object::File::parse(bytes)
        .map_err(|err| LensError::ModuleNotFound(format!("{}: unparseable image: {err}", path.display())))?;
    let relative_base = link_base(&file);

    let mut sections = Vec::new();
    for section in file.sections() {
        let address = section.address();
        let size = section.size();
        // Non-allocated sections (debug info, string tables) have no runtime address.
        if address == 0 || size == 0 {
            continue;
        }
        let Ok(name) = section.name() else {
            continue;
        };
        let Some(rva) = address.checked_sub(relative_base) else {
            continue;
        };
        let characteristics = characteristics_of(section.flags(), section.kind());
        debug!(section = name, rva = %Rva::new(rva), size, "section");
        sections.push(Section::new(name, Rva::new(rva), size, characteristics));
    }

    sections.sort_by_key(|section| section.virtual_address);
    Ok(sections)
}

fn characteristics_of(flags: SectionFlags, kind: SectionKind) -> SectionCharacteristics
{
    match flags {
        SectionFlags::Coff { characteristics } => SectionCharacteristics::from_coff(characteristics),
        SectionFlags::Elf { sh_flags } => SectionCharacteristics::from_elf(sh_flags, kind == SectionKind::UninitializedData),
        _ => match kind {
            SectionKind::Text => {
                SectionCharacteristics::CODE | SectionCharacteristics::EXECUTE | SectionCharacteristics::READ
            }
            SectionKind::Data | SectionKind::Tls => {
                SectionCharacteristics::INITIALIZED_DATA | SectionCharacteristics::READ | SectionCharacteristics::WRITE
            }
            SectionKind::UninitializedData | SectionKind::UninitializedTls => {
                SectionCharacteristics::UNINITIALIZED_DATA | SectionCharacteristics::READ | SectionCharacteristics::WRITE
            }
            SectionKind::ReadOnlyData | SectionKind::ReadOnlyString => {
                SectionCharacteristics::INITIALIZED_DATA | SectionCharacteristics::READ
            }
            _ => SectionCharacteristics::empty(),
        },
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_coff_flags_pass_through()
    {
        // IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ
        let flags = characteristics_of(
            SectionFlags::Coff {
                characteristics: 0x6000_0020,
            },
            SectionKind::Text,
        );
        assert!(flags.contains(SectionCharacteristics::CODE | SectionCharacteristics::EXECUTE));
        assert!(!flags.contains(SectionCharacteristics::WRITE));
    }

    #[test]
    fn test_elf_exec_flags()
    {
        // SHF_ALLOC | SHF_EXECINSTR
        let flags = characteristics_of(SectionFlags::Elf { sh_flags: 0x6 }, SectionKind::Text);
        assert!(flags.contains(SectionCharacteristics::EXECUTE | SectionCharacteristics::READ));

        // SHF_ALLOC | SHF_WRITE, NOBITS
        let bss = characteristics_of(SectionFlags::Elf { sh_flags: 0x3 }, SectionKind::UninitializedData);
        assert!(bss.contains(SectionCharacteristics::UNINITIALIZED_DATA | SectionCharacteristics::WRITE));
        assert!(!bss.contains(SectionCharacteristics::EXECUTE));
    }

    /// Minimal little-endian x86-64 ELF: one `PT_LOAD` at `load`, `.text` a page above it
    fn elf(e_type: u16, load: u64) -> Vec<u8>
    {
        let mut bytes = Vec::with_capacity(0x160);
        // e_ident
        bytes.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        bytes.extend_from_slice(&[0; 8]);
        bytes.extend_from_slice(&e_type.to_le_bytes());
        bytes.extend_from_slice(&62u16.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&(load + 0x1000).to_le_bytes());
        bytes.extend_from_slice(&0x40u64.to_le_bytes()); // e_phoff
        bytes.extend_from_slice(&0xa0u64.to_le_bytes()); // e_shoff
        bytes.extend_from_slice(&0u32.to_le_bytes());
        for half in [64u16, 56, 1, 64, 3, 2] {
            bytes.extend_from_slice(&half.to_le_bytes());
        }

        // PT_LOAD, r-x
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&5u32.to_le_bytes());
        for word in [0u64, load, load, 0x160, 0x2000, 0x1000] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }

        bytes.resize(0x80, 0);
        bytes.extend_from_slice(b"\0.text\0.shstrtab\0");
        bytes.resize(0xa0, 0);

        let mut section = |name: u32, kind: u32, flags: u64, addr: u64, offset: u64, size: u64| {
            bytes.extend_from_slice(&name.to_le_bytes());
            bytes.extend_from_slice(&kind.to_le_bytes());
            for word in [flags, addr, offset, size] {
                bytes.extend_from_slice(&word.to_le_bytes());
            }
            bytes.extend_from_slice(&[0; 8]);
            bytes.extend_from_slice(&1u64.to_le_bytes());
            bytes.extend_from_slice(&0u64.to_le_bytes());
        };
        section(0, 0, 0, 0, 0, 0);
        // .text, SHF_ALLOC | SHF_EXECINSTR
        section(1, 1, 0x6, load + 0x1000, 0, 0x10);
        section(7, 3, 0, 0, 0x80, 17);
        bytes
    }

    #[test]
    fn test_fixed_address_executable_rvas()
    {
        // ET_EXEC linked at 0x400000: RVAs must not include the link address
        let bytes = elf(2, 0x40_0000);
        let file = object::File::parse(&*bytes).unwrap();
        assert_eq!(link_base(&file), 0x40_0000);

        let sections = read_sections(Path::new("a.out"), &bytes).unwrap();
        let text = sections.iter().find(|s| s.name == ".text").unwrap();
        assert_eq!(text.virtual_address, Rva::new(0x1000));

        // Mapped by the kernel at its link address
        let image = ModuleImage::from_parts("a.out", Address::new(0x40_0000), 0x2000, sections);
        let text = image.section(".text").unwrap();
        assert_eq!(image.rva_to_absolute(text.virtual_address), Address::new(0x40_1000));
    }

    #[test]
    fn test_position_independent_rvas()
    {
        let bytes = elf(3, 0);
        let file = object::File::parse(&*bytes).unwrap();
        assert_eq!(link_base(&file), 0);

        let sections = read_sections(Path::new("libcoreclr.so"), &bytes).unwrap();
        assert_eq!(sections[0].virtual_address, Rva::new(0x1000));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_reads_own_executable()
    {
        let exe = std::env::current_exe().unwrap();
        let bytes = fs::read(&exe).unwrap();
        let sections = read_sections(&exe, &bytes).unwrap();
        assert!(sections.iter().any(|s| s.name == ".text" && s.is_executable()));
    }
}
