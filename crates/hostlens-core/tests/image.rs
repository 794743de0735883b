//! Tests for module images, RVA translation and signature scanning

use std::sync::Arc;

use hostlens_core::error::LensError;
use hostlens_core::image::ModuleImage;
use hostlens_core::memory::BufferMemory;
use hostlens_core::platform::{LoadedModule, StaticModuleList};
use hostlens_core::scanner::{Signature, SignatureScanner};
use hostlens_core::types::{Address, Rva, Section, SectionCharacteristics};

const BASE: Address = Address::new(0x40_0000);

fn code() -> SectionCharacteristics
{
    SectionCharacteristics::CODE | SectionCharacteristics::EXECUTE | SectionCharacteristics::READ
}

/// Two code sections around a data section, with a target pattern in each code section
fn synthetic() -> (ModuleImage, Arc<BufferMemory>)
{
    let image = ModuleImage::from_parts(
        "/opt/runtime/libcoreclr.so",
        BASE,
        0x400,
        vec![
            Section::new(".text2", Rva::new(0x300), 0x100, code()),
            Section::new(".data", Rva::new(0x200), 0x100, SectionCharacteristics::READ),
            Section::new(".text", Rva::new(0x100), 0x100, code()),
        ],
    );

    let mut bytes = vec![0xcc_u8; 0x400];
    // Matches only in .data, which is never scanned
    bytes[0x210..0x214].copy_from_slice(&[0x55, 0x48, 0x89, 0xe5]);
    bytes[0x180..0x184].copy_from_slice(&[0x55, 0x48, 0x89, 0xe5]);
    bytes[0x320..0x324].copy_from_slice(&[0x55, 0x48, 0x8b, 0xe5]);
    bytes[0x140..0x143].copy_from_slice(&[0x0f, 0x1f, 0x00]);
    (image, Arc::new(BufferMemory::new(BASE, bytes)))
}

#[test]
fn test_round_trip_translation()
{
    let (image, _) = synthetic();
    for rva in [0x100, 0x1ff, 0x250, 0x3ff] {
        let absolute = image.rva_to_absolute(Rva::new(rva));
        assert_eq!(image.absolute_to_rva(absolute).unwrap(), Rva::new(rva));
    }
}

#[test]
fn test_translation_outside_sections()
{
    let (image, _) = synthetic();
    // Mapped (headers) but in no section
    assert!(image.contains(BASE + 0x10));
    assert!(matches!(
        image.absolute_to_rva(BASE + 0x10),
        Err(LensError::AddressOutOfRange { .. })
    ));
    assert!(image.absolute_to_rva(Address::new(0x1000)).is_err());
    assert!(!image.contains(BASE + 0x400));
}

#[test]
fn test_section_lookup()
{
    let (image, _) = synthetic();
    assert_eq!(image.name(), "libcoreclr.so");
    assert_eq!(image.section(".data").unwrap().virtual_address, Rva::new(0x200));
    assert!(matches!(image.section(".rdata"), Err(LensError::SectionNotFound { section, .. }) if section == ".rdata"));

    let executable: Vec<_> = image.executable_sections().map(|s| s.name.as_str()).collect();
    assert_eq!(executable, [".text", ".text2"]);
}

#[test]
fn test_scan_single_occurrence()
{
    let (image, memory) = synthetic();
    let scanner = SignatureScanner::new(memory);
    let found = scanner.scan(&image, &Signature::parse("0F 1F 00").unwrap()).unwrap();
    assert_eq!(found, BASE + 0x140);
}

#[test]
fn test_scan_returns_lowest_of_two()
{
    let (image, memory) = synthetic();
    let scanner = SignatureScanner::new(memory);
    let signature = Signature::parse("55 48 ?? E5").unwrap();

    assert_eq!(scanner.scan(&image, &signature).unwrap(), BASE + 0x180);
    assert_eq!(scanner.scan_all(&image, &signature).unwrap(), [BASE + 0x180, BASE + 0x320]);
    // Same answer every time
    assert_eq!(scanner.scan(&image, &signature).unwrap(), BASE + 0x180);
}

#[test]
fn test_scan_ignores_data_sections()
{
    let (image, memory) = synthetic();
    let scanner = SignatureScanner::new(memory);
    let signature = Signature::parse("55 48 89 E5").unwrap();
    // .data holds a match at 0x210; only the .text one counts
    assert_eq!(scanner.scan_all(&image, &signature).unwrap(), [BASE + 0x180]);
}

#[test]
fn test_scan_not_found()
{
    let (image, memory) = synthetic();
    let scanner = SignatureScanner::new(memory);
    let result = scanner.scan(&image, &Signature::parse("DE AD BE EF").unwrap());
    assert!(matches!(
        result,
        Err(LensError::SignatureNotFound { ref module, ref signature }) if module == "libcoreclr.so" && signature == "DE AD BE EF"
    ));
}

#[test]
fn test_signature_rejects_all_wildcards()
{
    assert!(matches!(Signature::parse("?? ? ??"), Err(LensError::InvalidSignature { .. })));
    assert!(matches!(Signature::parse(""), Err(LensError::InvalidSignature { .. })));
    assert!(matches!(Signature::parse("4"), Err(LensError::InvalidSignature { .. })));
    // Two characters, but not two hex digits
    assert!(matches!(Signature::parse("48 +F"), Err(LensError::InvalidSignature { .. })));
    assert!(matches!(Signature::parse("-1 C3"), Err(LensError::InvalidSignature { .. })));
}

#[test]
fn test_load_missing_module()
{
    let provider = StaticModuleList::new(vec![LoadedModule {
        name: "libc.so.6".to_string(),
        path: "/lib/libc.so.6".into(),
        base: Address::new(0x1000),
        size: 0x1000,
    }]);
    assert!(matches!(
        ModuleImage::load(&provider, "libcoreclr"),
        Err(LensError::ModuleNotFound(name)) if name == "libcoreclr"
    ));
}
