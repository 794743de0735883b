//! Tests for symbol resolution

use hostlens_core::error::LensError;
use hostlens_core::image::ModuleImage;
use hostlens_core::symbols::{MapSymbolStore, SymbolKind, SymbolRecord, SymbolResolver};
use hostlens_core::types::{Address, Rva};

fn resolver() -> SymbolResolver
{
    let image = ModuleImage::from_parts("libcoreclr.so", Address::new(0x7f00_0000), 0x10000, Vec::new());
    let mut store = MapSymbolStore::from_pairs([
        ("MethodTable::GetModule", Rva::new(0x1200)),
        ("MethodTable::GetNumInstanceFieldBytes", Rva::new(0x1100)),
        ("MethodDesc::GetName", Rva::new(0x2000)),
        ("_ZN11MethodTable13GetParentTypeEv", Rva::new(0x1300)),
    ]);
    store.insert(SymbolRecord::data("g_pStringClass", Rva::new(0x8000)));
    SymbolResolver::with_store(store, &image)
}

#[test]
fn test_resolve_adds_module_base()
{
    let resolver = resolver();
    assert_eq!(resolver.resolve("MethodTable::GetModule").unwrap(), Address::new(0x7f00_1200));
    assert!(matches!(
        resolver.resolve("MethodTable::GetModules"),
        Err(LensError::SymbolNotFound(name)) if name == "MethodTable::GetModules"
    ));
}

#[test]
fn test_mangled_name_resolves_by_qualified_form()
{
    let resolver = resolver();
    assert_eq!(resolver.resolve("MethodTable::GetParentType").unwrap(), Address::new(0x7f00_1300));
    assert_eq!(
        resolver.resolve("_ZN11MethodTable13GetParentTypeEv").unwrap(),
        Address::new(0x7f00_1300)
    );
}

#[test]
fn test_enumerate_matching()
{
    let resolver = resolver();
    let names: Vec<_> = resolver
        .enumerate_matching("MethodTable::Get*")
        .unwrap()
        .into_iter()
        .map(|record| record.name)
        .collect();
    // Ascending by address
    assert_eq!(
        names,
        [
            "MethodTable::GetNumInstanceFieldBytes",
            "MethodTable::GetModule",
            "MethodTable::GetParentType",
        ]
    );
    assert_eq!(resolver.enumerate_matching("MethodDesc::GetNam?").unwrap().len(), 1);
    assert!(resolver.enumerate_matching("Nothing*").unwrap().is_empty());
}

#[test]
fn test_search_is_case_sensitive()
{
    let resolver = resolver();
    assert_eq!(resolver.search("GetName").len(), 1);
    assert!(resolver.search("getname").is_empty());
    let global = resolver.search("StringClass");
    assert_eq!(global[0].kind, SymbolKind::Data);
}

#[test]
fn test_symbol_at_reverse_lookup()
{
    let resolver = resolver();
    let (record, offset) = resolver.symbol_at(Address::new(0x7f00_1200)).unwrap();
    assert_eq!(record.name, "MethodTable::GetModule");
    assert_eq!(offset, 0);
    // Unknown size covers the start only
    assert!(resolver.symbol_at(Address::new(0x7f00_1210)).is_none());
    assert!(resolver.symbol_at(Address::new(0x7f00_0010)).is_none());
    assert!(resolver.symbol_at(Address::new(0x10)).is_none());
}

#[test]
fn test_missing_symbol_file()
{
    let image = ModuleImage::from_parts("libcoreclr.so", Address::new(0x1000), 0x1000, Vec::new());
    assert!(matches!(
        SymbolResolver::initialize("/nonexistent/libcoreclr.so.dbg", &image),
        Err(LensError::SymbolStoreLoad { .. })
    ));
}

#[cfg(target_os = "linux")]
mod in_process
{
    use hostlens_core::image::ModuleImage;
    use hostlens_core::platform::linux::ProcMapsProvider;
    use hostlens_core::symbols::SymbolResolver;
    use hostlens_core::types::Address;

    #[no_mangle]
    pub extern "C" fn hostlens_symbol_probe() -> usize
    {
        0x5a
    }

    #[test]
    fn test_resolves_own_symbols()
    {
        let exe = std::env::current_exe().unwrap();
        let name = exe.file_name().unwrap().to_string_lossy().into_owned();
        let image = ModuleImage::load(&ProcMapsProvider::current(), &name).unwrap();
        let resolver = SymbolResolver::initialize(&exe, &image).unwrap();

        let expected = Address::from(hostlens_symbol_probe as extern "C" fn() -> usize as usize);
        assert_eq!(resolver.resolve("hostlens_symbol_probe").unwrap(), expected);
        assert!(image.contains(expected));
        assert_eq!(resolver.symbol_at(expected).unwrap().1, 0);
    }
}
