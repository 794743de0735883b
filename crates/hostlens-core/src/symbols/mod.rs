//! # Symbol Resolution
//!
//! Maps fully-qualified names to addresses in a loaded module using whatever
//! symbols its image file carries.
//!
//! ## Architecture
//!
//! - [`SymbolStore`] is the name → RVA capability. [`FileSymbolStore`] reads
//!   the ELF/Mach-O/PE symbol tables and DWARF; [`MapSymbolStore`] serves a
//!   prepared table.
//! - [`SymbolResolver`] pairs a store with a module base, turning RVAs into
//!   absolute addresses, and caches the full enumeration for wildcard and
//!   substring searches.
//!
//! Names are the demangled, parameterless path: `MethodTable::GetModule`, not
//! `_ZNK11MethodTable9GetModuleEv`. The raw linkage name is an alias.

pub mod demangle;
mod dwarf;
mod store;

use std::fmt;
use std::path::Path;

use once_cell::sync::OnceCell;
use tracing::debug;

pub use self::store::{FileSymbolStore, MapSymbolStore};
use crate::error::{LensError, Result};
use crate::image::ModuleImage;
use crate::types::{Address, Rva};

/// What a symbol names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind
{
    Function,
    Data,
    Unknown,
}

/// Where a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolSource
{
    /// `.symtab` / `.dynsym` / COFF / Mach-O nlist
    SymbolTable,
    /// `DW_TAG_subprogram` or `DW_TAG_variable`
    Dwarf,
    /// Supplied by the caller
    Manual,
}

/// One named location in a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRecord
{
    /// Qualified name, `Scope::Name`
    pub name: String,
    /// Name as stored in the image (mangled, if it was)
    pub raw_name: String,
    pub rva: Rva,
    /// Extent in bytes, zero when unknown
    pub size: u64,
    pub kind: SymbolKind,
    pub source: SymbolSource,
}

impl SymbolRecord
{
    /// A manually supplied function record
    ///
    /// `name` may be mangled; the qualified form is derived from it.
    pub fn function(name: impl Into<String>, rva: Rva) -> Self
    {
        Self::manual(name, rva, SymbolKind::Function)
    }

    /// A manually supplied data record
    pub fn data(name: impl Into<String>, rva: Rva) -> Self
    {
        Self::manual(name, rva, SymbolKind::Data)
    }

    fn manual(name: impl Into<String>, rva: Rva, kind: SymbolKind) -> Self
    {
        let raw_name = name.into();
        Self {
            name: demangle::qualified_name(&raw_name).unwrap_or_else(|| raw_name.clone()),
            raw_name,
            rva,
            size: 0,
            kind,
            source: SymbolSource::Manual,
        }
    }

    /// Whether `rva` falls inside this symbol
    ///
    /// Symbols of unknown size only cover their own start.
    pub fn covers(&self, rva: Rva) -> bool
    {
        match rva.value().checked_sub(self.rva.value()) {
            Some(0) => true,
            Some(offset) => offset < self.size,
            None => false,
        }
    }
}

impl fmt::Display for SymbolRecord
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} {}", self.rva, self.name)
    }
}

/// A debug-symbol lookup capability
pub trait SymbolStore: Send + Sync
{
    /// The record for an exact qualified or raw name
    fn lookup(&self, name: &str) -> Option<SymbolRecord>;

    /// Every record in the store
    ///
    /// Called at most once per [`SymbolResolver`]; may be expensive.
    fn symbols(&self) -> Vec<SymbolRecord>;
}

/// Name → absolute address resolution for one module
pub struct SymbolResolver
{
    store: Box<dyn SymbolStore>,
    module: String,
    base: Address,
    /// Full enumeration, sorted by RVA
    cache: OnceCell<Vec<SymbolRecord>>,
}

impl SymbolResolver
{
    /// Open the symbols in `image_file` for `module`
    ///
    /// `image_file` is usually the module's own path, or a separate debug file.
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::SymbolStoreLoad`] if the file cannot be read,
    /// parsed, or carries no symbols.
    pub fn initialize(image_file: impl AsRef<Path>, module: &ModuleImage) -> Result<Self>
    {
        let store = FileSymbolStore::open(image_file)?;
        Ok(Self::with_store(store, module))
    }

    /// Resolve through an arbitrary store against `module`'s base
    pub fn with_store(store: impl SymbolStore + 'static, module: &ModuleImage) -> Self
    {
        Self {
            store: Box::new(store),
            module: module.name().to_string(),
            base: module.base(),
            cache: OnceCell::new(),
        }
    }

    /// Base the RVAs are added to
    pub fn base(&self) -> Address
    {
        self.base
    }

    /// RVA of `name`
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::SymbolNotFound`] if the store has no such name.
    pub fn resolve_rva(&self, name: &str) -> Result<Rva>
    {
        self.store
            .lookup(name)
            .map(|record| record.rva)
            .ok_or_else(|| LensError::SymbolNotFound(name.to_string()))
    }

    /// Absolute address of `name`
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::SymbolNotFound`] if the store has no such name.
    pub fn resolve(&self, name: &str) -> Result<Address>
    {
        let rva = self.resolve_rva(name)?;
        let address = self.base + rva.value();
        debug!(module = %self.module, name, %rva, %address, "resolved symbol");
        Ok(address)
    }

    /// Every symbol, sorted by RVA
    ///
    /// The store is enumerated on first use only.
    pub fn all(&self) -> &[SymbolRecord]
    {
        self.cache.get_or_init(|| {
            let mut records = self.store.symbols();
            records.sort_by(|a, b| a.rva.cmp(&b.rva).then_with(|| a.name.cmp(&b.name)));
            debug!(module = %self.module, count = records.len(), "enumerated symbols");
            records
        })
    }

    /// Symbols whose qualified name matches a glob (`*`, `?`, `[...]`)
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::InvalidPattern`] if `pattern` is not a valid glob.
    pub fn enumerate_matching(&self, pattern: &str) -> Result<Vec<SymbolRecord>>
    {
        let glob = glob::Pattern::new(pattern).map_err(|err| LensError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: err.msg.to_string(),
        })?;
        Ok(self
            .all()
            .iter()
            .filter(|record| glob.matches(&record.name))
            .cloned()
            .collect())
    }

    /// Symbols whose qualified name contains `needle` (case-sensitive)
    pub fn search(&self, needle: &str) -> Vec<SymbolRecord>
    {
        self.all()
            .iter()
            .filter(|record| record.name.contains(needle))
            .cloned()
            .collect()
    }

    /// Symbol covering `address`, with the offset into it
    pub fn symbol_at(&self, address: Address) -> Option<(&SymbolRecord, u64)>
    {
        let rva = Rva::new(address.offset_from(self.base)?);
        let records = self.all();
        let after = records.partition_point(|record| record.rva <= rva);
        records[..after]
            .iter()
            .rev()
            .take_while(|record| record.rva == records[after - 1].rva)
            .find(|record| record.covers(rva))
            .map(|record| (record, rva.value() - record.rva.value()))
    }
}

impl fmt::Debug for SymbolResolver
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("SymbolResolver")
            .field("module", &self.module)
            .field("base", &self.base)
            .field("cached", &self.cache.get().map(Vec::len))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests
{
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::types::{Section, SectionCharacteristics};

    fn module() -> ModuleImage
    {
        ModuleImage::from_parts(
            "/opt/dotnet/libcoreclr.so",
            Address::new(0x7f00_0000_0000),
            0x10_0000,
            vec![Section::new(
                ".text",
                Rva::new(0x1000),
                0x8000,
                SectionCharacteristics::CODE | SectionCharacteristics::EXECUTE,
            )],
        )
    }

    struct CountingStore
    {
        inner: MapSymbolStore,
        enumerations: Arc<AtomicUsize>,
    }

    impl SymbolStore for CountingStore
    {
        fn lookup(&self, name: &str) -> Option<SymbolRecord>
        {
            self.inner.lookup(name)
        }

        fn symbols(&self) -> Vec<SymbolRecord>
        {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            self.inner.symbols()
        }
    }

    #[test]
    fn test_resolve_adds_base()
    {
        let store = MapSymbolStore::from_pairs([("MethodTable::GetModule", Rva::new(0x1234))]);
        let resolver = SymbolResolver::with_store(store, &module());
        assert_eq!(resolver.resolve("MethodTable::GetModule").unwrap(), Address::new(0x7f00_0000_1234));
        assert!(matches!(
            resolver.resolve("MethodTable::GetLoaderModule"),
            Err(LensError::SymbolNotFound(name)) if name == "MethodTable::GetLoaderModule"
        ));
    }

    #[test]
    fn test_enumeration_is_cached()
    {
        let enumerations = Arc::new(AtomicUsize::new(0));
        let store = CountingStore {
            inner: MapSymbolStore::from_pairs([
                ("MethodTable::GetModule", Rva::new(0x1000)),
                ("MethodTable::GetNumInstanceFieldBytes", Rva::new(0x1100)),
                ("MethodDesc::SizeOf", Rva::new(0x1200)),
            ]),
            enumerations: Arc::clone(&enumerations),
        };
        let resolver = SymbolResolver::with_store(store, &module());

        assert_eq!(resolver.enumerate_matching("MethodTable::*").unwrap().len(), 2);
        assert_eq!(resolver.enumerate_matching("*::SizeO?").unwrap().len(), 1);
        assert_eq!(resolver.search("Get").len(), 2);
        assert_eq!(enumerations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_glob()
    {
        let resolver = SymbolResolver::with_store(MapSymbolStore::new(), &module());
        assert!(matches!(
            resolver.enumerate_matching("MethodTable::[*"),
            Err(LensError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_symbol_at()
    {
        let mut store = MapSymbolStore::new();
        let mut sized = SymbolRecord::function("MethodDesc::SizeOf", Rva::new(0x2000));
        sized.size = 0x40;
        store.insert(sized);
        store.insert(SymbolRecord::data("g_pStringClass", Rva::new(0x3000)));
        let resolver = SymbolResolver::with_store(store, &module());
        let base = resolver.base();

        let (record, offset) = resolver.symbol_at(base + 0x2010).unwrap();
        assert_eq!(record.name, "MethodDesc::SizeOf");
        assert_eq!(offset, 0x10);

        assert!(resolver.symbol_at(base + 0x2040).is_none());
        assert_eq!(resolver.symbol_at(base + 0x3000).unwrap().0.name, "g_pStringClass");
        assert!(resolver.symbol_at(base + 0x3001).is_none());
        assert!(resolver.symbol_at(Address::new(0x10)).is_none());
    }
}
