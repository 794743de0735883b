//! Concrete symbol stores.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use object::{Object, ObjectSymbol};
use tracing::{debug, info};

use super::demangle::qualified_name;
use super::{dwarf, SymbolKind, SymbolRecord, SymbolSource, SymbolStore};
use crate::error::{LensError, Result};
use crate::image::link_base;
use crate::types::Rva;

/// Records plus a name index over both qualified and raw names
///
/// The first record inserted under a name keeps it.
#[derive(Debug, Default, Clone)]
struct SymbolIndex
{
    records: Vec<SymbolRecord>,
    by_name: HashMap<String, usize>,
}

impl SymbolIndex
{
    fn insert(&mut self, record: SymbolRecord)
    {
        let index = self.records.len();
        let mut fresh = false;
        for key in [&record.name, &record.raw_name] {
            if !self.by_name.contains_key(key) {
                self.by_name.insert(key.clone(), index);
                fresh = true;
            }
        }
        // Same definition seen again (DWARF after symtab): keep one record.
        if fresh {
            self.records.push(record);
        }
    }

    fn lookup(&self, name: &str) -> Option<SymbolRecord>
    {
        self.by_name.get(name).map(|&index| self.records[index].clone())
    }
}

/// Symbols of one image file: symbol tables first, then DWARF
#[derive(Debug)]
pub struct FileSymbolStore
{
    path: PathBuf,
    index: SymbolIndex,
}

impl FileSymbolStore
{
    /// Parse `path` and index every named, defined symbol
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::SymbolStoreLoad`] if the file is missing,
    /// unparseable, has malformed debug info, or yields no symbols at all.
    pub fn open(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        let load_error = |reason: String| LensError::SymbolStoreLoad {
            path: path.display().to_string(),
            reason,
        };

        let bytes = fs::read(path).map_err(|err| load_error(err.to_string()))?;
        let file = object::File::parse(&*bytes).map_err(|err| load_error(err.to_string()))?;
        let relative_base = link_base(&file);

        let mut index = SymbolIndex::default();
        let mut table_count = 0usize;
        for symbol in file.symbols().chain(file.dynamic_symbols()) {
            if let Some(record) = table_record(&symbol, relative_base) {
                index.insert(record);
                table_count += 1;
            }
        }

        let debug_records = dwarf::collect(path, &file)?;
        let debug_count = debug_records.len();
        for record in debug_records {
            index.insert(record);
        }

        if index.records.is_empty() {
            return Err(load_error("no symbols".to_string()));
        }
        info!(
            path = %path.display(),
            table = table_count,
            dwarf = debug_count,
            indexed = index.records.len(),
            "opened symbol store"
        );
        Ok(Self {
            path: path.to_path_buf(),
            index,
        })
    }

    /// Path of the image the symbols came from
    pub fn path(&self) -> &Path
    {
        &self.path
    }
}

fn table_record<'data, S: ObjectSymbol<'data>>(symbol: &S, relative_base: u64) -> Option<SymbolRecord>
{
    if symbol.is_undefined() {
        return None;
    }
    let kind = match symbol.kind() {
        object::SymbolKind::Text => SymbolKind::Function,
        object::SymbolKind::Data | object::SymbolKind::Tls => SymbolKind::Data,
        object::SymbolKind::Unknown => SymbolKind::Unknown,
        _ => return None,
    };
    let raw = symbol.name().ok().filter(|name| !name.is_empty())?;
    let rva = symbol.address().checked_sub(relative_base)?;
    if symbol.address() == 0 {
        return None;
    }
    Some(SymbolRecord {
        name: qualified_name(raw).unwrap_or_else(|| raw.to_string()),
        raw_name: raw.to_string(),
        rva: Rva::new(rva),
        size: symbol.size(),
        kind,
        source: SymbolSource::SymbolTable,
    })
}

impl SymbolStore for FileSymbolStore
{
    fn lookup(&self, name: &str) -> Option<SymbolRecord>
    {
        self.index.lookup(name)
    }

    fn symbols(&self) -> Vec<SymbolRecord>
    {
        self.index.records.clone()
    }
}

/// An in-memory store for prepared tables
///
/// ```rust
/// use hostlens_core::symbols::{MapSymbolStore, SymbolStore};
/// use hostlens_core::types::Rva;
///
/// let store = MapSymbolStore::from_pairs([("MethodTable::GetModule", Rva::new(0x1200))]);
/// assert_eq!(store.lookup("MethodTable::GetModule").unwrap().rva, Rva::new(0x1200));
/// ```
#[derive(Debug, Default, Clone)]
pub struct MapSymbolStore
{
    index: SymbolIndex,
}

impl MapSymbolStore
{
    /// An empty store
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Store holding `(name, rva)` pairs as functions
    ///
    /// Mangled names are indexed under their qualified form too.
    pub fn from_pairs<N: Into<String>>(pairs: impl IntoIterator<Item = (N, Rva)>) -> Self
    {
        let mut store = Self::new();
        for (name, rva) in pairs {
            store.insert(SymbolRecord::function(name, rva));
        }
        store
    }

    /// Add a record
    pub fn insert(&mut self, record: SymbolRecord)
    {
        debug!(name = %record.name, rva = %record.rva, "indexed symbol");
        self.index.insert(record);
    }

    /// Number of distinct records
    pub fn len(&self) -> usize
    {
        self.index.records.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool
    {
        self.index.records.is_empty()
    }
}

impl SymbolStore for MapSymbolStore
{
    fn lookup(&self, name: &str) -> Option<SymbolRecord>
    {
        self.index.lookup(name)
    }

    fn symbols(&self) -> Vec<SymbolRecord>
    {
        self.index.records.clone()
    }
}
