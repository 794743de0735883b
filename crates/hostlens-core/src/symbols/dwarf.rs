//! DWARF function and variable extraction.
//!
//! Walks every compilation unit depth-first and emits one record per
//! `DW_TAG_subprogram` with a code address and per `DW_TAG_variable` with a
//! static `DW_OP_addr` location. Names are qualified by the enclosing
//! namespace, class, structure and union DIEs; out-of-line member definitions
//! borrow the name of their in-class declaration through `DW_AT_specification`.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use gimli::{
    constants, AttributeValue, DebuggingInformationEntry, Dwarf, EndianArcSlice, Operation, Reader, RunTimeEndian, Unit,
};
use object::{Object, ObjectSection};

use super::demangle::qualified_name;
use super::{SymbolKind, SymbolRecord, SymbolSource};
use crate::error::{LensError, Result};
use crate::image::link_base;
use crate::types::Rva;

type OwnedReader = EndianArcSlice<RunTimeEndian>;
type OwnedDwarf = Dwarf<OwnedReader>;
type Entry<'abbrev, 'unit> = DebuggingInformationEntry<'abbrev, 'unit, OwnedReader>;

/// Collect DWARF symbols from a parsed image
///
/// Images without debug sections produce an empty vector.
///
/// ## Errors
///
/// Returns [`LensError::SymbolStoreLoad`] if the debug sections are present but malformed.
pub(crate) fn collect(path: &Path, file: &object::File<'_>) -> Result<Vec<SymbolRecord>>
{
    let fail = |stage: &str, err: gimli::Error| LensError::SymbolStoreLoad {
        path: path.display().to_string(),
        reason: format!("{stage}: {err}"),
    };

    let endian = if file.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };
    let dwarf: OwnedDwarf = Dwarf::load(|id| load_section(path, file, id, endian))?;
    let relative_base = link_base(file);

    let mut walker = Walker {
        dwarf: &dwarf,
        relative_base,
        records: Vec::new(),
    };
    let mut headers = dwarf.units();
    while let Some(header) = headers.next().map_err(|err| fail("reading unit header", err))? {
        let unit = dwarf.unit(header).map_err(|err| fail("parsing unit", err))?;
        walker.walk_unit(&unit).map_err(|err| fail("walking DIE tree", err))?;
    }
    Ok(walker.records)
}

fn load_section(path: &Path, file: &object::File<'_>, id: gimli::SectionId, endian: RunTimeEndian) -> Result<OwnedReader>
{
    let data: Arc<[u8]> = match file.section_by_name(id.name()) {
        Some(section) => {
            let data = section.uncompressed_data().map_err(|err| LensError::SymbolStoreLoad {
                path: path.display().to_string(),
                reason: format!("failed to read {}: {err}", id.name()),
            })?;
            match data {
                Cow::Borrowed(bytes) => Arc::from(bytes.to_vec()),
                Cow::Owned(vec) => vec.into(),
            }
        }
        None => Arc::from(Vec::new()),
    };
    Ok(EndianArcSlice::new(data, endian))
}

struct Walker<'a>
{
    dwarf: &'a OwnedDwarf,
    relative_base: u64,
    records: Vec<SymbolRecord>,
}

impl Walker<'_>
{
    fn walk_unit(&mut self, unit: &Unit<OwnedReader>) -> gimli::Result<()>
    {
        // (depth, name) of every enclosing scope DIE
        let mut scopes: Vec<(isize, String)> = Vec::new();
        let mut depth: isize = 0;

        let mut cursor = unit.entries();
        while let Some((delta, entry)) = cursor.next_dfs()? {
            depth += delta;
            while scopes.last().is_some_and(|(scope_depth, _)| *scope_depth >= depth) {
                scopes.pop();
            }

            match entry.tag() {
                constants::DW_TAG_namespace => {
                    let name = self
                        .name_of(unit, entry)?
                        .unwrap_or_else(|| "(anonymous namespace)".to_string());
                    scopes.push((depth, name));
                }
                constants::DW_TAG_class_type | constants::DW_TAG_structure_type | constants::DW_TAG_union_type => {
                    if let Some(name) = self.name_of(unit, entry)? {
                        scopes.push((depth, name));
                    }
                }
                constants::DW_TAG_subprogram => {
                    if let Some(address) = self.low_pc(unit, entry)? {
                        let size = self.code_size(entry, address)?;
                        self.emit(unit, entry, &scopes, address, size, SymbolKind::Function)?;
                    }
                }
                constants::DW_TAG_variable => {
                    if let Some(address) = self.static_location(unit, entry)? {
                        self.emit(unit, entry, &scopes, address, 0, SymbolKind::Data)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn emit(
        &mut self,
        unit: &Unit<OwnedReader>,
        entry: &Entry<'_, '_>,
        scopes: &[(isize, String)],
        address: u64,
        size: u64,
        kind: SymbolKind,
    ) -> gimli::Result<()>
    {
        let Some(rva) = address.checked_sub(self.relative_base) else {
            return Ok(());
        };
        let Some((name, raw_name)) = self.qualified(unit, entry, scopes)? else {
            return Ok(());
        };
        self.records.push(SymbolRecord {
            name,
            raw_name,
            rva: Rva::new(rva),
            size,
            kind,
            source: SymbolSource::Dwarf,
        });
        Ok(())
    }

    /// Qualified name and raw (linkage or plain) name of a definition
    fn qualified(
        &self,
        unit: &Unit<OwnedReader>,
        entry: &Entry<'_, '_>,
        scopes: &[(isize, String)],
    ) -> gimli::Result<Option<(String, String)>>
    {
        if let Some(linkage) = self.string_attr(unit, entry, constants::DW_AT_linkage_name)? {
            if let Some(name) = qualified_name(&linkage) {
                return Ok(Some((name, linkage)));
            }
        }

        if let Some(name) = self.string_attr(unit, entry, constants::DW_AT_name)? {
            let mut path: Vec<&str> = scopes.iter().map(|(_, scope)| scope.as_str()).collect();
            path.push(name.as_str());
            return Ok(Some((path.join("::"), name.clone())));
        }

        // Out-of-line definition: the declaration carries the name.
        for attr in [constants::DW_AT_specification, constants::DW_AT_abstract_origin] {
            if let Some(AttributeValue::UnitRef(offset)) = entry.attr_value(attr)? {
                let declaration = unit.entry(offset)?;
                if let Some(linkage) = self.string_attr(unit, &declaration, constants::DW_AT_linkage_name)? {
                    if let Some(name) = qualified_name(&linkage) {
                        return Ok(Some((name, linkage)));
                    }
                }
                if let Some(name) = self.string_attr(unit, &declaration, constants::DW_AT_name)? {
                    let mut path: Vec<&str> = scopes.iter().map(|(_, scope)| scope.as_str()).collect();
                    path.push(name.as_str());
                    return Ok(Some((path.join("::"), name.clone())));
                }
            }
        }
        Ok(None)
    }

    fn name_of(&self, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>) -> gimli::Result<Option<String>>
    {
        self.string_attr(unit, entry, constants::DW_AT_name)
    }

    fn string_attr(
        &self,
        unit: &Unit<OwnedReader>,
        entry: &Entry<'_, '_>,
        name: constants::DwAt,
    ) -> gimli::Result<Option<String>>
    {
        let Some(value) = entry.attr_value(name)? else {
            return Ok(None);
        };
        let reader = self.dwarf.attr_string(unit, value)?;
        Ok(Some(reader.to_string_lossy()?.into_owned()))
    }

    fn low_pc(&self, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>) -> gimli::Result<Option<u64>>
    {
        let address = match entry.attr_value(constants::DW_AT_low_pc)? {
            Some(AttributeValue::Addr(address)) => address,
            Some(AttributeValue::DebugAddrIndex(index)) => self.dwarf.address(unit, index)?,
            _ => return Ok(None),
        };
        // Discarded COMDAT copies are relocated to zero.
        Ok((address != 0).then_some(address))
    }

    fn code_size(&self, entry: &Entry<'_, '_>, low_pc: u64) -> gimli::Result<u64>
    {
        Ok(match entry.attr_value(constants::DW_AT_high_pc)? {
            Some(AttributeValue::Addr(high)) => high.saturating_sub(low_pc),
            Some(AttributeValue::Udata(length)) => length,
            Some(AttributeValue::Data1(length)) => u64::from(length),
            Some(AttributeValue::Data2(length)) => u64::from(length),
            Some(AttributeValue::Data4(length)) => u64::from(length),
            Some(AttributeValue::Data8(length)) => length,
            _ => 0,
        })
    }

    fn static_location(&self, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>) -> gimli::Result<Option<u64>>
    {
        let Some(AttributeValue::Exprloc(expression)) = entry.attr_value(constants::DW_AT_location)? else {
            return Ok(None);
        };
        let mut operations = expression.operations(unit.encoding());
        let address = match operations.next()? {
            Some(Operation::Address { address }) => address,
            Some(Operation::AddressIndex { index }) => self.dwarf.address(unit, index)?,
            _ => return Ok(None),
        };
        // Only a bare address; `DW_OP_addr; DW_OP_plus_uconst` and friends are not symbols.
        if operations.next()?.is_some() {
            return Ok(None);
        }
        Ok((address != 0).then_some(address))
    }
}
