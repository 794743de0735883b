//! Execution engine globals: well-known method tables published as data symbols.

use super::MethodTable;
use crate::error::{LensError, Result};
use crate::imports::{ImportDescriptor, Importable, NameFlags};
use crate::memory::MemoryExt;
use crate::overlay::Overlay;
use crate::runtime::Runtime;

/// Import holder for engine globals; never instantiated
#[derive(Debug)]
pub enum ExecutionEngine {}

impl Importable for ExecutionEngine
{
    const TYPE_NAME: &'static str = "ExecutionEngine";
    const IMPORTS: &'static [ImportDescriptor] = &[
        ImportDescriptor::symbol("g_pObjectClass").with_flags(NameFlags::IDENTIFIER_ONLY),
        ImportDescriptor::symbol("g_pStringClass").with_flags(NameFlags::IDENTIFIER_ONLY),
    ];
}

/// Reads of the engine's global method table slots
#[derive(Debug, Clone, Copy)]
pub struct Globals<'rt>
{
    runtime: &'rt Runtime,
}

impl<'rt> Globals<'rt>
{
    pub fn new(runtime: &'rt Runtime) -> Self
    {
        Self { runtime }
    }

    /// `System.Object`
    pub fn object_class(&self) -> Result<MethodTable<'rt>>
    {
        self.table("g_pObjectClass")
    }

    /// `System.String`
    pub fn string_class(&self) -> Result<MethodTable<'rt>>
    {
        self.table("g_pStringClass")
    }

    /// The symbol resolves to the slot; the slot holds the table
    fn table(&self, identifier: &'static str) -> Result<MethodTable<'rt>>
    {
        let slot = self.runtime.import_address::<ExecutionEngine>(identifier)?;
        let table = self.runtime.memory().read_pointer(slot)?;
        if table.is_null() {
            return Err(LensError::NullPointer(identifier));
        }
        Ok(MethodTable::at(self.runtime, table))
    }
}
