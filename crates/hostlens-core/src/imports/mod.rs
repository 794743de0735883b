//! # Native Imports
//!
//! Runtime members that are not exported are declared as *imports*: a
//! constant [`ImportDescriptor`] per member, listed on the type that owns it
//! through [`Importable`]. The [`ImportBinder`] resolves a type's whole list
//! once, then serves the addresses from an immutable [`ImportMap`].
//!
//! ```rust
//! use hostlens_core::imports::{ImportDescriptor, Importable, NameFlags};
//!
//! struct MethodTable;
//!
//! impl Importable for MethodTable
//! {
//!     const TYPE_NAME: &'static str = "MethodTable";
//!     const IMPORTS: &'static [ImportDescriptor] = &[
//!         ImportDescriptor::symbol("GetModule"),
//!         ImportDescriptor::signature("GetNumInstanceFieldBytes", "8B 47 04 2B 47 ?? C3"),
//!     ];
//! }
//!
//! assert_eq!(MethodTable::IMPORTS[0].compose_name(None, "MethodTable"), "MethodTable::GetModule");
//! ```
//!
//! ## Name Composition
//!
//! A symbol import is looked up as `[Namespace::][EnclosingType::]Identifier`.
//! A fully-qualified override wins over everything, then
//! [`NameFlags::IDENTIFIER_ONLY`], then the per-segment flags.

pub mod binder;
pub mod strategy;

use std::fmt;

use bitflags::bitflags;
use smallvec::SmallVec;

pub use self::binder::{BindOutcome, ImportBinder};
pub use self::strategy::{ImportRequest, NativeImage, ResolutionStrategy, SignatureStrategy, SymbolStrategy};
use crate::types::Address;

bitflags! {
    /// Segments left out of a composed symbol name
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NameFlags: u8
    {
        /// Drop the owning type's namespace
        const IGNORE_NAMESPACE = 1 << 0;
        /// Drop the owning type's name
        const IGNORE_ENCLOSING_TYPE = 1 << 1;
        /// Use the bare identifier (free functions, globals)
        const IDENTIFIER_ONLY = 1 << 2;
    }
}

/// How an import is located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution
{
    /// First match of a byte pattern in executable code
    ByteSignature(&'static str),
    /// Lookup of the composed name in the module's symbols
    DebugSymbol,
}

impl Resolution
{
    /// The strategy family that handles this resolution
    pub const fn kind(&self) -> ImportKind
    {
        match self {
            Self::ByteSignature(_) => ImportKind::Signature,
            Self::DebugSymbol => ImportKind::Symbol,
        }
    }
}

/// Key strategies are registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind
{
    Signature,
    Symbol,
}

impl ImportKind
{
    pub const fn as_str(self) -> &'static str
    {
        match self {
            Self::Signature => "signature",
            Self::Symbol => "symbol",
        }
    }
}

impl fmt::Display for ImportKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.as_str())
    }
}

/// Declaration of one native member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportDescriptor
{
    identifier: &'static str,
    resolution: Resolution,
    flags: NameFlags,
    qualified: Option<&'static str>,
}

impl ImportDescriptor
{
    /// Resolved by symbol name
    pub const fn symbol(identifier: &'static str) -> Self
    {
        Self {
            identifier,
            resolution: Resolution::DebugSymbol,
            flags: NameFlags::empty(),
            qualified: None,
        }
    }

    /// Resolved by byte signature
    pub const fn signature(identifier: &'static str, pattern: &'static str) -> Self
    {
        Self {
            identifier,
            resolution: Resolution::ByteSignature(pattern),
            flags: NameFlags::empty(),
            qualified: None,
        }
    }

    /// Replace the name flags
    #[must_use]
    pub const fn with_flags(mut self, flags: NameFlags) -> Self
    {
        self.flags = flags;
        self
    }

    /// Look the symbol up under exactly `name`
    #[must_use]
    pub const fn qualified(mut self, name: &'static str) -> Self
    {
        self.qualified = Some(name);
        self
    }

    /// Key the import is stored and queried under
    pub const fn identifier(&self) -> &'static str
    {
        self.identifier
    }

    pub const fn resolution(&self) -> Resolution
    {
        self.resolution
    }

    pub const fn flags(&self) -> NameFlags
    {
        self.flags
    }

    /// The name a symbol store is asked for
    pub fn compose_name(&self, namespace: Option<&str>, type_name: &str) -> String
    {
        if let Some(name) = self.qualified {
            return name.to_string();
        }
        if self.flags.contains(NameFlags::IDENTIFIER_ONLY) {
            return self.identifier.to_string();
        }

        let mut segments: SmallVec<[&str; 3]> = SmallVec::new();
        if !self.flags.contains(NameFlags::IGNORE_NAMESPACE) {
            if let Some(namespace) = namespace.filter(|ns| !ns.is_empty()) {
                segments.push(namespace);
            }
        }
        if !self.flags.contains(NameFlags::IGNORE_ENCLOSING_TYPE) && !type_name.is_empty() {
            segments.push(type_name);
        }
        segments.push(self.identifier);
        segments.join("::")
    }
}

/// A type with native members
pub trait Importable: 'static
{
    /// Enclosing type segment of composed names
    const TYPE_NAME: &'static str;
    /// Namespace segment of composed names
    const NAMESPACE: Option<&'static str> = None;
    /// Every import, in resolution order
    const IMPORTS: &'static [ImportDescriptor];
}

/// One resolved import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImport
{
    pub identifier: &'static str,
    /// Composed name (symbol imports) or the pattern (signature imports)
    pub name: String,
    pub address: Address,
    pub kind: ImportKind,
}

/// The resolved imports of one type
///
/// Only ever built complete; never mutated once published.
#[derive(Debug, Clone)]
pub struct ImportMap
{
    type_name: &'static str,
    entries: Vec<ResolvedImport>,
}

impl ImportMap
{
    pub(crate) fn new(type_name: &'static str, entries: Vec<ResolvedImport>) -> Self
    {
        Self { type_name, entries }
    }

    pub fn type_name(&self) -> &'static str
    {
        self.type_name
    }

    pub fn get(&self, identifier: &str) -> Option<&ResolvedImport>
    {
        self.entries.iter().find(|entry| entry.identifier == identifier)
    }

    pub fn address_of(&self, identifier: &str) -> Option<Address>
    {
        self.get(identifier).map(|entry| entry.address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedImport>
    {
        self.entries.iter()
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }
}
