//! # Error Types
//!
//! General error handling for the overlay and resolution engine.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

use crate::types::{Address, Rva};

/// Main error type for hostlens operations
///
/// Every resolution failure is surfaced synchronously to the caller. Nothing in
/// the crate falls back from one resolution kind to another or guesses an
/// address, so each variant names the exact step that failed.
///
/// ## Error Categories
///
/// 1. **Address layer**: ModuleNotFound, SectionNotFound, AddressOutOfRange
/// 2. **Scanner**: SignatureNotFound, InvalidSignature
/// 3. **Symbols**: SymbolStoreLoad, SymbolNotFound, InvalidPattern
/// 4. **Overlays**: UnionTagUnsupported, FieldIndexOutOfRange, NullPointer
/// 5. **Binding**: ImportNotBound, NoStrategy
/// 6. **Invocation**: TooManyArguments
/// 7. **Memory / config / I/O**: InvalidMemoryAccess, Config, Io
#[derive(Error, Debug)]
pub enum LensError
{
    /// The named module is not present in the running process's module list
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// The module has no section with the requested name
    #[error("Section {section} not found in module {module}")]
    SectionNotFound
    {
        /// Module short name or path
        module: String,
        /// Requested section name
        section: String,
    },

    /// An address does not fall inside any section of the module
    #[error("Address {address} is outside the mapped sections of {module}")]
    AddressOutOfRange
    {
        /// Module short name or path
        module: String,
        /// Offending absolute address
        address: Address,
    },

    /// A byte signature matched nowhere in the executable sections
    ///
    /// The target binary does not change for the lifetime of the process, so
    /// this is never retried.
    #[error("Signature `{signature}` not found in {module}")]
    SignatureNotFound
    {
        /// Module that was scanned
        module: String,
        /// The pattern, in its textual form
        signature: String,
    },

    /// A signature literal could not be parsed
    #[error("Invalid signature `{pattern}`: {reason}")]
    InvalidSignature
    {
        /// Pattern as given
        pattern: String,
        /// What was wrong with it
        reason: String,
    },

    /// The debug-symbol store is missing, malformed or empty
    #[error("Failed to load symbol store {path}: {reason}")]
    SymbolStoreLoad
    {
        /// Path of the image or symbol file
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// A fully-qualified symbol is absent from the store
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// A wildcard enumeration pattern is malformed
    #[error("Invalid symbol pattern `{pattern}`: {reason}")]
    InvalidPattern
    {
        /// Pattern as given
        pattern: String,
        /// Parser message
        reason: String,
    },

    /// A tagged union holds a discriminator with no defined interpretation
    #[error("Union {union} at {address} has unsupported tag {tag}")]
    UnionTagUnsupported
    {
        /// Union name, e.g. `MethodTable::m_pCanonMT`
        union: &'static str,
        /// Slot address
        address: Address,
        /// Raw tag bits
        tag: u64,
    },

    /// A packed-field read asked for an index past the declared field count,
    /// or the encoded lengths walk past the backing region
    #[error("Packed field index {index} out of range (declared {count})")]
    FieldIndexOutOfRange
    {
        /// Requested logical field
        index: usize,
        /// Declared field count
        count: usize,
    },

    /// A pointer field that must be populated was null
    #[error("Null pointer in {0}")]
    NullPointer(&'static str),

    /// The type has not been bound, or does not declare the identifier
    #[error("Import {identifier} of {type_name} is not bound")]
    ImportNotBound
    {
        /// Owning type name
        type_name: &'static str,
        /// Declared identifier
        identifier: String,
    },

    /// No resolution strategy is registered for a descriptor's kind
    #[error("No resolution strategy registered for {0}")]
    NoStrategy(&'static str),

    /// A native call was given more argument slots than the invoker supports
    #[error("Too many arguments for native call: {given} (max {max})")]
    TooManyArguments
    {
        /// Slots requested, including the receiver
        given: usize,
        /// Supported maximum
        max: usize,
    },

    /// A read or write touched memory the accessor cannot reach
    #[error("Invalid memory access at {address} ({len} bytes)")]
    InvalidMemoryAccess
    {
        /// Start of the access
        address: Address,
        /// Length of the access
        len: usize,
    },

    /// A layout value would shift past its word
    #[error("Invalid layout value {field}: {reason}")]
    InvalidLayout
    {
        /// Layout entry, e.g. `method_desc.token_remainder_bits`
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// An RVA that should have been translated was not in range
    #[error("RVA {0} is not inside the module")]
    RvaOutOfRange(Rva),

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// I/O error (for file operations, etc.)
    ///
    /// Used for errors when reading `/proc` maps, image files, config files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, LensError>`
///
/// ```rust
/// use hostlens_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, LensError>;
