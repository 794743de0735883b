//! # hostlens-core
//!
//! In-process introspection of a managed runtime's private structures.
//!
//! The engine runs inside a host process whose runtime keeps its type system
//! in C++ structures with no public headers and exports almost none of the
//! functions that operate on them. This crate provides:
//! - Module and section lookup with RVA translation ([`image`])
//! - Byte-signature scanning of executable sections ([`scanner`])
//! - Debug-symbol resolution from symbol tables and DWARF ([`symbols`])
//! - Declarative native imports, bound once per type ([`imports`])
//! - Calls through resolved addresses ([`invoke`])
//! - Typed overlays over runtime structures ([`overlay`])
//!
//! ## Why unsafe code is needed
//!
//! Overlays read and write raw process memory, and native imports are called
//! through function pointers whose signatures no compiler checked. Both are
//! exposed as `unsafe` entry points ([`memory::LocalMemory::new`],
//! [`invoke::NativeInvoker::call`], [`runtime::Runtime::call`]); the overlay
//! accessors built on them are safe for callers that constructed the runtime
//! correctly.

#![allow(unsafe_code)] // Raw memory access and foreign calls

pub mod config;
pub mod error;
pub mod image;
pub mod imports;
pub mod invoke;
pub mod memory;
pub mod overlay;
pub mod platform;
pub mod prelude;
pub mod runtime;
pub mod scanner;
pub mod symbols;
pub mod types;

pub use config::LensConfig;
// Re-export commonly used types
pub use error::{LensError, Result};
pub use image::ModuleImage;
pub use imports::{BindOutcome, ImportBinder, ImportDescriptor, Importable};
pub use runtime::Runtime;
pub use types::{Address, Rva};
