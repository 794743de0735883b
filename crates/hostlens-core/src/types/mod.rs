//! # Types
//!
//! Plain value types shared by every layer: absolute addresses, module-relative
//! addresses and section table entries.

pub mod address;
pub mod section;

// Re-export all public types
pub use address::{Address, Rva};
pub use section::{Section, SectionCharacteristics};
