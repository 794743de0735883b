//! # Host Runtime Overlays
//!
//! Views over the execution engine's type system: objects, method tables,
//! classes, field and method descriptors. Default offsets are those of a
//! 64-bit CoreCLR build; see [`super::RuntimeLayout`] to override them.

mod ee_class;
mod field_desc;
mod globals;
mod method_desc;
mod method_table;
mod object;

pub use self::ee_class::{EEClass, EEClassLayout, PackedField};
pub use self::field_desc::{CorElementType, FieldAccess, FieldDesc, FieldDescLayout, FIELD_DEF_TOKEN_TYPE};
pub use self::globals::{ExecutionEngine, Globals};
pub use self::method_desc::{
    MethodClassification, MethodDesc, MethodDescChunk, MethodDescChunkLayout, MethodDescLayout, METHOD_DEF_TOKEN_TYPE,
};
pub use self::method_table::{
    CanonicalInfo, MethodTable, MethodTableLayout, TypeCategory, CATEGORY_MASK, FLAG_CONTAINS_POINTERS,
    FLAG_HAS_COMPONENT_SIZE,
};
pub use self::object::{ManagedObject, ObjectLayout};
