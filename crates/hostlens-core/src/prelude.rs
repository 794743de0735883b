//! Common module for library exports

pub use crate::config::LensConfig;
pub use crate::error::{LensError, Result};
pub use crate::image::ModuleImage;
pub use crate::imports::{BindOutcome, ImportBinder, ImportDescriptor, Importable, NameFlags, ResolutionStrategy};
pub use crate::invoke::{NativeInvoker, NativeReturn};
pub use crate::memory::{BufferMemory, LocalMemory, MemoryAccess, MemoryExt};
pub use crate::overlay::runtime::{
    EEClass, FieldDesc, ManagedObject, MethodDesc, MethodDescChunk, MethodTable, PackedField,
};
pub use crate::overlay::{Overlay, RuntimeLayout};
pub use crate::platform::{LoadedModule, ModuleProvider};
pub use crate::runtime::Runtime;
pub use crate::scanner::{Signature, SignatureScanner};
pub use crate::symbols::{SymbolResolver, SymbolStore};
pub use crate::types::{Address, Rva, Section, SectionCharacteristics};
