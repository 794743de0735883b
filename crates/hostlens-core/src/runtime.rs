//! # Runtime
//!
//! Ties the pieces together for one host runtime: the memory every overlay
//! reads through, the binder that resolves native imports, and the layout
//! table giving structure offsets.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hostlens_core::config::LensConfig;
//! use hostlens_core::runtime::Runtime;
//! use hostlens_core::types::Address;
//!
//! # fn main() -> hostlens_core::Result<()> {
//! // SAFETY: we run inside the host; overlay addresses come from the runtime.
//! let runtime = unsafe { Runtime::in_process(LensConfig::from_env()?)? };
//! let table = runtime.method_table(Address::new(0x7f00_0000_1000));
//! println!("{} bytes per instance", table.base_size()?);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::config::LensConfig;
use crate::error::{LensError, Result};
use crate::imports::{ImportBinder, Importable, NativeImage, SignatureStrategy, SymbolStrategy};
use crate::invoke::{NativeInvoker, NativeReturn};
use crate::memory::{LocalMemory, MemoryAccess};
use crate::overlay::runtime::{EEClass, FieldDesc, Globals, ManagedObject, MethodDesc, MethodDescChunk, MethodTable};
use crate::overlay::{Overlay, RuntimeLayout};
use crate::platform::{self, ModuleProvider};
use crate::types::Address;

static GLOBAL: OnceCell<Runtime> = OnceCell::new();

/// Memory, imports and layouts of one host runtime
pub struct Runtime
{
    memory: Arc<dyn MemoryAccess>,
    binder: ImportBinder,
    layout: RuntimeLayout,
}

impl Runtime
{
    pub fn new(memory: Arc<dyn MemoryAccess>, binder: ImportBinder, layout: RuntimeLayout) -> Self
    {
        Self { memory, binder, layout }
    }

    /// A runtime whose imports resolve against the configured module
    ///
    /// The module is located through `provider` and parsed on the first bind,
    /// not here. Both signature and symbol strategies are registered.
    pub fn from_config(config: LensConfig, provider: Arc<dyn ModuleProvider>, memory: Arc<dyn MemoryAccess>) -> Self
    {
        let mut image = NativeImage::new(provider, config.runtime_module);
        if let Some(path) = config.symbol_file {
            image = image.with_symbol_file(path);
        }
        let image = Arc::new(image);
        debug!(module = image.module_name(), "runtime configured");

        let binder = ImportBinder::new()
            .with_strategy(SignatureStrategy::new(Arc::clone(&image), Arc::clone(&memory)))
            .with_strategy(SymbolStrategy::new(image));
        Self::new(memory, binder, config.layout)
    }

    /// [`Runtime::from_config`] over this process's modules and memory
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::ModuleNotFound`] when the platform has no module
    /// provider for the current process.
    ///
    /// ## Safety
    ///
    /// Overlays built on the result read and write the current address space
    /// through raw pointers; see [`LocalMemory::new`].
    pub unsafe fn in_process(config: LensConfig) -> Result<Self>
    {
        let provider: Arc<dyn ModuleProvider> = platform::current_process()
            .ok_or_else(|| LensError::ModuleNotFound(config.runtime_module.clone()))?
            .into();
        // SAFETY: forwarded from the caller.
        let memory = Arc::new(unsafe { LocalMemory::new() });
        Ok(Self::from_config(config, provider, memory))
    }

    /// Install the process-wide runtime
    ///
    /// ## Errors
    ///
    /// Hands `runtime` back if one is already installed.
    pub fn install(runtime: Runtime) -> std::result::Result<&'static Runtime, Runtime>
    {
        GLOBAL.try_insert(runtime).map_err(|(_, rejected)| rejected)
    }

    /// The process-wide runtime, once installed
    pub fn global() -> Option<&'static Runtime>
    {
        GLOBAL.get()
    }

    pub fn memory(&self) -> &dyn MemoryAccess
    {
        &*self.memory
    }

    pub fn layout(&self) -> &RuntimeLayout
    {
        &self.layout
    }

    pub fn binder(&self) -> &ImportBinder
    {
        &self.binder
    }

    /// Address of an import of `T`, binding `T` first if needed
    ///
    /// ## Errors
    ///
    /// Any bind failure, or [`LensError::ImportNotBound`] if `T` does not
    /// declare `identifier`.
    pub fn import_address<T: Importable>(&self, identifier: &str) -> Result<Address>
    {
        self.binder.bind::<T>()?;
        self.binder.address_of::<T>(identifier)
    }

    /// Call an import of `T` on `receiver`
    ///
    /// ## Errors
    ///
    /// As for [`Runtime::import_address`] and [`NativeInvoker::call`].
    ///
    /// ## Safety
    ///
    /// The native function must take `receiver` plus `args.len()`
    /// pointer-sized arguments and return something `R` can be read from.
    pub unsafe fn call<T: Importable, R: NativeReturn>(
        &self,
        identifier: &str,
        receiver: Address,
        args: &[usize],
    ) -> Result<R>
    {
        let address = self.import_address::<T>(identifier)?;
        trace!(ty = T::TYPE_NAME, identifier, %address, %receiver, "native call");
        // SAFETY: forwarded from the caller.
        unsafe { NativeInvoker::call(address, receiver, args) }
    }

    pub fn object(&self, address: Address) -> ManagedObject<'_>
    {
        ManagedObject::at(self, address)
    }

    pub fn method_table(&self, address: Address) -> MethodTable<'_>
    {
        MethodTable::at(self, address)
    }

    pub fn ee_class(&self, address: Address) -> EEClass<'_>
    {
        EEClass::at(self, address)
    }

    pub fn method_desc(&self, address: Address) -> MethodDesc<'_>
    {
        MethodDesc::at(self, address)
    }

    pub fn method_desc_chunk(&self, address: Address) -> MethodDescChunk<'_>
    {
        MethodDescChunk::at(self, address)
    }

    pub fn field_desc(&self, address: Address) -> FieldDesc<'_>
    {
        FieldDesc::at(self, address)
    }

    /// Well-known engine globals
    pub fn globals(&self) -> Globals<'_>
    {
        Globals::new(self)
    }
}

impl fmt::Debug for Runtime
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Runtime")
            .field("binder", &self.binder)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
