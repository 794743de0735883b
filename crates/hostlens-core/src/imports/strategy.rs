//! Resolution strategies and the module they resolve against.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use super::{ImportDescriptor, ImportKind, Resolution};
use crate::error::{LensError, Result};
use crate::image::ModuleImage;
use crate::memory::MemoryAccess;
use crate::platform::ModuleProvider;
use crate::scanner::{Signature, SignatureScanner};
use crate::symbols::SymbolResolver;
use crate::types::Address;

/// What a strategy is asked to resolve
#[derive(Debug, Clone, Copy)]
pub struct ImportRequest<'a>
{
    /// Owning type
    pub type_name: &'static str,
    pub descriptor: &'a ImportDescriptor,
    /// Composed symbol name
    pub name: &'a str,
}

/// One way of turning a descriptor into an address
pub trait ResolutionStrategy: Send + Sync
{
    /// The descriptors this strategy handles
    fn kind(&self) -> ImportKind;

    /// Resolve one import
    ///
    /// ## Errors
    ///
    /// Strategy specific; never a guessed address.
    fn resolve(&self, request: &ImportRequest<'_>) -> Result<Address>;
}

/// A runtime module with lazily loaded sections and symbols
///
/// Both are built on first use and then live as long as the image.
pub struct NativeImage
{
    module_name: String,
    provider: Option<Arc<dyn ModuleProvider>>,
    symbol_file: Option<PathBuf>,
    image: OnceCell<ModuleImage>,
    symbols: OnceCell<SymbolResolver>,
}

impl NativeImage
{
    /// Image of `module_name`, located through `provider` when first needed
    pub fn new(provider: Arc<dyn ModuleProvider>, module_name: impl Into<String>) -> Self
    {
        Self {
            module_name: module_name.into(),
            provider: Some(provider),
            symbol_file: None,
            image: OnceCell::new(),
            symbols: OnceCell::new(),
        }
    }

    /// An already constructed image, optionally with its symbols
    pub fn preloaded(image: ModuleImage, symbols: Option<SymbolResolver>) -> Self
    {
        Self {
            module_name: image.name().to_string(),
            provider: None,
            symbol_file: None,
            image: OnceCell::with_value(image),
            symbols: symbols.map_or_else(OnceCell::new, OnceCell::with_value),
        }
    }

    /// Read symbols from `path` instead of the module's own file
    #[must_use]
    pub fn with_symbol_file(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.symbol_file = Some(path.into());
        self
    }

    pub fn module_name(&self) -> &str
    {
        &self.module_name
    }

    /// The module's sections
    ///
    /// ## Errors
    ///
    /// - [`LensError::ModuleNotFound`] if the module is not loaded
    /// - errors from [`ModuleImage::load`]
    pub fn image(&self) -> Result<&ModuleImage>
    {
        self.image.get_or_try_init(|| {
            let provider = self
                .provider
                .as_deref()
                .ok_or_else(|| LensError::ModuleNotFound(self.module_name.clone()))?;
            ModuleImage::load(provider, &self.module_name)
        })
    }

    /// The module's symbols
    ///
    /// ## Errors
    ///
    /// Errors from [`NativeImage::image`] and [`SymbolResolver::initialize`].
    pub fn symbols(&self) -> Result<&SymbolResolver>
    {
        self.symbols.get_or_try_init(|| {
            let image = self.image()?;
            let file = self.symbol_file.as_deref().unwrap_or_else(|| image.path());
            SymbolResolver::initialize(file, image)
        })
    }
}

impl fmt::Debug for NativeImage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("NativeImage")
            .field("module_name", &self.module_name)
            .field("symbol_file", &self.symbol_file)
            .field("image_loaded", &self.image.get().is_some())
            .field("symbols_loaded", &self.symbols.get().is_some())
            .finish_non_exhaustive()
    }
}

/// Resolves [`Resolution::ByteSignature`] imports by scanning code
pub struct SignatureStrategy
{
    image: Arc<NativeImage>,
    scanner: SignatureScanner,
}

impl SignatureStrategy
{
    pub fn new(image: Arc<NativeImage>, memory: Arc<dyn MemoryAccess>) -> Self
    {
        Self {
            image,
            scanner: SignatureScanner::new(memory),
        }
    }
}

impl ResolutionStrategy for SignatureStrategy
{
    fn kind(&self) -> ImportKind
    {
        ImportKind::Signature
    }

    fn resolve(&self, request: &ImportRequest<'_>) -> Result<Address>
    {
        let Resolution::ByteSignature(pattern) = request.descriptor.resolution() else {
            return Err(LensError::NoStrategy(ImportKind::Symbol.as_str()));
        };
        let signature = Signature::parse(pattern)?;
        let address = self.scanner.scan(self.image.image()?, &signature)?;
        debug!(ty = request.type_name, import = request.descriptor.identifier(), %address, "signature import");
        Ok(address)
    }
}

/// Resolves [`Resolution::DebugSymbol`] imports by composed name
pub struct SymbolStrategy
{
    image: Arc<NativeImage>,
}

impl SymbolStrategy
{
    pub fn new(image: Arc<NativeImage>) -> Self
    {
        Self { image }
    }
}

impl ResolutionStrategy for SymbolStrategy
{
    fn kind(&self) -> ImportKind
    {
        ImportKind::Symbol
    }

    fn resolve(&self, request: &ImportRequest<'_>) -> Result<Address>
    {
        let address = self.image.symbols()?.resolve(request.name)?;
        debug!(ty = request.type_name, import = request.descriptor.identifier(), %address, "symbol import");
        Ok(address)
    }
}
