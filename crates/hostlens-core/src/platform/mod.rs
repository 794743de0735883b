//! # Platform-Specific Module Enumeration
//!
//! Listing the modules loaded in a process is the one OS-specific question the
//! core needs answered. It is asked through [`ModuleProvider`] so the rest of
//! the crate never touches `/proc`, `dyld` or the PEB directly.
//!
//! - **Linux**: [`linux::ProcMapsProvider`] parses `/proc/<pid>/maps`
//!   - See: [proc(5) man page](https://man7.org/linux/man-pages/man5/proc.5.html)
//! - **Everything**: [`StaticModuleList`] serves a list the caller already has
//!   (from a loader callback, a dump header, a test)

#[cfg(target_os = "linux")]
pub mod linux;

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::Address;

/// A module mapped into the inspected process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule
{
    /// Short name (file name of the image)
    pub name: String,
    /// Full path of the backing image file
    pub path: PathBuf,
    /// Load base
    pub base: Address,
    /// Size of the mapped range starting at `base`
    pub size: u64,
}

impl LoadedModule
{
    /// Whether `address` lies in `[base, base + size)`
    pub fn contains(&self, address: Address) -> bool
    {
        address
            .offset_from(self.base)
            .is_some_and(|offset| offset < self.size)
    }

    /// Whether this module answers to `wanted`
    ///
    /// Matches the exact file name, the full path, or the file name with its
    /// extension chain dropped, so `libcoreclr` finds `libcoreclr.so` and
    /// `coreclr` finds `coreclr.dll`.
    pub fn matches(&self, wanted: &str) -> bool
    {
        if self.name == wanted || self.path == Path::new(wanted) {
            return true;
        }
        self.name
            .split_once('.')
            .is_some_and(|(stem, _)| stem == wanted)
    }
}

/// Source of the process module list
pub trait ModuleProvider: Send + Sync
{
    /// Every module currently mapped
    ///
    /// ## Errors
    ///
    /// Implementation specific; typically I/O on the OS interface.
    fn modules(&self) -> Result<Vec<LoadedModule>>;

    /// The module answering to `name`, if mapped
    ///
    /// ## Errors
    ///
    /// Propagates errors from [`ModuleProvider::modules`].
    fn find(&self, name: &str) -> Result<Option<LoadedModule>>
    {
        Ok(self.modules()?.into_iter().find(|module| module.matches(name)))
    }
}

/// A fixed module list
#[derive(Debug, Clone, Default)]
pub struct StaticModuleList
{
    modules: Vec<LoadedModule>,
}

impl StaticModuleList
{
    /// Serve exactly `modules`
    pub fn new(modules: Vec<LoadedModule>) -> Self
    {
        Self { modules }
    }
}

impl ModuleProvider for StaticModuleList
{
    fn modules(&self) -> Result<Vec<LoadedModule>>
    {
        Ok(self.modules.clone())
    }
}

/// The provider for the current process on this platform, if there is one
#[cfg(target_os = "linux")]
pub fn current_process() -> Option<Box<dyn ModuleProvider>>
{
    Some(Box::new(linux::ProcMapsProvider::current()))
}

/// The provider for the current process on this platform, if there is one
#[cfg(not(target_os = "linux"))]
pub fn current_process() -> Option<Box<dyn ModuleProvider>>
{
    None
}
