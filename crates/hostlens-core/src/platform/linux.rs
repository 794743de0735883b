//! # Linux Module Enumeration
//!
//! `/proc/<pid>/maps` lists every mapping with the file that backs it. A
//! module is the union of the mappings of one file; its base is the lowest
//! start and its size runs to the highest end.
//!
//! ```text
//! 7f3a1c000000-7f3a1c0a1000 r--p 00000000 08:01 1234  /usr/lib/libcoreclr.so
//! 7f3a1c0a1000-7f3a1c3f0000 r-xp 000a1000 08:01 1234  /usr/lib/libcoreclr.so
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use super::{LoadedModule, ModuleProvider};
use crate::error::Result;
use crate::types::Address;

/// Marker the kernel appends to the path of an unlinked file
const DELETED_SUFFIX: &str = " (deleted)";

/// Module list read from `/proc/<pid>/maps`
#[derive(Debug, Clone)]
pub struct ProcMapsProvider
{
    maps_path: PathBuf,
}

impl ProcMapsProvider
{
    /// Provider for the calling process
    pub fn current() -> Self
    {
        Self {
            maps_path: PathBuf::from("/proc/self/maps"),
        }
    }

    /// Provider for another process
    pub fn for_pid(pid: u32) -> Self
    {
        Self {
            maps_path: PathBuf::from(format!("/proc/{pid}/maps")),
        }
    }

    /// Parse maps text into modules, ordered by base address
    pub fn parse(maps: &str) -> Vec<LoadedModule>
    {
        // path -> (lowest start, highest end)
        let mut ranges: BTreeMap<&str, (u64, u64)> = BTreeMap::new();

        for line in maps.lines() {
            // range perms offset dev inode, then the path padded out to a column
            let mut fields = line.splitn(6, ' ');
            let Some(range) = fields.next() else {
                continue;
            };
            let path = fields.nth(4).unwrap_or("").trim_start();
            let path = path.strip_suffix(DELETED_SUFFIX).unwrap_or(path);
            if !path.starts_with('/') {
                continue;
            }
            let Some((start, end)) = range.split_once('-') else {
                continue;
            };
            let (Ok(start), Ok(end)) = (u64::from_str_radix(start, 16), u64::from_str_radix(end, 16)) else {
                continue;
            };

            let entry = ranges.entry(path).or_insert((start, end));
            entry.0 = entry.0.min(start);
            entry.1 = entry.1.max(end);
        }

        let mut modules: Vec<LoadedModule> = ranges
            .into_iter()
            .map(|(path, (start, end))| {
                let path = PathBuf::from(path);
                LoadedModule {
                    name: path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    path,
                    base: Address::new(start),
                    size: end - start,
                }
            })
            .collect();
        modules.sort_by_key(|module| module.base);
        modules
    }

    /// Path of the maps file this provider reads
    pub fn maps_path(&self) -> &Path
    {
        &self.maps_path
    }
}

impl ModuleProvider for ProcMapsProvider
{
    fn modules(&self) -> Result<Vec<LoadedModule>>
    {
        let text = fs::read_to_string(&self.maps_path)?;
        let modules = Self::parse(&text);
        trace!(count = modules.len(), path = %self.maps_path.display(), "enumerated modules");
        Ok(modules)
    }
}
