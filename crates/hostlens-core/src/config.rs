//! # Configuration
//!
//! Which module is the runtime, where its symbols live, and the structure
//! layouts of that particular build. Stored as JSON; every key is optional.
//!
//! ```json
//! {
//!     "runtime_module": "libcoreclr",
//!     "symbol_file": "/usr/lib/debug/libcoreclr.so.dbg",
//!     "layout": { "method_table": { "canonical": 40 } }
//! }
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::overlay::RuntimeLayout;

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "HOSTLENS_CONFIG";

/// Default module name of the runtime
pub const DEFAULT_RUNTIME_MODULE: &str = "libcoreclr";

/// Settings for one target runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LensConfig
{
    /// Module name, matched with or without extension
    pub runtime_module: String,

    /// Separate debug file; the module's own file when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_file: Option<PathBuf>,

    pub layout: RuntimeLayout,
}

impl Default for LensConfig
{
    fn default() -> Self
    {
        Self {
            runtime_module: DEFAULT_RUNTIME_MODULE.to_string(),
            symbol_file: None,
            layout: RuntimeLayout::default(),
        }
    }
}

impl LensConfig
{
    /// Parse a JSON document
    ///
    /// ## Errors
    ///
    /// [`crate::error::LensError::Config`] on malformed JSON or mistyped keys,
    /// [`crate::error::LensError::InvalidLayout`] for bit widths or shifts
    /// that do not fit their words.
    pub fn from_json_str(json: &str) -> Result<Self>
    {
        let config: Self = serde_json::from_str(json)?;
        config.layout.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file
    ///
    /// ## Errors
    ///
    /// [`crate::error::LensError::Io`] if the file cannot be read, otherwise
    /// as for [`LensConfig::from_json_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading configuration");
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// The file named by `HOSTLENS_CONFIG`, or the defaults when it is unset
    ///
    /// ## Errors
    ///
    /// As for [`LensConfig::from_file`] when the variable is set.
    pub fn from_env() -> Result<Self>
    {
        match env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    /// Serialise back to pretty JSON
    ///
    /// ## Errors
    ///
    /// [`crate::error::LensError::Config`]; not expected for this type.
    pub fn to_json_string(&self) -> Result<String>
    {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
