//! Offsets of every runtime structure, as one serialisable table.

use serde::{Deserialize, Serialize};

use super::runtime::{
    EEClassLayout, FieldDescLayout, MethodDescChunkLayout, MethodDescLayout, MethodTableLayout, ObjectLayout,
};
use crate::error::Result;

/// Structure layouts of one runtime build
///
/// Every table defaults independently, so a configuration only needs to
/// name the offsets that differ:
///
/// ```rust
/// use hostlens_core::overlay::RuntimeLayout;
///
/// let layout: RuntimeLayout = serde_json::from_str(r#"{ "method_table": { "parent": 24 } }"#).unwrap();
/// assert_eq!(layout.method_table.parent.offset(), 24);
/// assert_eq!(layout.field_desc, Default::default());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeLayout
{
    pub object: ObjectLayout,
    pub method_table: MethodTableLayout,
    pub ee_class: EEClassLayout,
    pub method_desc: MethodDescLayout,
    pub method_desc_chunk: MethodDescChunkLayout,
    pub field_desc: FieldDescLayout,
}

impl RuntimeLayout
{
    /// Reject values the accessors cannot shift by
    ///
    /// ## Errors
    ///
    /// [`crate::error::LensError::InvalidLayout`] naming the first bad entry.
    pub fn validate(&self) -> Result<()>
    {
        self.method_desc.token_remainder_width()?;
        self.field_desc.validate()
    }
}
