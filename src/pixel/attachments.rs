//! Pixel buffer attachments
//!
//! Metadata carried alongside a buffer. Only entries marked
//! [`AttachmentMode::Propagate`] survive a copy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const COLOR_PRIMARIES: &str = "ColorPrimaries";
pub const TRANSFER_FUNCTION: &str = "TransferFunction";
pub const YCBCR_MATRIX: &str = "YCbCrMatrix";
pub const PIXEL_ASPECT_RATIO: &str = "PixelAspectRatio";
pub const FIELD_COUNT: &str = "FieldCount";

/// Whether an attachment follows the buffer into copies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentMode {
    Propagate,
    DoNotPropagate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Attachment {
    value: Value,
    mode: AttachmentMode,
}

/// Keyed attachment table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachments {
    entries: BTreeMap<String, Attachment>,
}

impl Attachments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value, mode: AttachmentMode) {
        self.entries.insert(key.into(), Attachment { value, mode });
    }

    pub fn get(&self, key: &str) -> Option<(&Value, AttachmentMode)> {
        self.entries.get(key).map(|a| (&a.value, a.mode))
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|a| a.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that should be carried over to a copied buffer
    pub fn propagated(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(_, a)| a.mode == AttachmentMode::Propagate)
                .map(|(k, a)| (k.clone(), a.clone()))
                .collect(),
        }
    }
}
