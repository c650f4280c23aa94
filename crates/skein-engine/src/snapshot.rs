//! Opaque isolate snapshots
//!
//! A snapshot is the precompiled code and initial heap image an isolate
//! group is created from. The engine never interprets its contents; it only
//! checks that the data mapping is present and forwards the bytes to the
//! native runtime.

use crate::error::{IsolateError, IsolateResult};
use std::fmt;
use std::sync::Arc;

/// Immutable data + instructions mappings shared by an isolate group
#[derive(Clone)]
pub struct Snapshot {
    data: Arc<[u8]>,
    instructions: Arc<[u8]>,
    label: Option<String>,
}

impl Snapshot {
    /// Create a snapshot from a data mapping and an instructions mapping
    pub fn new(data: impl Into<Arc<[u8]>>, instructions: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            instructions: instructions.into(),
            label: None,
        }
    }

    /// Create a snapshot with only a data mapping (interpreted / JIT mode)
    pub fn from_data(data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(data, Vec::<u8>::new())
    }

    /// Attach a diagnostic label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Heap image bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Compiled instruction bytes (empty when not precompiled)
    pub fn instructions(&self) -> &[u8] {
        &self.instructions
    }

    /// Diagnostic label, if any
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Total size of both mappings in bytes
    pub fn size(&self) -> usize {
        self.data.len() + self.instructions.len()
    }

    /// Check that the snapshot can be handed to the native runtime
    pub fn validate(&self) -> IsolateResult<()> {
        if self.data.is_empty() {
            return Err(IsolateError::SnapshotInvalid(format!(
                "snapshot {} has an empty data mapping",
                self.label().unwrap_or("<unlabelled>")
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("label", &self.label)
            .field("data_bytes", &self.data.len())
            .field("instruction_bytes", &self.instructions.len())
            .finish()
    }
}
