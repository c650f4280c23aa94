//! Native runtime seam
//!
//! The engine drives isolates through these traits and never looks inside
//! them. A [`NativeRuntime`] constructs one [`NativeIsolate`] per engine
//! isolate; the native isolate owns the heap, the message queues, and the
//! code. All `NativeIsolate` methods are called with the isolate's scope
//! entered, except `make_runnable`, which is called with no isolate current.

use crate::error::RuntimeError;
use crate::isolate::IsolateId;
use crate::registry::MessageNotifier;
use crate::snapshot::Snapshot;
use std::fmt;
use std::sync::Arc;

/// Function run when no entrypoint name is given
pub const DEFAULT_ENTRYPOINT: &str = "main";

/// One independently loadable piece of program code
#[derive(Clone, PartialEq, Eq)]
pub struct CodeUnit {
    name: String,
    bytes: Arc<[u8]>,
}

impl CodeUnit {
    /// Create a code unit from raw bytes
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Create a code unit from source text
    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        Self::new(name, text.as_bytes())
    }

    /// Unit name (used in diagnostics)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unit contents
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeUnit")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A resolved entrypoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entrypoint {
    /// Library the function lives in
    pub library: String,
    /// Function name
    pub function: String,
}

impl fmt::Display for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.library, self.function)
    }
}

/// Result of servicing control-plane messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// No service messages were waiting
    Idle,
    /// Service messages were handled; none asked to resume
    Handled,
    /// A resume request was observed
    Resume,
}

/// What the engine hands the native runtime when creating an isolate
pub struct NativeIsolateConfig<'a> {
    /// Engine-side isolate id
    pub id: IsolateId,
    /// Group snapshot
    pub snapshot: &'a Snapshot,
    /// Whether this is the group's root isolate
    pub is_root: bool,
    /// Debug label
    pub debug_name: &'a str,
    /// Advisory script URI from the group
    pub advisory_script_uri: &'a str,
    /// Handle the native side calls whenever a message is queued
    pub notifier: MessageNotifier,
}

/// Factory for native isolates
pub trait NativeRuntime: Send + Sync {
    /// Construct a native isolate. The error string is surfaced to the
    /// embedder as `IsolateError::NativeCreateFailed`.
    fn create_isolate(
        &self,
        config: NativeIsolateConfig<'_>,
    ) -> Result<Box<dyn NativeIsolate>, String>;
}

/// Per-isolate native operations
pub trait NativeIsolate: Send {
    /// Install built-in library bindings
    fn install_builtins(&mut self, is_root: bool) -> Result<(), RuntimeError>;

    /// Parse and link one code unit
    fn load_code_unit(&mut self, unit: &CodeUnit) -> Result<(), RuntimeError>;

    /// Finalize loading so the isolate may run code
    fn make_runnable(&mut self) -> Result<(), String>;

    /// Resolve `function` in `library` (or the root library)
    fn resolve_entrypoint(
        &self,
        library: Option<&str>,
        function: &str,
    ) -> Result<Entrypoint, RuntimeError>;

    /// Schedule `entrypoint` as an ordinary message rather than calling it
    fn invoke_entrypoint(
        &mut self,
        entrypoint: &Entrypoint,
        args: &[String],
    ) -> Result<(), RuntimeError>;

    /// Process one batch of user messages
    fn handle_pending_messages(&mut self) -> Result<(), RuntimeError>;

    /// Process queued service messages only
    fn handle_service_messages(&mut self) -> Result<ServiceOutcome, RuntimeError>;

    /// Whether any communication endpoint is still open
    fn has_live_ports(&self) -> bool;

    /// Whether user messages are queued
    fn has_pending_messages(&self) -> bool;

    /// Error left behind by the last failure, if any
    fn sticky_error(&self) -> Option<RuntimeError>;

    /// Tear down native state
    fn shutdown(&mut self);
}
