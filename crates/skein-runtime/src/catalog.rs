//! Library catalog
//!
//! Script code is native Rust: a [`Library`] is a named table of
//! [`ScriptFn`]s, and a [`LibraryCatalog`] is every library code units may
//! link against. Built-in libraries are linked into each isolate by
//! `load_libraries`; the rest are linked by the code units that name them.

use crate::context::ScriptContext;
use crate::error::ScriptError;
use rustc_hash::FxHashMap;
use serde_json::Value;
use skein_engine::IsolateId;
use std::fmt;
use std::sync::Arc;

/// A script function or port handler
pub type ScriptFn =
    Arc<dyn Fn(&mut ScriptContext<'_>, Value) -> Result<(), ScriptError> + Send + Sync>;

/// Receives service requests that are not resume requests
pub type ServiceHandler = Arc<dyn Fn(IsolateId, &Value) + Send + Sync>;

/// A named set of script functions
#[derive(Clone)]
pub struct Library {
    name: String,
    functions: FxHashMap<String, ScriptFn>,
    builtin: bool,
}

impl Library {
    /// Create a library that code units link explicitly
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: FxHashMap::default(),
            builtin: false,
        }
    }

    /// Create a library linked into every isolate
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            builtin: true,
            ..Self::new(name)
        }
    }

    /// Add a function
    pub fn with_function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&mut ScriptContext<'_>, Value) -> Result<(), ScriptError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    /// Library name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the library is linked into every isolate
    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    /// Look up a function
    pub fn function(&self, name: &str) -> Option<&ScriptFn> {
        self.functions.get(name)
    }

    /// Names of all functions, sorted
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("name", &self.name)
            .field("builtin", &self.builtin)
            .field("functions", &self.function_names())
            .finish()
    }
}

/// Every library available to code units
#[derive(Clone, Default)]
pub struct LibraryCatalog {
    libraries: FxHashMap<String, Library>,
    service_handler: Option<ServiceHandler>,
}

impl LibraryCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a library, replacing any library with the same name
    pub fn with_library(mut self, library: Library) -> Self {
        self.insert(library);
        self
    }

    /// Add a library, replacing any library with the same name
    pub fn insert(&mut self, library: Library) {
        self.libraries.insert(library.name.clone(), library);
    }

    /// Set the handler for service requests
    pub fn with_service_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(IsolateId, &Value) + Send + Sync + 'static,
    {
        self.service_handler = Some(Arc::new(handler));
        self
    }

    /// Look up a library
    pub fn get(&self, name: &str) -> Option<&Library> {
        self.libraries.get(name)
    }

    /// Whether a library is registered
    pub fn contains(&self, name: &str) -> bool {
        self.libraries.contains_key(name)
    }

    /// Names of the built-in libraries, sorted
    pub fn builtin_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .libraries
            .values()
            .filter(|library| library.builtin)
            .map(|library| library.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Service request handler, if any
    pub fn service_handler(&self) -> Option<&ServiceHandler> {
        self.service_handler.as_ref()
    }

    /// Number of libraries
    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }
}

impl fmt::Debug for LibraryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.libraries.keys().collect();
        names.sort_unstable();
        f.debug_struct("LibraryCatalog")
            .field("libraries", &names)
            .field("service_handler", &self.service_handler.is_some())
            .finish()
    }
}
