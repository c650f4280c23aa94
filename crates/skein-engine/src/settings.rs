//! Isolate settings
//!
//! [`IsolateSettings`] carries everything needed to create an isolate and
//! its group. Fields are public; the `with_*` methods are a convenience for
//! building settings in one expression.

use crate::group::{ChildIsolatePreparer, GroupCleanupCallback, IsolateCallback};
use crate::isolate::Isolate;
use crate::native::DEFAULT_ENTRYPOINT;
use crate::snapshot::Snapshot;
use std::fmt;
use std::sync::Arc;

/// Settings for creating a root isolate (and its group) or a spawned isolate
#[derive(Clone)]
pub struct IsolateSettings {
    /// Snapshot the group is created from. Required for root isolates.
    pub snapshot: Option<Arc<Snapshot>>,

    /// Diagnostic script URI recorded on the group
    pub advisory_script_uri: String,

    /// Diagnostic entrypoint name recorded on the group
    pub advisory_script_entrypoint: String,

    /// Label used in logs and passed to the native runtime
    pub debug_name: String,

    /// Pause before the first user message until a resume request arrives
    pub start_paused: bool,

    /// Pause when the isolate runs out of live ports instead of exiting
    pub pause_on_exit: bool,

    /// Group hook: fired for every isolate of the group after creation
    pub isolate_create_callback: Option<IsolateCallback>,

    /// Group hook: fired once per isolate at teardown
    pub isolate_shutdown_callback: Option<IsolateCallback>,

    /// Group hook: run on spawned isolates before they are handed back
    pub child_isolate_preparer: Option<ChildIsolatePreparer>,

    /// Fired once when the group data is destroyed
    pub group_cleanup_callback: Option<GroupCleanupCallback>,

    /// Plugin / deferred registration hook run before the entrypoint
    pub plugin_registrant: Option<IsolateCallback>,
}

impl Default for IsolateSettings {
    fn default() -> Self {
        Self {
            snapshot: None,
            advisory_script_uri: "main".to_string(),
            advisory_script_entrypoint: DEFAULT_ENTRYPOINT.to_string(),
            debug_name: "isolate".to_string(),
            start_paused: false,
            pause_on_exit: false,
            isolate_create_callback: None,
            isolate_shutdown_callback: None,
            child_isolate_preparer: None,
            group_cleanup_callback: None,
            plugin_registrant: None,
        }
    }
}

impl IsolateSettings {
    /// Use `snapshot` for the group
    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(Arc::new(snapshot));
        self
    }

    /// Set the advisory script URI and entrypoint
    pub fn with_advisory_script(
        mut self,
        uri: impl Into<String>,
        entrypoint: impl Into<String>,
    ) -> Self {
        self.advisory_script_uri = uri.into();
        self.advisory_script_entrypoint = entrypoint.into();
        self
    }

    /// Set the debug label
    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = name.into();
        self
    }

    /// Request a pause before the first user message
    pub fn with_start_paused(mut self, start_paused: bool) -> Self {
        self.start_paused = start_paused;
        self
    }

    /// Request a pause when the isolate is about to exit
    pub fn with_pause_on_exit(mut self, pause_on_exit: bool) -> Self {
        self.pause_on_exit = pause_on_exit;
        self
    }

    /// Set the group's isolate-create hook
    pub fn with_isolate_create_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Isolate) + Send + Sync + 'static,
    {
        self.isolate_create_callback = Some(Arc::new(callback));
        self
    }

    /// Set the group's isolate-shutdown hook
    pub fn with_isolate_shutdown_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Isolate) + Send + Sync + 'static,
    {
        self.isolate_shutdown_callback = Some(Arc::new(callback));
        self
    }

    /// Set the group's child isolate preparer
    pub fn with_child_isolate_preparer<F>(mut self, preparer: F) -> Self
    where
        F: Fn(&Isolate) -> bool + Send + Sync + 'static,
    {
        self.child_isolate_preparer = Some(Arc::new(preparer));
        self
    }

    /// Set the hook fired when the group is destroyed
    pub fn with_group_cleanup_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.group_cleanup_callback = Some(Arc::new(callback));
        self
    }

    /// Set the plugin registration hook
    pub fn with_plugin_registrant<F>(mut self, registrant: F) -> Self
    where
        F: Fn(&Isolate) + Send + Sync + 'static,
    {
        self.plugin_registrant = Some(Arc::new(registrant));
        self
    }

    /// Pause options for the isolate's message dispatcher
    pub fn dispatcher_options(&self) -> DispatcherOptions {
        DispatcherOptions {
            start_paused: self.start_paused,
            pause_on_exit: self.pause_on_exit,
        }
    }
}

impl fmt::Debug for IsolateSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolateSettings")
            .field("snapshot", &self.snapshot)
            .field("advisory_script_uri", &self.advisory_script_uri)
            .field("advisory_script_entrypoint", &self.advisory_script_entrypoint)
            .field("debug_name", &self.debug_name)
            .field("start_paused", &self.start_paused)
            .field("pause_on_exit", &self.pause_on_exit)
            .finish_non_exhaustive()
    }
}

/// Pause behaviour of a message dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherOptions {
    /// Pause before the first user message
    pub start_paused: bool,
    /// Pause instead of exiting when no live ports remain
    pub pause_on_exit: bool,
}

/// Entrypoint selection for `Isolate::run_entrypoint`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    /// Library holding the entrypoint; `None` selects the root library
    pub library: Option<String>,
    /// Function name; `None` selects `main`
    pub function: Option<String>,
    /// String arguments passed to the entrypoint
    pub args: Vec<String>,
}

impl RunRequest {
    /// Run `function` in the root library
    pub fn function(function: impl Into<String>) -> Self {
        Self {
            function: Some(function.into()),
            ..Default::default()
        }
    }

    /// Set the library
    pub fn in_library(mut self, library: impl Into<String>) -> Self {
        self.library = Some(library.into());
        self
    }

    /// Set the arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}
