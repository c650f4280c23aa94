//! Isolate lifecycle
//!
//! An [`Isolate`] wraps one native isolate and walks it through
//!
//! ```text
//! Uninitialized -> Initialized -> LibrariesSetup -> Ready -> Running -> Shutdown
//! ```
//!
//! Forward transitions are compare-and-swap on the phase cell, made while
//! the native isolate's lock is held, so a rejected call never leaves a
//! partial transition behind. `Shutdown` is reached through an atomic swap
//! that happens before any teardown work, which makes [`Isolate::shutdown`]
//! safe to call from any thread and from inside its own callbacks. Called
//! from a message handler on the isolate's own runner, the native teardown
//! is deferred until the running drain returns.
//!
//! The VM's registry holds every isolate until teardown. Dropping the
//! handle returned at creation does not shut an isolate down.

use crate::dispatcher::{MessageDispatcher, MessageHandlerState};
use crate::error::{IsolateError, IsolateResult, RuntimeError};
use crate::events::IsolateEvent;
use crate::group::{IsolateCallback, IsolateGroupData};
use crate::native::{CodeUnit, NativeIsolate, NativeIsolateConfig, DEFAULT_ENTRYPOINT};
use crate::phase::{AtomicPhase, Phase};
use crate::scope::{self, ExitedScope, IsolateScope};
use crate::settings::IsolateSettings;
use crate::task_runner::TaskRunners;
use crate::vm::VmShared;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Unique identifier for an isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IsolateId(u64);

impl IsolateId {
    /// Create a new unique isolate ID
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        IsolateId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for IsolateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IsolateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "isolate-{}", self.0)
    }
}

type ShutdownCallback = Box<dyn FnOnce() + Send>;

/// One unit of execution with its own heap and message queue
pub struct Isolate {
    id: IsolateId,
    debug_name: String,
    is_root: bool,
    phase: AtomicPhase,
    group: Arc<IsolateGroupData>,
    vm: Arc<VmShared>,
    /// Taken out at shutdown; `None` afterwards
    pub(crate) native: Mutex<Option<Box<dyn NativeIsolate>>>,
    dispatcher: Arc<MessageDispatcher>,
    task_runners: TaskRunners,
    shutdown_callbacks: Mutex<Vec<ShutdownCallback>>,
    plugin_registrant: Option<IsolateCallback>,
    sticky_error: Mutex<Option<RuntimeError>>,
    shutting_down: AtomicBool,
    teardown_deferred: AtomicBool,
}

impl Isolate {
    /// Create an isolate in `group` and move it to `Initialized`
    pub(crate) fn create(
        vm: &Arc<VmShared>,
        group: Arc<IsolateGroupData>,
        task_runners: TaskRunners,
        settings: &IsolateSettings,
        is_root: bool,
    ) -> IsolateResult<Arc<Isolate>> {
        let id = IsolateId::new();

        let native = {
            let _scope = IsolateScope::enter(id);
            vm.runtime
                .create_isolate(NativeIsolateConfig {
                    id,
                    snapshot: group.snapshot(),
                    is_root,
                    debug_name: &settings.debug_name,
                    advisory_script_uri: group.advisory_script_uri(),
                    notifier: vm.registry.notifier(id),
                })
                .map_err(|message| {
                    warn!(isolate = %id, %message, "native isolate creation failed");
                    IsolateError::NativeCreateFailed(message)
                })?
        };

        group.isolate_attached();
        let options = settings.dispatcher_options();
        let isolate = Arc::new_cyclic(|weak| Isolate {
            id,
            debug_name: settings.debug_name.clone(),
            is_root,
            phase: AtomicPhase::new(Phase::Uninitialized),
            group,
            vm: vm.clone(),
            native: Mutex::new(Some(native)),
            dispatcher: Arc::new(MessageDispatcher::new(
                id,
                weak.clone(),
                options,
                vm.events.clone(),
            )),
            task_runners,
            shutdown_callbacks: Mutex::new(Vec::new()),
            plugin_registrant: settings.plugin_registrant.clone(),
            sticky_error: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            teardown_deferred: AtomicBool::new(false),
        });

        if let Err(error) = isolate
            .dispatcher
            .initialize(isolate.task_runners.ui().clone())
        {
            isolate.shutdown();
            return Err(error);
        }
        vm.registry.register(&isolate);
        isolate.advance("create", Phase::Uninitialized, Phase::Initialized)?;

        debug!(
            isolate = %id,
            name = %isolate.debug_name,
            group = %isolate.group.id(),
            is_root,
            "isolate created"
        );

        if let Some(callback) = isolate.group.isolate_create_callback() {
            let _scope = IsolateScope::enter(id);
            callback(&isolate);
        }
        vm.events
            .dispatch(&IsolateEvent::Created { isolate: id, is_root });

        Ok(isolate)
    }

    /// Isolate id
    pub fn id(&self) -> IsolateId {
        self.id
    }

    /// Debug label
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// Whether this isolate is its group's root
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase.load()
    }

    /// Group shared with every isolate spawned from the same root
    pub fn group(&self) -> &Arc<IsolateGroupData> {
        &self.group
    }

    /// Message dispatcher
    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    /// Task runners this isolate is bound to
    pub fn task_runners(&self) -> &TaskRunners {
        &self.task_runners
    }

    /// Copy of the dispatcher's handler flags
    pub fn message_handler_state(&self) -> MessageHandlerState {
        self.dispatcher.state()
    }

    /// Whether teardown callbacks have started running
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn enter_scope(&self) -> Option<IsolateScope> {
        (!scope::is_current(self.id)).then(|| IsolateScope::enter(self.id))
    }

    fn require_phase(&self, operation: &'static str, expected: Phase) -> IsolateResult<()> {
        let actual = self.phase.load();
        if actual == expected {
            Ok(())
        } else {
            Err(IsolateError::PreconditionViolation {
                operation,
                expected,
                actual,
            })
        }
    }

    fn advance(&self, operation: &'static str, from: Phase, to: Phase) -> IsolateResult<()> {
        self.phase
            .advance(from, to)
            .map_err(|actual| IsolateError::PreconditionViolation {
                operation,
                expected: from,
                actual,
            })?;
        debug!(isolate = %self.id, %from, %to, "phase transition");
        Ok(())
    }

    /// The running drain holds the native isolate; a handler calling back
    /// into it is rejected instead of blocking its own runner.
    fn lock_native(
        &self,
        operation: &'static str,
    ) -> IsolateResult<parking_lot::MutexGuard<'_, Option<Box<dyn NativeIsolate>>>> {
        if self.dispatcher.is_draining_on_current_thread() {
            return Err(IsolateError::CalledFromHandler { operation });
        }
        Ok(self.native.lock())
    }

    /// Run `f` on the native isolate with this isolate's scope entered
    fn with_native<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Box<dyn NativeIsolate>) -> IsolateResult<R>,
    ) -> IsolateResult<R> {
        let mut slot = self.lock_native(operation)?;
        let native = slot.as_mut().ok_or(IsolateError::AlreadyShutDown)?;
        let _scope = self.enter_scope();
        f(native)
    }

    /// Install built-in libraries. Requires `Initialized`.
    pub fn load_libraries(&self) -> IsolateResult<()> {
        self.with_native("load_libraries", |native| {
            self.require_phase("load_libraries", Phase::Initialized)?;
            native.install_builtins(self.is_root)?;
            self.advance("load_libraries", Phase::Initialized, Phase::LibrariesSetup)
        })
    }

    /// Load every unit in order; the last one makes the isolate runnable.
    /// Requires `LibrariesSetup`; a failing unit leaves the phase unchanged.
    pub fn prepare_for_running(&self, units: &[CodeUnit]) -> IsolateResult<()> {
        self.require_phase("prepare_for_running", Phase::LibrariesSetup)?;
        if units.is_empty() {
            return Err(RuntimeError::compile("no code units to load").into());
        }
        for (index, unit) in units.iter().enumerate() {
            self.load_code_unit(unit, index + 1 == units.len())?;
        }
        Ok(())
    }

    /// Load one code unit. With `last_piece` the isolate is also marked
    /// runnable. Requires `LibrariesSetup`.
    pub fn load_code_unit(&self, unit: &CodeUnit, last_piece: bool) -> IsolateResult<()> {
        self.with_native("load_code_unit", |native| {
            self.require_phase("load_code_unit", Phase::LibrariesSetup)?;
            native.load_code_unit(unit).map_err(|error| {
                warn!(isolate = %self.id, unit = unit.name(), %error, "code unit failed to load");
                error
            })?;
            debug!(isolate = %self.id, unit = unit.name(), last_piece, "code unit loaded");
            Ok(())
        })?;

        if last_piece {
            self.mark_runnable()?;
        }
        Ok(())
    }

    /// Finalize loading and move to `Ready`. Requires `LibrariesSetup`.
    ///
    /// The native call runs with no isolate current on this thread; the
    /// previous scope is restored whether or not it succeeds. If the native
    /// runtime refuses, the isolate is discarded: it is shut down before the
    /// error is returned.
    pub fn mark_runnable(&self) -> IsolateResult<()> {
        let result = {
            let mut slot = self.lock_native("mark_runnable")?;
            let native = slot.as_mut().ok_or(IsolateError::AlreadyShutDown)?;
            self.require_phase("mark_runnable", Phase::LibrariesSetup)?;

            let made_runnable = {
                let _exited = ExitedScope::exit();
                native.make_runnable()
            };
            match made_runnable {
                Ok(()) => self.advance("mark_runnable", Phase::LibrariesSetup, Phase::Ready),
                Err(message) => Err(IsolateError::MarkRunnableFailed(message)),
            }
        };

        if let Err(IsolateError::MarkRunnableFailed(message)) = &result {
            error!(isolate = %self.id, %message, "could not mark isolate runnable; discarding");
            self.shutdown();
        }
        result
    }

    /// Schedule the entrypoint and move to `Running`. Requires `Ready`.
    ///
    /// `function` defaults to `main` in the root library. The plugin
    /// registrant runs first. The entrypoint itself runs later, as the
    /// first message the dispatcher drains.
    pub fn run_entrypoint(
        &self,
        library: Option<&str>,
        function: Option<&str>,
        args: &[String],
    ) -> IsolateResult<()> {
        self.require_phase("run_entrypoint", Phase::Ready)?;

        if let Some(registrant) = &self.plugin_registrant {
            let _scope = self.enter_scope();
            registrant(self);
        }

        let function = function.unwrap_or(DEFAULT_ENTRYPOINT);
        self.with_native("run_entrypoint", |native| {
            self.require_phase("run_entrypoint", Phase::Ready)?;

            let entrypoint = native.resolve_entrypoint(library, function).map_err(|source| {
                IsolateError::EntrypointFailed {
                    entrypoint: format!("{}::{}", library.unwrap_or("<root>"), function),
                    source,
                }
            })?;
            native
                .invoke_entrypoint(&entrypoint, args)
                .map_err(|source| IsolateError::EntrypointFailed {
                    entrypoint: entrypoint.to_string(),
                    source,
                })?;

            self.advance("run_entrypoint", Phase::Ready, Phase::Running)?;
            info!(isolate = %self.id, %entrypoint, "entrypoint scheduled");
            Ok(())
        })
    }

    /// Load a deferred code unit into a running isolate
    pub fn load_loading_unit(&self, loading_unit_id: u32, unit: &CodeUnit) -> IsolateResult<()> {
        self.with_native("load_loading_unit", |native| {
            self.require_phase("load_loading_unit", Phase::Running)?;
            native.load_code_unit(unit)?;
            debug!(isolate = %self.id, loading_unit_id, unit = unit.name(), "loading unit loaded");
            Ok(())
        })
    }

    /// Create a non-root isolate in this isolate's group.
    ///
    /// The child is returned in `LibrariesSetup`, after the group's child
    /// preparer accepted it. A rejected child is shut down.
    pub fn spawn_isolate(
        &self,
        task_runners: TaskRunners,
        settings: &IsolateSettings,
    ) -> IsolateResult<Arc<Isolate>> {
        if self.phase() == Phase::Shutdown {
            return Err(IsolateError::AlreadyShutDown);
        }

        let child = Isolate::create(&self.vm, self.group.clone(), task_runners, settings, false)?;

        if let Err(error) = child.load_libraries() {
            child.shutdown();
            return Err(error);
        }

        if let Some(preparer) = self.group.child_isolate_preparer() {
            let accepted = {
                let _scope = IsolateScope::enter(child.id);
                preparer(&child)
            };
            if !accepted {
                warn!(parent = %self.id, child = %child.id, "child isolate preparer rejected spawn");
                child.shutdown();
                return Err(IsolateError::ChildPreparationFailed);
            }
        }

        debug!(parent = %self.id, child = %child.id, "isolate spawned");
        Ok(child)
    }

    /// Register a callback fired at teardown. Callbacks fire in reverse
    /// registration order.
    pub fn add_shutdown_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shutdown_callbacks.lock().push(Box::new(callback));
    }

    /// Shut the isolate down.
    ///
    /// Returns false if the isolate was already shut down, including when
    /// called again from inside a shutdown callback. From a handler running
    /// on this isolate's drain, the phase flips at once and the native
    /// teardown runs when the drain returns.
    pub fn shutdown(&self) -> bool {
        let previous = match self.phase.mark_shutdown() {
            Some(previous) => previous,
            None => return false,
        };
        self.dispatcher.close();
        debug!(isolate = %self.id, from = %previous, "shutting down");

        if self.dispatcher.is_draining_on_current_thread() {
            self.teardown_deferred.store(true, Ordering::Release);
            debug!(isolate = %self.id, "shutdown requested by a handler; teardown deferred");
            return true;
        }
        self.teardown();
        true
    }

    /// Finish a shutdown a handler requested. Called by the drain once it
    /// has released the native isolate.
    pub(crate) fn complete_deferred_teardown(&self) {
        if self.teardown_deferred.swap(false, Ordering::AcqRel) {
            self.teardown();
        }
    }

    fn teardown(&self) {
        let _scope = self.enter_scope();
        let native = self.native.lock().take();
        if let Some(mut native) = native {
            *self.sticky_error.lock() = native.sticky_error();
            native.shutdown();
        }
        self.on_shutdown_callback();
    }

    /// Teardown hook run once the native isolate is gone
    pub(crate) fn on_shutdown_callback(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.vm.registry.unregister(self.id);

        if let Some(error) = self.sticky_error.lock().take() {
            error!(isolate = %self.id, %error, "isolate shut down with an unhandled error");
        }

        // Callbacks may register more callbacks; never hold the lock while calling
        loop {
            let callback = self.shutdown_callbacks.lock().pop();
            match callback {
                Some(callback) => callback(),
                None => break,
            }
        }

        if let Some(callback) = self.group.isolate_shutdown_callback() {
            callback(self);
        }
        self.group.isolate_detached();

        info!(isolate = %self.id, name = %self.debug_name, "isolate shut down");
        self.vm
            .events
            .dispatch(&IsolateEvent::ShutDown { isolate: self.id });
    }
}

impl fmt::Debug for Isolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isolate")
            .field("id", &self.id)
            .field("debug_name", &self.debug_name)
            .field("is_root", &self.is_root)
            .field("phase", &self.phase())
            .field("group", &self.group.id())
            .finish_non_exhaustive()
    }
}
