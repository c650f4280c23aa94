//! Message dispatch
//!
//! [`MessageDispatcher`] is the single serialization point between threads
//! that queue messages for an isolate and the isolate itself. A notification
//! may arrive on any thread; it only posts a drain task onto the isolate's
//! task runner. Drains run on that runner, one at a time, and are where all
//! pause handling and error classification happens.
//!
//! Notifications coalesce: while a drain is queued and has not started,
//! further notifications do not queue another one. The native runtime
//! decides what one batch contains, so every message queued before a drain
//! starts is visited by that drain or a later one.
//!
//! A drain holds the native isolate while handlers run but not the handler
//! flags, so handlers may read [`MessageDispatcher::state`] and shut their
//! own isolate down.

use crate::error::{ErrorKind, IsolateError, IsolateResult, RuntimeError};
use crate::events::{EventTable, IsolateEvent};
use crate::isolate::{Isolate, IsolateId};
use crate::native::ServiceOutcome;
use crate::phase::Phase;
use crate::scope::{self, IsolateScope};
use crate::settings::DispatcherOptions;
use crate::task_runner::TaskRunner;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, error, info, trace, warn};

/// Per-isolate message handling flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageHandlerState {
    /// The first drain has run (and made the pause-on-start decision)
    pub handled_first_message: bool,
    /// The isolate ran out of live ports and was asked to shut down
    pub isolate_exited: bool,
    /// At least one non-fatal error escaped user code
    pub isolate_had_uncaught_error: bool,
    /// A fatal error stopped message processing
    pub isolate_had_fatal_error: bool,
    /// Severity of the most recent error
    pub last_error_kind: ErrorKind,
    /// Only service messages are processed until a resume request
    pub paused_on_start: bool,
    /// Exiting; only service messages are processed
    pub paused_on_exit: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct DispatcherInner {
    state: MessageHandlerState,
    // A resumed exit pause is not re-entered
    exit_pause_released: bool,
}

enum DrainAction {
    Continue,
    Redrain,
    Shutdown,
}

/// Serializes message processing for one isolate
pub struct MessageDispatcher {
    isolate_id: IsolateId,
    isolate: Weak<Isolate>,
    options: DispatcherOptions,
    runner: OnceCell<Arc<dyn TaskRunner>>,
    inner: Mutex<DispatcherInner>,
    fatal: AtomicBool,
    closed: AtomicBool,
    drain_scheduled: AtomicBool,
    draining_on: Mutex<Option<ThreadId>>,
    events: Arc<EventTable>,
}

impl MessageDispatcher {
    pub(crate) fn new(
        isolate_id: IsolateId,
        isolate: Weak<Isolate>,
        options: DispatcherOptions,
        events: Arc<EventTable>,
    ) -> Self {
        Self {
            isolate_id,
            isolate,
            options,
            runner: OnceCell::new(),
            inner: Mutex::new(DispatcherInner::default()),
            fatal: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            drain_scheduled: AtomicBool::new(false),
            draining_on: Mutex::new(None),
            events,
        }
    }

    /// Bind the task runner every drain will run on. Only one call succeeds.
    pub fn initialize(&self, runner: Arc<dyn TaskRunner>) -> IsolateResult<()> {
        self.runner
            .set(runner)
            .map_err(|_| IsolateError::DispatcherAlreadyInitialized)
    }

    /// Whether a task runner has been bound
    pub fn is_initialized(&self) -> bool {
        self.runner.get().is_some()
    }

    /// Isolate this dispatcher serves
    pub fn isolate_id(&self) -> IsolateId {
        self.isolate_id
    }

    /// Pause options
    pub fn options(&self) -> DispatcherOptions {
        self.options
    }

    /// Copy of the current handler flags
    pub fn state(&self) -> MessageHandlerState {
        self.inner.lock().state
    }

    /// Whether a fatal error has stopped message processing for good
    pub fn has_fatal_error(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    /// Whether a drain of this isolate is running on the calling thread
    pub fn is_draining_on_current_thread(&self) -> bool {
        *self.draining_on.lock() == Some(thread::current().id())
    }

    /// Stop scheduling drains; called once the isolate starts shutting down
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Report that a message was queued. Callable from any thread.
    ///
    /// Returns true if a drain is queued. Returns false, doing nothing, when
    /// the isolate is gone, a fatal error was recorded, or no runner is bound.
    pub fn on_message_notify(self: &Arc<Self>) -> bool {
        if self.has_fatal_error() {
            trace!(isolate = %self.isolate_id, "notification after fatal error dropped");
            return false;
        }
        if self.closed.load(Ordering::Acquire) || self.isolate.strong_count() == 0 {
            trace!(isolate = %self.isolate_id, "notification for a dropped isolate");
            return false;
        }
        let runner = match self.runner.get() {
            Some(runner) => runner,
            None => return false,
        };

        if self.drain_scheduled.swap(true, Ordering::AcqRel) {
            return true;
        }

        let dispatcher = Arc::clone(self);
        runner.post_task(Box::new(move || dispatcher.drain_messages()));
        true
    }

    fn drain_messages(self: &Arc<Self>) {
        self.drain_scheduled.store(false, Ordering::Release);

        if self.has_fatal_error() {
            return;
        }
        let isolate = match self.isolate.upgrade() {
            Some(isolate) => isolate,
            None => return,
        };
        if isolate.phase() == Phase::Shutdown {
            return;
        }

        let _scope =
            (!scope::is_current(self.isolate_id)).then(|| IsolateScope::enter(self.isolate_id));

        let mut inner = *self.inner.lock();
        *self.draining_on.lock() = Some(thread::current().id());
        let (action, events) = self.drain_locked(&isolate, &mut inner);
        *self.draining_on.lock() = None;
        *self.inner.lock() = inner;

        for event in &events {
            self.events.dispatch(event);
        }

        // A handler shut the isolate down while the drain held it
        if isolate.phase() == Phase::Shutdown {
            isolate.complete_deferred_teardown();
            return;
        }

        match action {
            DrainAction::Continue => {}
            DrainAction::Redrain => {
                self.on_message_notify();
            }
            DrainAction::Shutdown => {
                isolate.shutdown();
            }
        }
    }

    /// One batch. `inner` is a working copy of the handler flags, written
    /// back by the caller; only drains write them, and drains never overlap.
    fn drain_locked(
        &self,
        isolate: &Isolate,
        inner: &mut DispatcherInner,
    ) -> (DrainAction, Vec<IsolateEvent>) {
        let id = self.isolate_id;
        let mut events = Vec::new();

        let DispatcherInner {
            state,
            exit_pause_released,
        } = inner;

        let mut native_slot = isolate.native.lock();
        let native = match native_slot.as_mut() {
            Some(native) => native,
            None => return (DrainAction::Continue, events),
        };

        if !state.handled_first_message {
            state.handled_first_message = true;
            if self.options.start_paused {
                state.paused_on_start = true;
                info!(isolate = %id, "paused on start");
                events.push(IsolateEvent::PausedOnStart { isolate: id });
            }
            self.inner.lock().state = *state;
        }

        let result = if state.paused_on_start {
            match native.handle_service_messages() {
                Ok(ServiceOutcome::Resume) => {
                    state.paused_on_start = false;
                    info!(isolate = %id, "resumed from start pause");
                    events.push(IsolateEvent::Resumed { isolate: id });
                    native.handle_pending_messages()
                }
                Ok(_) => Ok(()),
                Err(error) => Err(error),
            }
        } else if state.paused_on_exit {
            match native.handle_service_messages() {
                Ok(ServiceOutcome::Resume) => {
                    state.paused_on_exit = false;
                    *exit_pause_released = true;
                    info!(isolate = %id, "resumed from exit pause");
                    events.push(IsolateEvent::Resumed { isolate: id });
                    Ok(())
                }
                Ok(_) => Ok(()),
                Err(error) => Err(error),
            }
        } else {
            native.handle_pending_messages()
        };

        if isolate.phase() == Phase::Shutdown {
            if let Err(error) = result {
                self.record_error(state, error, &mut events);
            }
            return (DrainAction::Continue, events);
        }

        let had_error = match result {
            Ok(()) => false,
            Err(error) => {
                if self.record_error(state, error, &mut events) {
                    return (DrainAction::Shutdown, events);
                }
                true
            }
        };

        if !state.paused_on_start && !native.has_live_ports() {
            if self.options.pause_on_exit && !state.paused_on_exit && !*exit_pause_released {
                state.paused_on_exit = true;
                info!(isolate = %id, "paused on exit");
                events.push(IsolateEvent::PausedOnExit { isolate: id });
                return (DrainAction::Continue, events);
            }
            if !state.paused_on_exit {
                state.isolate_exited = true;
                debug!(isolate = %id, "no live ports left; exiting");
                events.push(IsolateEvent::Exited { isolate: id });
                return (DrainAction::Shutdown, events);
            }
        }

        if had_error && native.has_pending_messages() {
            (DrainAction::Redrain, events)
        } else {
            (DrainAction::Continue, events)
        }
    }

    /// Record a processing error. Returns true if it was fatal.
    fn record_error(
        &self,
        state: &mut MessageHandlerState,
        error: RuntimeError,
        events: &mut Vec<IsolateEvent>,
    ) -> bool {
        let id = self.isolate_id;
        state.last_error_kind = error.kind;

        if error.is_fatal() {
            self.fatal.store(true, Ordering::Release);
            state.isolate_had_fatal_error = true;
            error!(isolate = %id, %error, "fatal error; shutting down isolate");
            events.push(IsolateEvent::FatalError { isolate: id, error });
            return true;
        }

        state.isolate_had_uncaught_error = true;
        warn!(isolate = %id, %error, "uncaught error");
        events.push(IsolateEvent::UncaughtException { isolate: id, error });
        false
    }
}

impl fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("isolate", &self.isolate_id)
            .field("options", &self.options)
            .field("initialized", &self.is_initialized())
            .field("fatal", &self.has_fatal_error())
            .finish()
    }
}
