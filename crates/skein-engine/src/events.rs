//! Isolate lifecycle events
//!
//! Everything the engine reports to its embedder goes through one table:
//! handlers are registered per [`EventKind`] and looked up in
//! [`EventTable::dispatch`]. Events are dispatched with no engine lock held,
//! so handlers may call back into the engine.

use crate::error::RuntimeError;
use crate::isolate::IsolateId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Discriminant of [`IsolateEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Isolate created and registered
    Created,
    /// Dispatcher paused before the first user message
    PausedOnStart,
    /// Dispatcher paused because the isolate is about to exit
    PausedOnExit,
    /// A resume request ended a pause
    Resumed,
    /// A non-fatal error escaped user code
    UncaughtException,
    /// A fatal error stopped message processing
    FatalError,
    /// The isolate ran out of live ports
    Exited,
    /// Teardown completed
    ShutDown,
}

/// An event raised by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolateEvent {
    /// Isolate created and registered
    Created {
        /// Isolate
        isolate: IsolateId,
        /// Whether the isolate is a group root
        is_root: bool,
    },
    /// Paused before the first user message
    PausedOnStart {
        /// Isolate
        isolate: IsolateId,
    },
    /// Paused on exit
    PausedOnExit {
        /// Isolate
        isolate: IsolateId,
    },
    /// Pause ended
    Resumed {
        /// Isolate
        isolate: IsolateId,
    },
    /// Non-fatal uncaught error
    UncaughtException {
        /// Isolate
        isolate: IsolateId,
        /// Error reported by the native runtime
        error: RuntimeError,
    },
    /// Fatal error
    FatalError {
        /// Isolate
        isolate: IsolateId,
        /// Error reported by the native runtime
        error: RuntimeError,
    },
    /// No live ports remain
    Exited {
        /// Isolate
        isolate: IsolateId,
    },
    /// Teardown completed
    ShutDown {
        /// Isolate
        isolate: IsolateId,
    },
}

impl IsolateEvent {
    /// Event discriminant
    pub fn kind(&self) -> EventKind {
        match self {
            IsolateEvent::Created { .. } => EventKind::Created,
            IsolateEvent::PausedOnStart { .. } => EventKind::PausedOnStart,
            IsolateEvent::PausedOnExit { .. } => EventKind::PausedOnExit,
            IsolateEvent::Resumed { .. } => EventKind::Resumed,
            IsolateEvent::UncaughtException { .. } => EventKind::UncaughtException,
            IsolateEvent::FatalError { .. } => EventKind::FatalError,
            IsolateEvent::Exited { .. } => EventKind::Exited,
            IsolateEvent::ShutDown { .. } => EventKind::ShutDown,
        }
    }

    /// Isolate the event concerns
    pub fn isolate(&self) -> IsolateId {
        match self {
            IsolateEvent::Created { isolate, .. }
            | IsolateEvent::PausedOnStart { isolate }
            | IsolateEvent::PausedOnExit { isolate }
            | IsolateEvent::Resumed { isolate }
            | IsolateEvent::UncaughtException { isolate, .. }
            | IsolateEvent::FatalError { isolate, .. }
            | IsolateEvent::Exited { isolate }
            | IsolateEvent::ShutDown { isolate } => *isolate,
        }
    }
}

/// Embedder handler for one event kind
pub type EventHandler = Arc<dyn Fn(&IsolateEvent) + Send + Sync>;

/// Handler table keyed by event kind
#[derive(Default)]
pub struct EventTable {
    handlers: RwLock<FxHashMap<EventKind, Vec<EventHandler>>>,
}

impl EventTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`. Handlers run in registration order.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&IsolateEvent) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Run every handler registered for the event's kind
    pub fn dispatch(&self, event: &IsolateEvent) {
        // Handlers may register more handlers
        let handlers = match self.handlers.read().get(&event.kind()) {
            Some(handlers) => handlers.clone(),
            None => return,
        };
        for handler in handlers {
            handler(event);
        }
    }

    /// Number of handlers registered for `kind`
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Remove every handler
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

impl fmt::Debug for EventTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("EventTable")
            .field("kinds", &handlers.len())
            .field("handlers", &handlers.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
