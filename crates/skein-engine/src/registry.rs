//! Isolate registry
//!
//! Maps isolate ids to the isolates themselves. The registry owns every
//! isolate from creation until its teardown unregisters it, so an embedder
//! may drop its handle while the isolate still has work to do. The registry
//! is created with its [`Vm`](crate::Vm) and cleared at VM teardown; tests
//! create as many independent registries as they like.
//!
//! Notifications never take a registry-wide lock: a lookup touches one
//! shard, clones the dispatcher handle, and drops the notification if the
//! isolate is gone.

use crate::dispatcher::MessageDispatcher;
use crate::isolate::{Isolate, IsolateId};
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;

type EntryMap = DashMap<IsolateId, Arc<Isolate>>;

/// Injectable table of live isolates
#[derive(Clone, Default)]
pub struct IsolateRegistry {
    entries: Arc<EntryMap>,
}

impl IsolateRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an isolate. The registry keeps it alive until it is
    /// unregistered.
    pub fn register(&self, isolate: &Arc<Isolate>) {
        self.entries.insert(isolate.id(), isolate.clone());
    }

    /// Remove an isolate. Returns false if it was not registered.
    pub fn unregister(&self, id: IsolateId) -> bool {
        // The shard lock is released before the isolate is dropped
        let removed = self.entries.remove(&id);
        removed.is_some()
    }

    /// Look up a live isolate
    pub fn isolate(&self, id: IsolateId) -> Option<Arc<Isolate>> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    /// Look up a live dispatcher
    pub fn dispatcher(&self, id: IsolateId) -> Option<Arc<MessageDispatcher>> {
        self.entries
            .get(&id)
            .map(|entry| entry.value().dispatcher().clone())
    }

    /// Deliver a message-arrival notification from any thread.
    ///
    /// Returns true if a drain was scheduled. Notifications for isolates
    /// that are gone or shutting down are dropped.
    pub fn notify(&self, id: IsolateId) -> bool {
        notify_entries(&self.entries, id)
    }

    /// A notifier bound to `id` for the native runtime to keep
    pub fn notifier(&self, id: IsolateId) -> MessageNotifier {
        MessageNotifier {
            id,
            entries: Arc::downgrade(&self.entries),
        }
    }

    /// Number of registered isolates
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no isolates are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of every registered isolate
    pub fn ids(&self) -> Vec<IsolateId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    /// Every registered isolate
    pub fn live_isolates(&self) -> Vec<Arc<Isolate>> {
        self.entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Drop every entry (VM teardown)
    pub fn clear(&self) {
        let ids = self.ids();
        for id in ids {
            self.unregister(id);
        }
    }
}

impl fmt::Debug for IsolateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolateRegistry")
            .field("isolates", &self.entries.len())
            .finish()
    }
}

fn notify_entries(entries: &EntryMap, id: IsolateId) -> bool {
    // The shard guard is released before the dispatcher runs
    let dispatcher = entries
        .get(&id)
        .map(|entry| entry.value().dispatcher().clone());

    match dispatcher {
        Some(dispatcher) => dispatcher.on_message_notify(),
        None => {
            trace!(isolate = %id, "notification for a torn-down isolate dropped");
            false
        }
    }
}

/// Handle the native runtime uses to report message arrival
///
/// Cheap to clone and safe to call from any thread, including after the
/// isolate or the whole registry is gone.
#[derive(Clone)]
pub struct MessageNotifier {
    id: IsolateId,
    entries: Weak<EntryMap>,
}

impl MessageNotifier {
    /// A notifier that is not attached to any registry
    pub fn detached(id: IsolateId) -> Self {
        Self {
            id,
            entries: Weak::new(),
        }
    }

    /// Isolate this notifier belongs to
    pub fn isolate_id(&self) -> IsolateId {
        self.id
    }

    /// Report that a message was queued. Returns true if a drain was scheduled.
    pub fn notify(&self) -> bool {
        match self.entries.upgrade() {
            Some(entries) => notify_entries(&entries, self.id),
            None => {
                trace!(isolate = %self.id, "notification after registry teardown dropped");
                false
            }
        }
    }
}

impl fmt::Debug for MessageNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageNotifier")
            .field("isolate", &self.id)
            .finish()
    }
}
