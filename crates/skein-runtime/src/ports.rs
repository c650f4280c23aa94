//! Ports and mailboxes
//!
//! Each script isolate owns one [`Mailbox`] holding its user and service
//! queues. [`SendPort`]s address a receive port inside that mailbox's
//! isolate; they are cheap to clone, `Send`, and keep only a weak handle, so
//! a port outliving its isolate reports [`SendError::Closed`]. Posting
//! queues the message and then notifies the engine with no lock held.

use crate::catalog::ScriptFn;
use crate::error::SendError;
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use skein_engine::{Entrypoint, IsolateId, MessageNotifier};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Unique identifier for a receive port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(u64);

impl PortId {
    /// Create a new unique port ID
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        PortId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port-{}", self.0)
    }
}

/// A user-queue entry
#[derive(Debug, Clone)]
pub(crate) enum Envelope {
    /// Scheduled entrypoint invocation
    Start {
        entrypoint: Entrypoint,
        args: Vec<String>,
    },
    /// Payload for a receive port
    Message { port: PortId, payload: Value },
}

/// Control-plane message
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceMessage {
    /// End a pause on start or on exit
    Resume,
    /// Opaque request forwarded to the catalog's service handler
    Request(Value),
}

#[derive(Default)]
struct Queues {
    user: VecDeque<Envelope>,
    service: VecDeque<ServiceMessage>,
    closed: bool,
}

/// Message queues of one isolate
pub(crate) struct Mailbox {
    isolate: IsolateId,
    queues: Mutex<Queues>,
    notifier: MessageNotifier,
}

impl Mailbox {
    pub(crate) fn new(isolate: IsolateId, notifier: MessageNotifier) -> Arc<Self> {
        Arc::new(Self {
            isolate,
            queues: Mutex::new(Queues::default()),
            notifier,
        })
    }

    pub(crate) fn isolate(&self) -> IsolateId {
        self.isolate
    }

    pub(crate) fn post(&self, envelope: Envelope) -> Result<(), SendError> {
        {
            let mut queues = self.queues.lock();
            if queues.closed {
                return Err(SendError::Closed);
            }
            queues.user.push_back(envelope);
        }
        self.notifier.notify();
        Ok(())
    }

    pub(crate) fn post_service(&self, message: ServiceMessage) -> Result<(), SendError> {
        {
            let mut queues = self.queues.lock();
            if queues.closed {
                return Err(SendError::Closed);
            }
            queues.service.push_back(message);
        }
        self.notifier.notify();
        Ok(())
    }

    pub(crate) fn pop_user(&self) -> Option<Envelope> {
        self.queues.lock().user.pop_front()
    }

    pub(crate) fn pop_service(&self) -> Option<ServiceMessage> {
        self.queues.lock().service.pop_front()
    }

    pub(crate) fn pending_user(&self) -> usize {
        self.queues.lock().user.len()
    }

    pub(crate) fn has_service(&self) -> bool {
        !self.queues.lock().service.is_empty()
    }

    /// Reject further posts and drop everything queued
    pub(crate) fn close(&self) -> usize {
        let mut queues = self.queues.lock();
        queues.closed = true;
        let dropped = queues.user.len() + queues.service.len();
        queues.user.clear();
        queues.service.clear();
        dropped
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.queues.lock().closed
    }
}

/// Sending side of a receive port
#[derive(Clone)]
pub struct SendPort {
    id: PortId,
    isolate: IsolateId,
    mailbox: Weak<Mailbox>,
}

impl SendPort {
    pub(crate) fn new(id: PortId, mailbox: &Arc<Mailbox>) -> Self {
        Self {
            id,
            isolate: mailbox.isolate(),
            mailbox: Arc::downgrade(mailbox),
        }
    }

    /// Port id
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Isolate owning the receive side
    pub fn isolate_id(&self) -> IsolateId {
        self.isolate
    }

    /// Queue `payload` for the port's handler. Callable from any thread.
    pub fn send(&self, payload: Value) -> Result<(), SendError> {
        let mailbox = self.mailbox.upgrade().ok_or(SendError::Closed)?;
        mailbox.post(Envelope::Message {
            port: self.id,
            payload,
        })
    }
}

impl fmt::Debug for SendPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendPort")
            .field("id", &self.id)
            .field("isolate", &self.isolate)
            .finish()
    }
}

/// Handle for posting service messages to an isolate
#[derive(Clone)]
pub struct ServicePort {
    isolate: IsolateId,
    mailbox: Weak<Mailbox>,
}

impl ServicePort {
    pub(crate) fn new(mailbox: &Arc<Mailbox>) -> Self {
        Self {
            isolate: mailbox.isolate(),
            mailbox: Arc::downgrade(mailbox),
        }
    }

    /// Target isolate
    pub fn isolate_id(&self) -> IsolateId {
        self.isolate
    }

    /// Ask a paused isolate to resume
    pub fn resume(&self) -> Result<(), SendError> {
        self.post(ServiceMessage::Resume)
    }

    /// Forward an opaque request to the service handler
    pub fn request(&self, payload: Value) -> Result<(), SendError> {
        self.post(ServiceMessage::Request(payload))
    }

    fn post(&self, message: ServiceMessage) -> Result<(), SendError> {
        let mailbox = self.mailbox.upgrade().ok_or(SendError::Closed)?;
        mailbox.post_service(message)
    }
}

impl fmt::Debug for ServicePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePort")
            .field("isolate", &self.isolate)
            .finish()
    }
}

/// Receive ports of one isolate
#[derive(Default)]
pub(crate) struct PortTable {
    handlers: FxHashMap<PortId, ScriptFn>,
}

impl PortTable {
    pub(crate) fn open(&mut self, handler: ScriptFn) -> PortId {
        let id = PortId::new();
        self.handlers.insert(id, handler);
        id
    }

    pub(crate) fn close(&mut self, id: PortId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    pub(crate) fn handler(&self, id: PortId) -> Option<ScriptFn> {
        self.handlers.get(&id).cloned()
    }

    pub(crate) fn clear(&mut self) {
        self.handlers.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Process-wide table of named ports
#[derive(Clone, Default)]
pub struct PortDirectory {
    ports: Arc<DashMap<String, SendPort>>,
}

impl PortDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `port` under `name`, replacing any previous entry
    pub fn publish(&self, name: impl Into<String>, port: SendPort) {
        self.ports.insert(name.into(), port);
    }

    /// Look up a port by name
    pub fn lookup(&self, name: &str) -> Option<SendPort> {
        self.ports.get(name).map(|entry| entry.clone())
    }

    /// Remove a name. Returns false if it was not published.
    pub fn unpublish(&self, name: &str) -> bool {
        self.ports.remove(name).is_some()
    }

    /// Remove every port owned by `isolate`
    pub fn remove_isolate(&self, isolate: IsolateId) -> usize {
        let before = self.ports.len();
        self.ports.retain(|_, port| port.isolate != isolate);
        before.saturating_sub(self.ports.len())
    }

    /// Published names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ports.iter().map(|entry| entry.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Number of published ports
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Whether nothing is published
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

impl fmt::Debug for PortDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortDirectory")
            .field("names", &self.names())
            .finish()
    }
}
