//! Script execution context
//!
//! A [`ScriptContext`] is handed to every script function and port handler.
//! It is the only way script code touches its isolate: opening and closing
//! receive ports, publishing them by name, and sending to other ports.
//! An isolate stays alive while it has at least one open receive port.

use crate::catalog::ScriptFn;
use crate::error::{ScriptError, SendError};
use crate::ports::{Mailbox, PortDirectory, PortId, PortTable, SendPort};
use serde_json::Value;
use skein_engine::IsolateId;
use std::sync::Arc;
use tracing::trace;

/// View of the running isolate given to script code
pub struct ScriptContext<'a> {
    isolate: IsolateId,
    library: &'a str,
    args: &'a [String],
    current_port: Option<PortId>,
    ports: &'a mut PortTable,
    mailbox: &'a Arc<Mailbox>,
    directory: &'a PortDirectory,
}

impl<'a> ScriptContext<'a> {
    pub(crate) fn new(
        isolate: IsolateId,
        library: &'a str,
        args: &'a [String],
        current_port: Option<PortId>,
        ports: &'a mut PortTable,
        mailbox: &'a Arc<Mailbox>,
        directory: &'a PortDirectory,
    ) -> Self {
        Self {
            isolate,
            library,
            args,
            current_port,
            ports,
            mailbox,
            directory,
        }
    }

    /// Running isolate
    pub fn isolate_id(&self) -> IsolateId {
        self.isolate
    }

    /// Library of the running function (the entrypoint's library for handlers)
    pub fn library(&self) -> &str {
        self.library
    }

    /// Entrypoint arguments
    pub fn args(&self) -> &[String] {
        self.args
    }

    /// Port whose handler is running, if any
    pub fn current_port(&self) -> Option<PortId> {
        self.current_port
    }

    /// Open a receive port handled by `handler`
    pub fn open_port<F>(&mut self, handler: F) -> SendPort
    where
        F: Fn(&mut ScriptContext<'_>, Value) -> Result<(), ScriptError> + Send + Sync + 'static,
    {
        let handler: ScriptFn = Arc::new(handler);
        let id = self.ports.open(handler);
        trace!(isolate = %self.isolate, port = %id, "port opened");
        SendPort::new(id, self.mailbox)
    }

    /// Close a receive port. Messages already queued for it are dropped.
    pub fn close_port(&mut self, id: PortId) -> bool {
        self.ports.close(id)
    }

    /// Close the port whose handler is running
    pub fn close_current_port(&mut self) -> bool {
        match self.current_port {
            Some(id) => self.ports.close(id),
            None => false,
        }
    }

    /// Close every receive port, letting the isolate exit
    pub fn close_all_ports(&mut self) {
        self.ports.clear();
    }

    /// Number of open receive ports
    pub fn live_ports(&self) -> usize {
        self.ports.len()
    }

    /// Publish `port` under `name` in the process-wide directory
    pub fn publish(&self, name: impl Into<String>, port: &SendPort) {
        self.directory.publish(name, port.clone());
    }

    /// Look up a published port
    pub fn lookup(&self, name: &str) -> Option<SendPort> {
        self.directory.lookup(name)
    }

    /// Send `payload` to the port published as `name`
    pub fn send(&self, name: &str, payload: Value) -> Result<(), SendError> {
        self.directory
            .lookup(name)
            .ok_or_else(|| SendError::UnknownPort(name.to_string()))?
            .send(payload)
    }
}
