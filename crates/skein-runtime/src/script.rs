//! Script runtime
//!
//! [`ScriptRuntime`] is the native runtime behind the engine: it turns code
//! units into linked catalog libraries, keeps each isolate's mailbox and
//! receive ports, and runs script functions when the engine drains
//! messages. Everything here runs on the isolate's task runner except
//! posting to mailboxes.

use crate::catalog::{LibraryCatalog, ScriptFn};
use crate::context::ScriptContext;
use crate::error::ScriptError;
use crate::ports::{Envelope, Mailbox, PortDirectory, PortTable, ServiceMessage, ServicePort};
use crate::unit::UnitManifest;
use dashmap::DashMap;
use serde_json::Value;
use skein_engine::{
    scope, CodeUnit, Entrypoint, IsolateId, NativeIsolate, NativeIsolateConfig, NativeRuntime,
    RuntimeError, ServiceOutcome,
};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

type MailboxMap = DashMap<IsolateId, Weak<Mailbox>>;

/// Native runtime running catalog functions
pub struct ScriptRuntime {
    catalog: Arc<LibraryCatalog>,
    directory: PortDirectory,
    max_isolates: Option<usize>,
    live: Arc<AtomicUsize>,
    mailboxes: Arc<MailboxMap>,
}

impl ScriptRuntime {
    /// Create a runtime over `catalog`
    pub fn new(catalog: LibraryCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
            directory: PortDirectory::new(),
            max_isolates: None,
            live: Arc::new(AtomicUsize::new(0)),
            mailboxes: Arc::new(DashMap::new()),
        }
    }

    /// Limit the number of native isolates alive at once
    pub fn with_max_isolates(mut self, max_isolates: Option<usize>) -> Self {
        self.max_isolates = max_isolates;
        self
    }

    /// Library catalog
    pub fn catalog(&self) -> &LibraryCatalog {
        &self.catalog
    }

    /// Named port directory shared by every isolate of this runtime
    pub fn directory(&self) -> &PortDirectory {
        &self.directory
    }

    /// Native isolates created and not yet shut down
    pub fn live_isolates(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Service port of a live isolate
    pub fn service_port(&self, isolate: IsolateId) -> Option<ServicePort> {
        let mailbox = self
            .mailboxes
            .get(&isolate)
            .and_then(|entry| entry.upgrade())?;
        Some(ServicePort::new(&mailbox))
    }

    fn reserve_slot(&self) -> Result<LiveToken, String> {
        let max = self.max_isolates;
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                max.map_or(true, |max| live < max).then_some(live + 1)
            })
            .map_err(|live| format!("isolate limit reached ({live} live)"))?;
        Ok(LiveToken(self.live.clone()))
    }
}

impl NativeRuntime for ScriptRuntime {
    fn create_isolate(
        &self,
        config: NativeIsolateConfig<'_>,
    ) -> Result<Box<dyn NativeIsolate>, String> {
        let live = self.reserve_slot()?;

        let mailbox = Mailbox::new(config.id, config.notifier);
        self.mailboxes.insert(config.id, Arc::downgrade(&mailbox));

        debug!(
            isolate = %config.id,
            name = config.debug_name,
            script = config.advisory_script_uri,
            snapshot_bytes = config.snapshot.size(),
            is_root = config.is_root,
            "script isolate created"
        );

        Ok(Box::new(ScriptIsolate {
            id: config.id,
            catalog: self.catalog.clone(),
            directory: self.directory.clone(),
            mailboxes: self.mailboxes.clone(),
            mailbox,
            linked: Vec::new(),
            root_library: None,
            ports: PortTable::default(),
            sticky: None,
            _live: live,
        }))
    }
}

impl fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("catalog", &self.catalog)
            .field("max_isolates", &self.max_isolates)
            .field("live", &self.live_isolates())
            .finish()
    }
}

/// Holds one slot of the runtime's live-isolate count
struct LiveToken(Arc<AtomicUsize>);

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// What one queued entry runs
struct Invocation {
    function: ScriptFn,
    library: String,
    args: Vec<String>,
    port: Option<crate::ports::PortId>,
    payload: Value,
}

struct ScriptIsolate {
    id: IsolateId,
    catalog: Arc<LibraryCatalog>,
    directory: PortDirectory,
    mailboxes: Arc<MailboxMap>,
    mailbox: Arc<Mailbox>,
    linked: Vec<String>,
    root_library: Option<String>,
    ports: PortTable,
    sticky: Option<RuntimeError>,
    _live: LiveToken,
}

impl ScriptIsolate {
    fn link(&mut self, library: &str) {
        if !self.linked.iter().any(|linked| linked == library) {
            trace!(isolate = %self.id, library, "library linked");
            self.linked.push(library.to_string());
        }
    }

    fn is_linked(&self, library: &str) -> bool {
        self.linked.iter().any(|linked| linked == library)
    }

    fn invocation(&self, envelope: Envelope) -> Option<Invocation> {
        match envelope {
            Envelope::Start { entrypoint, args } => {
                let function = self
                    .catalog
                    .get(&entrypoint.library)
                    .and_then(|library| library.function(&entrypoint.function))
                    .cloned()?;
                let payload = Value::Array(args.iter().cloned().map(Value::String).collect());
                Some(Invocation {
                    function,
                    library: entrypoint.library,
                    args,
                    port: None,
                    payload,
                })
            }
            Envelope::Message { port, payload } => match self.ports.handler(port) {
                Some(function) => Some(Invocation {
                    function,
                    library: self.root_library.clone().unwrap_or_default(),
                    args: Vec::new(),
                    port: Some(port),
                    payload,
                }),
                None => {
                    trace!(isolate = %self.id, %port, "message for a closed port dropped");
                    None
                }
            },
        }
    }

    fn run(&mut self, invocation: Invocation) -> Result<(), RuntimeError> {
        let Invocation {
            function,
            library,
            args,
            port,
            payload,
        } = invocation;

        let result = {
            let mut context = ScriptContext::new(
                self.id,
                &library,
                &args,
                port,
                &mut self.ports,
                &self.mailbox,
                &self.directory,
            );
            panic::catch_unwind(AssertUnwindSafe(|| function(&mut context, payload)))
                .unwrap_or_else(|_| Err(ScriptError::fatal("script function panicked")))
        };

        result.map_err(|error| {
            let error = match error {
                ScriptError::Exception(message) => RuntimeError::unhandled(message),
                ScriptError::Fatal(message) => RuntimeError::fatal(message),
            };
            self.sticky = Some(error.clone());
            error
        })
    }

    fn forward_service_request(&self, request: &Value) {
        match self.catalog.service_handler() {
            Some(handler) => handler(self.id, request),
            None => trace!(isolate = %self.id, "service request without a handler dropped"),
        }
    }
}

impl NativeIsolate for ScriptIsolate {
    fn install_builtins(&mut self, is_root: bool) -> Result<(), RuntimeError> {
        let builtins: Vec<String> = self
            .catalog
            .builtin_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        for library in &builtins {
            self.link(library);
        }
        debug!(isolate = %self.id, is_root, count = builtins.len(), "builtins installed");
        Ok(())
    }

    fn load_code_unit(&mut self, unit: &CodeUnit) -> Result<(), RuntimeError> {
        let manifest = UnitManifest::parse(unit.name(), unit.bytes())?;

        // Validate everything before linking anything
        if let Some(missing) = manifest
            .libraries
            .iter()
            .find(|library| !self.catalog.contains(library))
        {
            return Err(RuntimeError::compile(format!(
                "{}: unknown library `{missing}`",
                unit.name()
            )));
        }
        if let Some(root) = &manifest.root {
            if !manifest.libraries.contains(root) && !self.is_linked(root) {
                return Err(RuntimeError::compile(format!(
                    "{}: root library `{root}` is not linked",
                    unit.name()
                )));
            }
        }

        for library in &manifest.libraries {
            self.link(library);
        }
        if let Some(root) = manifest.root {
            self.root_library = Some(root);
        } else if self.root_library.is_none() {
            self.root_library = manifest.libraries.first().cloned();
        }

        debug!(isolate = %self.id, unit = unit.name(), root = ?self.root_library, "code unit linked");
        Ok(())
    }

    fn make_runnable(&mut self) -> Result<(), String> {
        if let Some(current) = scope::current() {
            return Err(format!(
                "cannot finalize loading while {current} is current on this thread"
            ));
        }
        if self.root_library.is_none() {
            return Err("no root library was loaded".to_string());
        }
        Ok(())
    }

    fn resolve_entrypoint(
        &self,
        library: Option<&str>,
        function: &str,
    ) -> Result<Entrypoint, RuntimeError> {
        let library = library
            .or(self.root_library.as_deref())
            .ok_or_else(|| RuntimeError::compile("no root library to resolve against"))?;

        if !self.is_linked(library) {
            return Err(RuntimeError::compile(format!(
                "library `{library}` is not loaded"
            )));
        }
        let found = self
            .catalog
            .get(library)
            .and_then(|lib| lib.function(function))
            .is_some();
        if !found {
            return Err(RuntimeError::compile(format!(
                "function `{library}::{function}` not found"
            )));
        }

        Ok(Entrypoint {
            library: library.to_string(),
            function: function.to_string(),
        })
    }

    fn invoke_entrypoint(
        &mut self,
        entrypoint: &Entrypoint,
        args: &[String],
    ) -> Result<(), RuntimeError> {
        self.mailbox
            .post(Envelope::Start {
                entrypoint: entrypoint.clone(),
                args: args.to_vec(),
            })
            .map_err(|error| RuntimeError::fatal(format!("cannot schedule {entrypoint}: {error}")))
    }

    fn handle_pending_messages(&mut self) -> Result<(), RuntimeError> {
        while let Some(message) = self.mailbox.pop_service() {
            match message {
                ServiceMessage::Request(request) => self.forward_service_request(&request),
                ServiceMessage::Resume => trace!(isolate = %self.id, "resume while running ignored"),
            }
        }

        let batch = self.mailbox.pending_user();
        for _ in 0..batch {
            let envelope = match self.mailbox.pop_user() {
                Some(envelope) => envelope,
                None => break,
            };
            if let Some(invocation) = self.invocation(envelope) {
                self.run(invocation)?;
            }
        }
        Ok(())
    }

    fn handle_service_messages(&mut self) -> Result<ServiceOutcome, RuntimeError> {
        if !self.mailbox.has_service() {
            return Ok(ServiceOutcome::Idle);
        }
        let mut outcome = ServiceOutcome::Idle;
        while let Some(message) = self.mailbox.pop_service() {
            match message {
                ServiceMessage::Resume => return Ok(ServiceOutcome::Resume),
                ServiceMessage::Request(request) => {
                    self.forward_service_request(&request);
                    outcome = ServiceOutcome::Handled;
                }
            }
        }
        Ok(outcome)
    }

    fn has_live_ports(&self) -> bool {
        !self.ports.is_empty()
    }

    fn has_pending_messages(&self) -> bool {
        self.mailbox.pending_user() > 0
    }

    fn sticky_error(&self) -> Option<RuntimeError> {
        self.sticky.clone()
    }

    fn shutdown(&mut self) {
        let dropped = self.mailbox.close();
        let unpublished = self.directory.remove_isolate(self.id);
        self.ports.clear();
        self.mailboxes.remove(&self.id);
        debug!(isolate = %self.id, dropped, unpublished, "script isolate shut down");
    }
}

impl Drop for ScriptIsolate {
    fn drop(&mut self) {
        if !self.mailbox.is_closed() {
            self.shutdown();
        }
    }
}
