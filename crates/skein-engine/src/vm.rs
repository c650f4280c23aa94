//! VM entry point
//!
//! A [`Vm`] owns the pieces every isolate it creates shares: the native
//! runtime, the isolate registry, and the event table. Creating a `Vm`
//! initializes the registry; [`Vm::teardown`] shuts down every live isolate
//! and clears it. Dropping the `Vm` tears it down.

use crate::error::{IsolateError, IsolateResult};
use crate::events::EventTable;
use crate::group::IsolateGroupData;
use crate::isolate::{Isolate, IsolateId};
use crate::native::{CodeUnit, NativeRuntime};
use crate::registry::IsolateRegistry;
use crate::settings::{IsolateSettings, RunRequest};
use crate::task_runner::TaskRunners;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

pub(crate) struct VmShared {
    pub(crate) runtime: Arc<dyn NativeRuntime>,
    pub(crate) registry: IsolateRegistry,
    pub(crate) events: Arc<EventTable>,
}

/// Isolate factory bound to one native runtime
pub struct Vm {
    shared: Arc<VmShared>,
}

impl Vm {
    /// Create a VM with a fresh registry
    pub fn new(runtime: Arc<dyn NativeRuntime>) -> Self {
        Self::with_registry(runtime, IsolateRegistry::new())
    }

    /// Create a VM that records isolates in `registry`
    pub fn with_registry(runtime: Arc<dyn NativeRuntime>, registry: IsolateRegistry) -> Self {
        debug!("vm initialized");
        Self {
            shared: Arc::new(VmShared {
                runtime,
                registry,
                events: Arc::new(EventTable::new()),
            }),
        }
    }

    /// Isolate registry
    pub fn registry(&self) -> &IsolateRegistry {
        &self.shared.registry
    }

    /// Event table shared by every isolate of this VM
    pub fn events(&self) -> &Arc<EventTable> {
        &self.shared.events
    }

    /// Look up a live isolate
    pub fn isolate(&self, id: IsolateId) -> Option<Arc<Isolate>> {
        self.shared.registry.isolate(id)
    }

    /// Number of registered isolates
    pub fn live_isolates(&self) -> usize {
        self.shared.registry.len()
    }

    /// Create a root isolate and its group. The isolate is returned in
    /// `Initialized`.
    pub fn create_root_isolate(
        &self,
        settings: &IsolateSettings,
        task_runners: TaskRunners,
    ) -> IsolateResult<Arc<Isolate>> {
        let snapshot = settings
            .snapshot
            .clone()
            .ok_or_else(|| IsolateError::SnapshotInvalid("no snapshot provided".to_string()))?;
        snapshot.validate()?;

        let group = Arc::new(IsolateGroupData::new(snapshot, settings));
        Isolate::create(&self.shared, group, task_runners, settings, true)
    }

    /// Create a root isolate, load `units`, and schedule the entrypoint.
    ///
    /// Any failure after creation shuts the isolate down before the error
    /// is returned, so a partially set up isolate is never handed out.
    pub fn create_running_root_isolate(
        &self,
        settings: &IsolateSettings,
        task_runners: TaskRunners,
        units: &[CodeUnit],
        request: &RunRequest,
    ) -> IsolateResult<Arc<Isolate>> {
        let isolate = self.create_root_isolate(settings, task_runners)?;

        let result = isolate
            .load_libraries()
            .and_then(|_| isolate.prepare_for_running(units))
            .and_then(|_| {
                isolate.run_entrypoint(
                    request.library.as_deref(),
                    request.function.as_deref(),
                    &request.args,
                )
            });

        if let Err(error) = result {
            error!(isolate = %isolate.id(), %error, "root isolate failed to start");
            isolate.shutdown();
            return Err(error);
        }
        Ok(isolate)
    }

    /// Shut down every live isolate and clear the registry.
    /// Returns the number of isolates this call shut down.
    pub fn teardown(&self) -> usize {
        let isolates = self.shared.registry.live_isolates();
        let count = isolates.iter().filter(|isolate| isolate.shutdown()).count();
        self.shared.registry.clear();
        info!(count, "vm torn down");
        count
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        if !self.shared.registry.is_empty() {
            self.teardown();
        }
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("registry", &self.shared.registry)
            .field("events", &self.shared.events)
            .finish_non_exhaustive()
    }
}
