//! Host facade
//!
//! A [`Host`] wires the pieces an embedder would otherwise assemble by hand:
//! a [`Vm`] over a [`ScriptRuntime`], one named [`ThreadTaskRunner`] that
//! runs every isolate's messages, and the [`HostConfig`] they came from.

use crate::catalog::LibraryCatalog;
use crate::config::HostConfig;
use crate::error::HostError;
use crate::ports::{SendPort, ServicePort};
use crate::script::ScriptRuntime;
use skein_engine::{
    CodeUnit, EventTable, Isolate, IsolateId, IsolateSettings, RunRequest, Snapshot, TaskRunner,
    TaskRunners, ThreadTaskRunner, Vm,
};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Embedder entry point
pub struct Host {
    config: HostConfig,
    runtime: Arc<ScriptRuntime>,
    vm: Vm,
    runner: Arc<ThreadTaskRunner>,
}

impl Host {
    /// Create a host for `catalog`
    pub fn new(config: HostConfig, catalog: LibraryCatalog) -> Result<Self, HostError> {
        config.validate()?;

        let runtime =
            Arc::new(ScriptRuntime::new(catalog).with_max_isolates(config.limits.max_isolates));
        let vm = Vm::new(runtime.clone());
        let runner = ThreadTaskRunner::new(config.runner.thread_name.clone());

        info!(runner = runner.name(), "host started");
        Ok(Self {
            config,
            runtime,
            vm,
            runner,
        })
    }

    /// Create a host from a `skein.toml` file
    pub fn from_config_file(path: &Path, catalog: LibraryCatalog) -> Result<Self, HostError> {
        let config = HostConfig::from_file(path)?;
        Self::new(config, catalog)
    }

    /// Configuration in use
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Underlying VM
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Script runtime backing every isolate
    pub fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    /// Event table for embedder hooks
    pub fn events(&self) -> &Arc<EventTable> {
        self.vm.events()
    }

    /// Task runners handed to new isolates
    pub fn task_runners(&self) -> TaskRunners {
        let runner: Arc<dyn TaskRunner> = self.runner.clone();
        TaskRunners::single(self.config.runner.thread_name.clone(), runner)
    }

    /// Launch a root isolate configured from the host config
    pub fn launch(
        &self,
        snapshot: Snapshot,
        units: &[CodeUnit],
        request: &RunRequest,
    ) -> Result<Arc<Isolate>, HostError> {
        let settings = self.config.isolate_settings(snapshot);
        self.launch_with_settings(&settings, units, request)
    }

    /// Launch a root isolate with explicit settings.
    ///
    /// A request without a function runs the settings' advisory entrypoint.
    pub fn launch_with_settings(
        &self,
        settings: &IsolateSettings,
        units: &[CodeUnit],
        request: &RunRequest,
    ) -> Result<Arc<Isolate>, HostError> {
        let mut request = request.clone();
        if request.function.is_none() {
            request.function = Some(settings.advisory_script_entrypoint.clone());
        }

        let isolate =
            self.vm
                .create_running_root_isolate(settings, self.task_runners(), units, &request)?;
        Ok(isolate)
    }

    /// Service port of a live isolate
    pub fn service_port(&self, isolate: IsolateId) -> Option<ServicePort> {
        self.runtime.service_port(isolate)
    }

    /// Port published under `name`
    pub fn port(&self, name: &str) -> Option<SendPort> {
        self.runtime.directory().lookup(name)
    }

    /// Shut down every isolate and stop the runner thread.
    /// Returns the number of isolates shut down.
    pub fn shutdown(&self) -> usize {
        let count = self.vm.teardown();
        self.runner.stop();
        info!(count, "host shut down");
        count
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        if !self.runner.is_stopped() {
            self.shutdown();
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.config)
            .field("runtime", &self.runtime)
            .field("vm", &self.vm)
            .finish_non_exhaustive()
    }
}
