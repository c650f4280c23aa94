//! Scripted native runtime for engine unit tests

use crate::error::RuntimeError;
use crate::events::EventKind;
use crate::isolate::{Isolate, IsolateId};
use crate::native::{
    CodeUnit, Entrypoint, NativeIsolate, NativeIsolateConfig, NativeRuntime, ServiceOutcome,
};
use crate::registry::MessageNotifier;
use crate::scope;
use crate::settings::IsolateSettings;
use crate::snapshot::Snapshot;
use crate::task_runner::{ManualTaskRunner, TaskRunners};
use crate::vm::Vm;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Code run by a handler while the drain is in progress
#[derive(Clone)]
pub(crate) struct Hook(Arc<dyn Fn() + Send + Sync>);

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook")
    }
}

#[derive(Debug, Clone)]
pub(crate) enum FakeMessage {
    Ok(String),
    Throw(String),
    Fatal(String),
    Run(Hook),
    ClosePort,
}

impl FakeMessage {
    pub(crate) fn ok(tag: impl Into<String>) -> Self {
        FakeMessage::Ok(tag.into())
    }

    pub(crate) fn throw(tag: impl Into<String>) -> Self {
        FakeMessage::Throw(tag.into())
    }

    pub(crate) fn fatal(tag: impl Into<String>) -> Self {
        FakeMessage::Fatal(tag.into())
    }

    pub(crate) fn run(hook: impl Fn() + Send + Sync + 'static) -> Self {
        FakeMessage::Run(Hook(Arc::new(hook)))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum FakeService {
    Resume,
    Ping,
}

#[derive(Default)]
pub(crate) struct FakeState {
    pub user: VecDeque<FakeMessage>,
    pub service: VecDeque<FakeService>,
    pub live_ports: usize,
    pub processed: Vec<String>,
    pub builtins_installed: usize,
    pub loaded_units: Vec<String>,
    pub fail_runnable: bool,
    pub scope_during_runnable: Option<Option<IsolateId>>,
    pub scope_during_shutdown: Option<Option<IsolateId>>,
    pub sticky: Option<RuntimeError>,
    pub shutdown_count: usize,
    pub started: Option<(Entrypoint, Vec<String>)>,
    pub notifier: Option<MessageNotifier>,
}

/// Test-side handle on one fake native isolate
#[derive(Clone)]
pub(crate) struct FakeHandle(Arc<Mutex<FakeState>>);

impl FakeHandle {
    pub(crate) fn post(&self, message: FakeMessage) -> bool {
        let notifier = {
            let mut state = self.0.lock();
            state.user.push_back(message);
            state.notifier.clone()
        };
        notifier.map_or(false, |notifier| notifier.notify())
    }

    pub(crate) fn post_service(&self, message: FakeService) -> bool {
        let notifier = {
            let mut state = self.0.lock();
            state.service.push_back(message);
            state.notifier.clone()
        };
        notifier.map_or(false, |notifier| notifier.notify())
    }

    pub(crate) fn processed(&self) -> Vec<String> {
        self.0.lock().processed.clone()
    }

    pub(crate) fn shutdown_count(&self) -> usize {
        self.0.lock().shutdown_count
    }

    pub(crate) fn state(&self) -> parking_lot::MutexGuard<'_, FakeState> {
        self.0.lock()
    }
}

struct FakeIsolate {
    state: Arc<Mutex<FakeState>>,
}

impl NativeIsolate for FakeIsolate {
    fn install_builtins(&mut self, _is_root: bool) -> Result<(), RuntimeError> {
        self.state.lock().builtins_installed += 1;
        Ok(())
    }

    fn load_code_unit(&mut self, unit: &CodeUnit) -> Result<(), RuntimeError> {
        if unit.bytes() == b"bad" {
            return Err(RuntimeError::compile(format!(
                "could not parse {}",
                unit.name()
            )));
        }
        self.state.lock().loaded_units.push(unit.name().to_string());
        Ok(())
    }

    fn make_runnable(&mut self) -> Result<(), String> {
        let mut state = self.state.lock();
        state.scope_during_runnable = Some(scope::current());
        if state.fail_runnable {
            return Err("runtime refused to finalize loading".to_string());
        }
        Ok(())
    }

    fn resolve_entrypoint(
        &self,
        library: Option<&str>,
        function: &str,
    ) -> Result<Entrypoint, RuntimeError> {
        if function == "missing" {
            return Err(RuntimeError::compile("function 'missing' not found"));
        }
        Ok(Entrypoint {
            library: library.unwrap_or("root").to_string(),
            function: function.to_string(),
        })
    }

    fn invoke_entrypoint(
        &mut self,
        entrypoint: &Entrypoint,
        args: &[String],
    ) -> Result<(), RuntimeError> {
        let notifier = {
            let mut state = self.state.lock();
            state.started = Some((entrypoint.clone(), args.to_vec()));
            state.live_ports += 1;
            state.user.push_back(FakeMessage::ok("start"));
            state.notifier.clone()
        };
        if let Some(notifier) = notifier {
            notifier.notify();
        }
        Ok(())
    }

    fn handle_pending_messages(&mut self) -> Result<(), RuntimeError> {
        let batch = self.state.lock().user.len();
        for _ in 0..batch {
            let message = match self.state.lock().user.pop_front() {
                Some(message) => message,
                None => break,
            };
            // Hooks run without the fake's own lock, like real handler code
            if let FakeMessage::Run(hook) = message {
                (hook.0)();
                self.state.lock().processed.push("run".to_string());
                continue;
            }
            let mut state = self.state.lock();
            match message {
                FakeMessage::Ok(tag) => state.processed.push(tag),
                FakeMessage::Throw(tag) => {
                    let error = RuntimeError::unhandled(format!("{tag} threw"));
                    state.processed.push(tag);
                    state.sticky = Some(error.clone());
                    return Err(error);
                }
                FakeMessage::Fatal(tag) => {
                    let error = RuntimeError::fatal(format!("{tag} was fatal"));
                    state.processed.push(tag);
                    state.sticky = Some(error.clone());
                    return Err(error);
                }
                FakeMessage::ClosePort => {
                    state.live_ports = state.live_ports.saturating_sub(1);
                }
                FakeMessage::Run(_) => {}
            }
        }
        Ok(())
    }

    fn handle_service_messages(&mut self) -> Result<ServiceOutcome, RuntimeError> {
        let mut state = self.state.lock();
        if state.service.is_empty() {
            return Ok(ServiceOutcome::Idle);
        }
        while let Some(message) = state.service.pop_front() {
            match message {
                FakeService::Resume => return Ok(ServiceOutcome::Resume),
                FakeService::Ping => state.processed.push("service:ping".to_string()),
            }
        }
        Ok(ServiceOutcome::Handled)
    }

    fn has_live_ports(&self) -> bool {
        self.state.lock().live_ports > 0
    }

    fn has_pending_messages(&self) -> bool {
        !self.state.lock().user.is_empty()
    }

    fn sticky_error(&self) -> Option<RuntimeError> {
        self.state.lock().sticky.clone()
    }

    fn shutdown(&mut self) {
        let mut state = self.state.lock();
        state.scope_during_shutdown = Some(scope::current());
        state.shutdown_count += 1;
        state.user.clear();
        state.service.clear();
    }
}

#[derive(Default)]
pub(crate) struct FakeRuntime {
    handles: Mutex<Vec<FakeHandle>>,
    fail_create: AtomicBool,
}

impl FakeRuntime {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub(crate) fn handle(&self, index: usize) -> FakeHandle {
        self.handles.lock()[index].clone()
    }

    pub(crate) fn created(&self) -> usize {
        self.handles.lock().len()
    }
}

impl NativeRuntime for FakeRuntime {
    fn create_isolate(
        &self,
        config: NativeIsolateConfig<'_>,
    ) -> Result<Box<dyn NativeIsolate>, String> {
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(format!("cannot create {}", config.debug_name));
        }
        let state = Arc::new(Mutex::new(FakeState {
            notifier: Some(config.notifier),
            ..Default::default()
        }));
        self.handles.lock().push(FakeHandle(state.clone()));
        Ok(Box::new(FakeIsolate { state }))
    }
}

pub(crate) fn test_settings() -> IsolateSettings {
    IsolateSettings::default()
        .with_snapshot(Snapshot::from_data(vec![0xAB; 16]).with_label("test"))
        .with_debug_name("test-root")
}

pub(crate) fn root_isolate(
    settings: IsolateSettings,
) -> (Vm, Arc<FakeRuntime>, Arc<ManualTaskRunner>, Arc<Isolate>) {
    let runtime = FakeRuntime::new();
    let vm = Vm::new(runtime.clone());
    let runner = ManualTaskRunner::new();
    let isolate = vm
        .create_root_isolate(&settings, TaskRunners::single("test", runner.clone()))
        .unwrap();
    (vm, runtime, runner, isolate)
}

/// A root isolate whose entrypoint has been scheduled but not yet drained
pub(crate) fn running_isolate(
    settings: IsolateSettings,
) -> (Vm, Arc<FakeRuntime>, Arc<ManualTaskRunner>, Arc<Isolate>) {
    let (vm, runtime, runner, isolate) = root_isolate(settings);
    isolate.load_libraries().unwrap();
    isolate
        .prepare_for_running(&[CodeUnit::from_text("app", "library app")])
        .unwrap();
    isolate.run_entrypoint(None, None, &[]).unwrap();
    (vm, runtime, runner, isolate)
}

pub(crate) fn record_events(vm: &Vm) -> Arc<Mutex<Vec<EventKind>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        EventKind::Created,
        EventKind::PausedOnStart,
        EventKind::PausedOnExit,
        EventKind::Resumed,
        EventKind::UncaughtException,
        EventKind::FatalError,
        EventKind::Exited,
        EventKind::ShutDown,
    ] {
        let seen = seen.clone();
        vm.events().on(kind, move |event| seen.lock().push(event.kind()));
    }
    seen
}
