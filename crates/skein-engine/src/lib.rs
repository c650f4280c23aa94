//! Skein Engine
//!
//! This crate provides the isolate core of the Skein embedding layer:
//! - **Isolate lifecycle**: phase machine from `Uninitialized` to `Shutdown` (`isolate` module)
//! - **Isolate groups**: shared, immutable snapshot and embedder callbacks (`group` module)
//! - **Message dispatch**: cross-thread notifications serialized onto one task runner
//!   per isolate, with pause-on-start / pause-on-exit handling (`dispatcher` module)
//! - **Registry and events**: injectable isolate registry and a single event table
//!   for embedder hooks (`registry`, `events` modules)
//!
//! The engine never executes code itself. A [`NativeRuntime`] supplied by the
//! embedder creates native isolates, and a [`TaskRunner`] supplied by the
//! embedder executes drain tasks.
//!
//! # Example
//!
//! ```rust,ignore
//! use skein_engine::{IsolateSettings, RunRequest, Snapshot, TaskRunners, ThreadTaskRunner, Vm};
//!
//! let vm = Vm::new(runtime);
//! let runner = ThreadTaskRunner::new("skein.ui");
//! let settings = IsolateSettings::default().with_snapshot(Snapshot::from_data(bytes));
//! let isolate = vm.create_running_root_isolate(
//!     &settings,
//!     TaskRunners::single("root", runner),
//!     &units,
//!     &RunRequest::default(),
//! )?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod group;
pub mod isolate;
pub mod native;
pub mod phase;
pub mod registry;
pub mod scope;
pub mod settings;
pub mod snapshot;
pub mod task_runner;
pub mod vm;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{MessageDispatcher, MessageHandlerState};
pub use error::{ErrorKind, IsolateError, IsolateResult, RuntimeError};
pub use events::{EventHandler, EventKind, EventTable, IsolateEvent};
pub use group::{
    ChildIsolatePreparer, GroupCleanupCallback, GroupId, IsolateCallback, IsolateGroupData,
};
pub use isolate::{Isolate, IsolateId};
pub use native::{
    CodeUnit, Entrypoint, NativeIsolate, NativeIsolateConfig, NativeRuntime, ServiceOutcome,
    DEFAULT_ENTRYPOINT,
};
pub use phase::{AtomicPhase, Phase};
pub use registry::{IsolateRegistry, MessageNotifier};
pub use settings::{DispatcherOptions, IsolateSettings, RunRequest};
pub use snapshot::Snapshot;
pub use task_runner::{ManualTaskRunner, Task, TaskRunner, TaskRunners, ThreadTaskRunner};
pub use vm::Vm;
