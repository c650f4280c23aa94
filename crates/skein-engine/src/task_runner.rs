//! Serial task runners
//!
//! The engine never owns threads for message processing. Embedders hand it
//! a [`TaskRunner`] per isolate; every drain for that isolate is posted to
//! the runner, which must execute tasks one at a time in FIFO order.
//!
//! Two runners are provided:
//! - [`ThreadTaskRunner`]: a dedicated named thread fed through a channel
//! - [`ManualTaskRunner`]: a queue drained explicitly by the caller, for
//!   deterministic single-threaded scenarios

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, trace};

/// A unit of work posted to a task runner
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Serial executor supplied by the embedder
pub trait TaskRunner: Send + Sync {
    /// Queue `task`; tasks run one at a time in posting order
    fn post_task(&self, task: Task);

    /// Whether the calling thread is the one executing this runner's tasks
    fn runs_tasks_on_current_thread(&self) -> bool;
}

/// The set of task runners an isolate is bound to
#[derive(Clone)]
pub struct TaskRunners {
    label: String,
    platform: Arc<dyn TaskRunner>,
    ui: Arc<dyn TaskRunner>,
}

impl TaskRunners {
    /// Bundle a platform runner and a UI runner. Isolate messages run on `ui`.
    pub fn new(
        label: impl Into<String>,
        platform: Arc<dyn TaskRunner>,
        ui: Arc<dyn TaskRunner>,
    ) -> Self {
        Self {
            label: label.into(),
            platform,
            ui,
        }
    }

    /// Use one runner for every role
    pub fn single(label: impl Into<String>, runner: Arc<dyn TaskRunner>) -> Self {
        Self::new(label, runner.clone(), runner)
    }

    /// Diagnostic label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Runner for embedder-facing work
    pub fn platform(&self) -> &Arc<dyn TaskRunner> {
        &self.platform
    }

    /// Runner that isolate message handling is serialized onto
    pub fn ui(&self) -> &Arc<dyn TaskRunner> {
        &self.ui
    }
}

impl fmt::Debug for TaskRunners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunners")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

fn run_guarded(runner: &str, task: Task) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!(runner, "task panicked; continuing with the next task");
    }
}

/// Task runner backed by a dedicated thread
pub struct ThreadTaskRunner {
    /// Thread name
    name: String,

    /// Sending half of the task channel (None once stopped)
    sender: Mutex<Option<Sender<Task>>>,

    /// Runner thread handle
    handle: Mutex<Option<JoinHandle<()>>>,

    /// Id of the runner thread
    thread_id: ThreadId,
}

impl ThreadTaskRunner {
    /// Spawn the runner thread
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let (sender, receiver) = channel::unbounded::<Task>();

        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(runner = %thread_name, "task runner started");
                for task in receiver {
                    run_guarded(&thread_name, task);
                }
                debug!(runner = %thread_name, "task runner shutting down");
            })
            .expect("Failed to spawn task runner thread");

        let thread_id = handle.thread().id();

        Arc::new(Self {
            name,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Runner thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting tasks, let queued tasks finish, and join the thread.
    ///
    /// When called from the runner thread itself the join is skipped; the
    /// thread exits after the current task returns.
    pub fn stop(&self) {
        // Dropping the sender closes the channel once queued tasks drain
        self.sender.lock().take();

        if thread::current().id() == self.thread_id {
            return;
        }

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!(runner = %self.name, "task runner thread panicked");
            }
        }
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl TaskRunner for ThreadTaskRunner {
    fn post_task(&self, task: Task) {
        match self.sender.lock().as_ref() {
            Some(sender) => {
                if sender.send(task).is_err() {
                    trace!(runner = %self.name, "runner thread gone; task dropped");
                }
            }
            None => trace!(runner = %self.name, "runner stopped; task dropped"),
        }
    }

    fn runs_tasks_on_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for ThreadTaskRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ThreadTaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadTaskRunner")
            .field("name", &self.name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Task runner drained explicitly by its owner
#[derive(Default)]
pub struct ManualTaskRunner {
    queue: Mutex<VecDeque<Task>>,
    draining_on: Mutex<Option<ThreadId>>,
}

impl ManualTaskRunner {
    /// Create an empty runner
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run the oldest queued task. Returns false if the queue was empty.
    pub fn run_one(&self) -> bool {
        let task = self.queue.lock().pop_front();
        match task {
            Some(task) => {
                let previous = self.draining_on.lock().replace(thread::current().id());
                run_guarded("manual", task);
                *self.draining_on.lock() = previous;
                true
            }
            None => false,
        }
    }

    /// Run tasks, including ones posted while running, until the queue is
    /// empty. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut count = 0;
        while self.run_one() {
            count += 1;
        }
        count
    }

    /// Drop every queued task without running it
    pub fn discard_pending(&self) -> usize {
        let mut queue = self.queue.lock();
        let count = queue.len();
        queue.clear();
        count
    }
}

impl TaskRunner for ManualTaskRunner {
    fn post_task(&self, task: Task) {
        self.queue.lock().push_back(task);
    }

    fn runs_tasks_on_current_thread(&self) -> bool {
        *self.draining_on.lock() == Some(thread::current().id())
    }
}
