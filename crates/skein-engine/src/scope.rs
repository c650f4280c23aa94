//! Current-isolate scope tracking
//!
//! Each thread has at most one isolate marked as current. Lifecycle
//! operations enter the isolate's scope while they talk to the native
//! runtime; operations the native runtime forbids while any isolate is
//! current (marking an isolate runnable) run inside an [`ExitedScope`].
//! Both guards restore the previous scope when dropped.

use crate::isolate::IsolateId;
use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static CURRENT: Cell<Option<IsolateId>> = const { Cell::new(None) };
}

/// The isolate current on this thread, if any
pub fn current() -> Option<IsolateId> {
    CURRENT.with(|cell| cell.get())
}

/// Whether `id` is the current isolate on this thread
pub fn is_current(id: IsolateId) -> bool {
    current() == Some(id)
}

/// Makes an isolate current until dropped
#[must_use = "the scope is exited as soon as the guard is dropped"]
pub struct IsolateScope {
    previous: Option<IsolateId>,
    // Scopes are thread-local state; the guard must not cross threads.
    _not_send: PhantomData<*const ()>,
}

impl IsolateScope {
    /// Enter `id`'s scope, remembering whatever was current before
    pub fn enter(id: IsolateId) -> Self {
        let previous = CURRENT.with(|cell| cell.replace(Some(id)));
        Self {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for IsolateScope {
    fn drop(&mut self) {
        CURRENT.with(|cell| cell.set(self.previous));
    }
}

/// Leaves the current scope until dropped, then re-enters it
#[must_use = "the scope is re-entered as soon as the guard is dropped"]
pub struct ExitedScope {
    saved: Option<IsolateId>,
    _not_send: PhantomData<*const ()>,
}

impl ExitedScope {
    /// Exit whatever isolate is current on this thread
    pub fn exit() -> Self {
        let saved = CURRENT.with(|cell| cell.take());
        Self {
            saved,
            _not_send: PhantomData,
        }
    }

    /// The isolate that will be re-entered on drop
    pub fn saved(&self) -> Option<IsolateId> {
        self.saved
    }
}

impl Drop for ExitedScope {
    fn drop(&mut self) {
        CURRENT.with(|cell| cell.set(self.saved));
    }
}
