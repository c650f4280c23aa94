//! Isolate groups
//!
//! Every isolate belongs to exactly one group. The group holds what its
//! isolates share: the snapshot, the advisory script location, and the
//! embedder callbacks. All of it is fixed at construction; only the live
//! isolate counter changes afterwards.

use crate::isolate::Isolate;
use crate::settings::IsolateSettings;
use crate::snapshot::Snapshot;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Unique identifier for an isolate group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(u64);

impl GroupId {
    /// Create a new unique group ID
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        GroupId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// Embedder hook receiving an isolate (create, shutdown, plugin registration)
pub type IsolateCallback = Arc<dyn Fn(&Isolate) + Send + Sync>;

/// Embedder hook run on spawned isolates; `false` rejects the spawn
pub type ChildIsolatePreparer = Arc<dyn Fn(&Isolate) -> bool + Send + Sync>;

/// Hook fired once when the last reference to a group goes away
pub type GroupCleanupCallback = Arc<dyn Fn() + Send + Sync>;

/// State shared by every isolate created from one snapshot
pub struct IsolateGroupData {
    id: GroupId,
    snapshot: Arc<Snapshot>,
    advisory_script_uri: String,
    advisory_script_entrypoint: String,
    isolate_create_callback: Option<IsolateCallback>,
    isolate_shutdown_callback: Option<IsolateCallback>,
    child_isolate_preparer: Option<ChildIsolatePreparer>,
    cleanup: Mutex<Option<GroupCleanupCallback>>,
    live_isolates: AtomicUsize,
}

impl IsolateGroupData {
    /// Build group data from a snapshot and the group-level settings
    pub fn new(snapshot: Arc<Snapshot>, settings: &IsolateSettings) -> Self {
        let id = GroupId::new();
        debug!(group = %id, snapshot = ?snapshot.label(), "isolate group created");

        Self {
            id,
            snapshot,
            advisory_script_uri: settings.advisory_script_uri.clone(),
            advisory_script_entrypoint: settings.advisory_script_entrypoint.clone(),
            isolate_create_callback: settings.isolate_create_callback.clone(),
            isolate_shutdown_callback: settings.isolate_shutdown_callback.clone(),
            child_isolate_preparer: settings.child_isolate_preparer.clone(),
            cleanup: Mutex::new(settings.group_cleanup_callback.clone()),
            live_isolates: AtomicUsize::new(0),
        }
    }

    /// Group identifier
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Snapshot every isolate in this group is created from
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// Diagnostic script URI
    pub fn advisory_script_uri(&self) -> &str {
        &self.advisory_script_uri
    }

    /// Diagnostic entrypoint name
    pub fn advisory_script_entrypoint(&self) -> &str {
        &self.advisory_script_entrypoint
    }

    /// Hook fired when an isolate of this group is created
    pub fn isolate_create_callback(&self) -> Option<&IsolateCallback> {
        self.isolate_create_callback.as_ref()
    }

    /// Hook fired once per isolate at teardown
    pub fn isolate_shutdown_callback(&self) -> Option<&IsolateCallback> {
        self.isolate_shutdown_callback.as_ref()
    }

    /// Hook run on spawned isolates
    pub fn child_isolate_preparer(&self) -> Option<&ChildIsolatePreparer> {
        self.child_isolate_preparer.as_ref()
    }

    /// Number of isolates attached and not yet torn down
    pub fn live_isolates(&self) -> usize {
        self.live_isolates.load(Ordering::Acquire)
    }

    pub(crate) fn isolate_attached(&self) {
        self.live_isolates.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn isolate_detached(&self) {
        let previous = self.live_isolates.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "isolate detached from an empty group");
        if previous == 1 {
            debug!(group = %self.id, "last live isolate detached");
        }
    }
}

impl Drop for IsolateGroupData {
    fn drop(&mut self) {
        debug!(group = %self.id, "isolate group destroyed");
        if let Some(cleanup) = self.cleanup.get_mut().take() {
            cleanup();
        }
    }
}

impl fmt::Debug for IsolateGroupData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolateGroupData")
            .field("id", &self.id)
            .field("snapshot", &self.snapshot)
            .field("advisory_script_uri", &self.advisory_script_uri)
            .field("advisory_script_entrypoint", &self.advisory_script_entrypoint)
            .field("live_isolates", &self.live_isolates())
            .finish_non_exhaustive()
    }
}
