//! The hub facade: one embedded broker instance.
//!
//! [`DataHub`] owns the resource tree, the allocation pools, the deferred
//! event queue and the (at most one) active snapshot. The public surface is
//! split the way the external APIs are: the publisher operations in [`io`],
//! the administrative operations in [`admin`] and the snapshot/query
//! operations in [`query`].

pub mod admin;
pub mod io;
pub mod query;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::config::HubConfig;
use crate::event::Dispatcher;
use crate::resource;
use crate::sample::{DataType, Sample, SamplePools};
use crate::snapshot::SnapshotJob;
use crate::tree::{Entry, EntryType, Tree};

/// What happened to a tree entry, as reported to tree-change handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeChangeOp {
    /// The entry was created (or recreated over a placeholder).
    Added,
    /// The entry was deleted (possibly leaving a placeholder behind).
    Removed,
}

/// Opaque registration handle for push and tree-change handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandlerId(pub(crate) u64);

/// Tree-change callback: `(path, entry type, operation)`.
pub type TreeChangeCallback = Rc<dyn Fn(&str, EntryType, TreeChangeOp)>;

/// A value push held back while a snapshot has the tree paused.
pub(crate) struct PendingPush {
    path: String,
    data_type: DataType,
    sample: Sample,
}

pub(crate) struct HubState {
    pub(crate) cfg: HubConfig,
    pub(crate) tree: Tree,
    pub(crate) pools: SamplePools,
    pub(crate) events: Dispatcher,
    pub(crate) snapshot: RefCell<Option<SnapshotJob>>,
    pub(crate) deletions_tracked: Cell<bool>,
    pending_pushes: RefCell<VecDeque<PendingPush>>,
    next_handler_id: Cell<u64>,
    push_handlers: RefCell<HashMap<u64, Weak<Entry>>>,
    tree_watchers: RefCell<Vec<(u64, TreeChangeCallback)>>,
}

impl HubState {
    /// Queues `f` for deferred execution. The closure holds only a weak
    /// reference, so a dropped hub drains to no-ops instead of leaking.
    pub(crate) fn defer(self: &Rc<Self>, f: impl FnOnce(&Rc<HubState>) + 'static) {
        let weak = Rc::downgrade(self);
        self.events.queue_fn(move || {
            if let Some(hub) = weak.upgrade() {
                f(&hub);
            }
        });
    }

    pub(crate) fn next_id(&self) -> u64 {
        let id = self.next_handler_id.get() + 1;
        self.next_handler_id.set(id);
        id
    }

    /// Releases the tree update lock and, once fully released, re-queues
    /// every held push in arrival order.
    pub(crate) fn end_tree_update(self: &Rc<Self>) {
        self.tree.end_update();
        if self.tree.is_update_paused() {
            return;
        }
        let held: Vec<PendingPush> = self.pending_pushes.borrow_mut().drain(..).collect();
        if !held.is_empty() {
            debug!(count = held.len(), "hub.pushes.released");
        }
        for push in held {
            self.defer(move |hub| hub.apply_push(push));
        }
    }

    pub(crate) fn hold_push(&self, path: &str, data_type: DataType, sample: Sample) {
        self.pending_pushes.borrow_mut().push_back(PendingPush {
            path: path.to_string(),
            data_type,
            sample,
        });
    }

    fn apply_push(&self, push: PendingPush) {
        if let Ok(entry) = self.tree.find_at_absolute_path(&push.path) {
            resource::push(&entry, push.data_type, "", push.sample, &self.pools);
        }
    }

    pub(crate) fn register_push_handler(&self, id: u64, entry: &Rc<Entry>) {
        self.push_handlers
            .borrow_mut()
            .insert(id, Rc::downgrade(entry));
    }

    pub(crate) fn unregister_push_handler(&self, id: u64) -> Option<Rc<Entry>> {
        self.push_handlers
            .borrow_mut()
            .remove(&id)
            .and_then(|weak| weak.upgrade())
    }

    pub(crate) fn add_tree_watcher(&self, id: u64, callback: TreeChangeCallback) {
        self.tree_watchers.borrow_mut().push((id, callback));
    }

    pub(crate) fn remove_tree_watcher(&self, id: u64) {
        self.tree_watchers
            .borrow_mut()
            .retain(|(watcher_id, _)| *watcher_id != id);
    }

    /// Queues tree-change notifications for every registered watcher.
    pub(crate) fn notify_tree_change(
        self: &Rc<Self>,
        path: String,
        kind: EntryType,
        op: TreeChangeOp,
    ) {
        let watchers: Vec<TreeChangeCallback> = self
            .tree_watchers
            .borrow()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in watchers {
            let path = path.clone();
            self.defer(move |_| callback(&path, kind, op));
        }
    }
}

/// An embedded Data Hub instance.
///
/// Single-threaded and cooperatively scheduled: mutations, handler
/// callbacks and snapshot progress all run on the hub's own event queue,
/// which the embedding program drives with [`DataHub::run_until_idle`].
pub struct DataHub {
    pub(crate) inner: Rc<HubState>,
}

impl DataHub {
    /// Creates a hub with default configuration.
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Creates a hub with the given configuration.
    pub fn with_config(cfg: HubConfig) -> Self {
        let pools = SamplePools::new(&cfg);
        Self {
            inner: Rc::new(HubState {
                cfg,
                tree: Tree::new(),
                pools,
                events: Dispatcher::new(),
                snapshot: RefCell::new(None),
                deletions_tracked: Cell::new(false),
                pending_pushes: RefCell::new(VecDeque::new()),
                next_handler_id: Cell::new(0),
                push_handlers: RefCell::new(HashMap::new()),
                tree_watchers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Runs queued deferred work until the event queue is empty.
    pub fn run_until_idle(&self) {
        self.inner.events.run_until_idle();
    }

    /// Whether any deferred work is pending.
    pub fn is_idle(&self) -> bool {
        self.inner.events.is_idle()
    }

    /// Handle to the hub's allocation pools (for building samples by hand,
    /// e.g. for [`crate::sample::codec::extract_json`]).
    pub fn pools(&self) -> SamplePools {
        self.inner.pools.clone()
    }

    /// The hub's configuration.
    pub fn config(&self) -> &HubConfig {
        &self.inner.cfg
    }
}

impl Default for DataHub {
    fn default() -> Self {
        Self::new()
    }
}
