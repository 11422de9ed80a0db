//! The snapshot engine: a two-level cooperative state machine.
//!
//! The outer machine (here) walks a delimited portion of the resource tree
//! depth first, using an explicit parent stack. Every transition is posted
//! to the hub event queue, so I/O wakeups, held pushes and other deferred
//! work interleave between steps. The inner machine lives in the formatter
//! ([`json`]), which buffers encoded bytes and only steps the outer machine
//! once its buffer has drained into the pipe.
//!
//! Before each pass a bottom-up visit marks per-node relevance against the
//! pass filter; irrelevant nodes are skipped without formatter callbacks.

pub(crate) mod json;
pub mod pipe;

use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::{HubError, Result};
use crate::hub::HubState;
use crate::sample::Timestamp;
use crate::tree::{Entry, EntryRef};

use self::pipe::PipeWriter;

/// Pass filter bit: newly created nodes.
pub const FILTER_CREATED: u32 = 0x1;
/// Pass filter bit: deleted nodes.
pub const FILTER_DELETED: u32 = 0x2;
/// Pass filter bit: nodes that are neither new nor deleted.
pub const FILTER_NORMAL: u32 = 0x4;

/// Snapshot flag: reap deletion records as they are visited.
pub const FLAG_FLUSH_DELETIONS: u32 = 0x1;

/// Snapshot output format: JSON.
pub const FORMAT_JSON: u32 = 0;

/// Terminal snapshot result callback.
pub type ResultCallback = Box<dyn FnOnce(Result<()>)>;

/// Outer state machine states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    NodeBegin,
    NodeChildren,
    NodeEnd,
    NodeSibling,
    TreeEnd,
}

/// Context handed to formatter callbacks: the current node and snapshot
/// parameters, plus deferred actions back into the engine.
pub(crate) struct StepCtx<'a> {
    hub: &'a Rc<HubState>,
    node: Option<EntryRef>,
    timestamp: Timestamp,
    since: Timestamp,
    flags: u32,
}

impl StepCtx<'_> {
    /// The node currently under consideration.
    pub(crate) fn node(&self) -> Option<&EntryRef> {
        self.node.as_ref()
    }

    pub(crate) fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[allow(dead_code)]
    pub(crate) fn flags(&self) -> u32 {
        self.flags
    }

    /// Whether the node changed inside the snapshot time window.
    pub(crate) fn is_timely(&self, entry: &EntryRef) -> bool {
        entry.last_modified() > self.since
    }

    /// Defers one outer state machine transition.
    pub(crate) fn queue_step(&self) {
        self.hub.defer(step);
    }

    /// Defers a formatter wakeup (an explicit send attempt).
    pub(crate) fn queue_wake(&self) {
        self.hub.defer(formatter_wake);
    }

    /// Defers snapshot termination with an error.
    pub(crate) fn fail(&self, err: HubError) {
        self.hub.defer(move |hub| end(hub, Err(err)));
    }
}

/// A pluggable snapshot formatter.
///
/// Each callback is one deferred action: the formatter buffers output, arms
/// the sink wakeup, and advances the outer machine via
/// [`StepCtx::queue_step`] once the buffered bytes have drained.
pub(crate) trait Formatter {
    /// Current pass filter mask.
    fn filter(&self) -> u32;
    /// Whether the formatter wants (another) pass over the tree.
    fn scan(&self) -> bool;
    /// Format the beginning of the whole tree (start of a pass).
    fn start_tree(&mut self, ctx: &StepCtx<'_>);
    /// Format the beginning of a relevant node.
    fn begin_node(&mut self, ctx: &StepCtx<'_>);
    /// Format the end of a relevant node.
    fn end_node(&mut self, ctx: &StepCtx<'_>);
    /// Format the end of a pass.
    fn end_tree(&mut self, ctx: &StepCtx<'_>);
    /// Sink-writable wakeup: push buffered bytes onward.
    fn wake(&mut self, ctx: &StepCtx<'_>);
    /// Tear down formatter state.
    fn close(&mut self);
}

/// One active snapshot operation. At most one exists per hub.
pub(crate) struct SnapshotJob {
    pub(crate) writer: PipeWriter,
    pub(crate) flags: u32,
    pub(crate) since: Timestamp,
    pub(crate) timestamp: Timestamp,
    pub(crate) max_passes: u32,
    passes: u32,
    next_state: State,
    node: Option<EntryRef>,
    root: EntryRef,
    parents: Vec<EntryRef>,
    pub(crate) formatter: Box<dyn Formatter>,
    callback: Option<ResultCallback>,
}

impl SnapshotJob {
    pub(crate) fn new(
        writer: PipeWriter,
        flags: u32,
        since: Timestamp,
        timestamp: Timestamp,
        max_passes: u32,
        root: EntryRef,
        formatter: Box<dyn Formatter>,
        callback: ResultCallback,
    ) -> Self {
        Self {
            writer,
            flags,
            since,
            timestamp,
            max_passes,
            passes: 0,
            next_state: State::NodeBegin,
            node: None,
            root,
            parents: Vec::new(),
            formatter,
            callback: Some(callback),
        }
    }
}

fn make_ctx<'a>(hub: &'a Rc<HubState>, job: &SnapshotJob) -> StepCtx<'a> {
    StepCtx {
        hub,
        node: job.node.clone(),
        timestamp: job.timestamp,
        since: job.since,
        flags: job.flags,
    }
}

/// Queues the next outer state machine transition.
pub(crate) fn step(hub: &Rc<HubState>) {
    let next = match hub.snapshot.borrow().as_ref() {
        Some(job) => job.next_state,
        None => return,
    };
    trace!(state = ?next, "snapshot.step");
    hub.defer(move |hub| match next {
        State::NodeBegin => node_begin(hub),
        State::NodeChildren => node_children(hub),
        State::NodeEnd => node_end(hub),
        State::NodeSibling => node_sibling(hub),
        State::TreeEnd => tree_end(hub),
    });
}

/// Delivers a sink wakeup to the formatter.
pub(crate) fn formatter_wake(hub: &Rc<HubState>) {
    let mut slot = hub.snapshot.borrow_mut();
    let Some(job) = slot.as_mut() else { return };
    let ctx = make_ctx(hub, job);
    job.formatter.wake(&ctx);
}

/// Starts one pass over the tree: recompute relevance, then let the
/// formatter open the pass.
pub(crate) fn start_pass(hub: &Rc<HubState>) {
    let mut slot = hub.snapshot.borrow_mut();
    let Some(job) = slot.as_mut() else { return };
    debug!(pass = job.passes, "snapshot.pass.start");
    job.next_state = State::NodeBegin;
    job.node = Some(job.root.clone());
    update_relevance(&job.root, &job.root, job.formatter.filter(), job.since);
    job.passes += 1;
    let ctx = make_ctx(hub, job);
    job.formatter.start_tree(&ctx);
}

fn node_begin(hub: &Rc<HubState>) {
    let mut slot = hub.snapshot.borrow_mut();
    let Some(job) = slot.as_mut() else { return };
    let Some(node) = job.node.clone() else { return };
    trace!(path = %node.absolute_path(), "snapshot.node.begin");

    if node.is_relevant() {
        // Deleted nodes are reported but never descended into.
        let child = if node.is_deleted() {
            None
        } else {
            node.first_child_ex(job.formatter.filter() & FILTER_DELETED != 0)
        };
        job.next_state = if child.is_none() {
            State::NodeEnd
        } else {
            State::NodeChildren
        };
        let ctx = make_ctx(hub, job);
        job.formatter.begin_node(&ctx);
    } else {
        job.next_state = State::NodeEnd;
        drop(slot);
        step(hub);
    }
}

fn node_children(hub: &Rc<HubState>) {
    let mut slot = hub.snapshot.borrow_mut();
    let Some(job) = slot.as_mut() else { return };
    let Some(node) = job.node.clone() else { return };
    trace!(path = %node.absolute_path(), "snapshot.node.children");

    let child = node.first_child_ex(job.formatter.filter() & FILTER_DELETED != 0);
    debug_assert!(child.is_some(), "entered children state without a child");
    job.parents.push(node);
    job.node = child;
    job.next_state = State::NodeBegin;
    drop(slot);
    step(hub);
}

fn node_end(hub: &Rc<HubState>) {
    let mut slot = hub.snapshot.borrow_mut();
    let Some(job) = slot.as_mut() else { return };
    let Some(node) = job.node.clone() else { return };
    trace!(path = %node.absolute_path(), "snapshot.node.end");

    job.next_state = State::NodeSibling;
    if node.is_relevant() {
        let ctx = make_ctx(hub, job);
        job.formatter.end_node(&ctx);
        node.clear_newness();
    } else {
        drop(slot);
        step(hub);
    }
}

fn node_sibling(hub: &Rc<HubState>) {
    let mut slot = hub.snapshot.borrow_mut();
    let Some(job) = slot.as_mut() else { return };
    let Some(node) = job.node.take() else { return };
    trace!(path = %node.absolute_path(), "snapshot.node.sibling");

    // The snapshot root delimits the walk; its tree siblings are not part of
    // this snapshot.
    let next = if Rc::ptr_eq(&node, &job.root) {
        None
    } else {
        node.next_sibling_ex(job.formatter.filter() & FILTER_DELETED != 0)
    };
    if job.flags & FLAG_FLUSH_DELETIONS != 0 && node.is_deleted() {
        Entry::unlink(&node);
    }

    match next {
        Some(sibling) => {
            job.node = Some(sibling);
            job.next_state = State::NodeBegin;
        }
        None => match job.parents.pop() {
            Some(parent) => {
                // Back out to the parent's level.
                job.node = Some(parent);
                job.next_state = State::NodeEnd;
            }
            None => {
                job.next_state = State::TreeEnd;
                let ctx = make_ctx(hub, job);
                job.formatter.end_tree(&ctx);
                return;
            }
        },
    }
    drop(slot);
    step(hub);
}

fn tree_end(hub: &Rc<HubState>) {
    let mut slot = hub.snapshot.borrow_mut();
    let Some(job) = slot.as_mut() else { return };
    debug_assert!(job.parents.is_empty(), "parents left on the stack at tree end");
    trace!(passes = job.passes, "snapshot.tree.end");

    let scan = job.formatter.scan();
    let passes = job.passes;
    let max_passes = job.max_passes;
    drop(slot);

    if scan && passes < max_passes {
        start_pass(hub);
    } else if passes >= max_passes {
        end(hub, Err(HubError::OutOfRange));
    } else {
        end(hub, Ok(()));
    }
}

/// Ends the snapshot: the single point where the formatter and pipe are
/// closed, the tree update lock is released, and the result callback is
/// queued.
pub(crate) fn end(hub: &Rc<HubState>, status: Result<()>) {
    let job = hub.snapshot.borrow_mut().take();
    let Some(mut job) = job else { return };
    debug!(ok = status.is_ok(), "snapshot.end");

    job.formatter.close();
    job.writer.close();
    hub.end_tree_update();
    if let Some(callback) = job.callback.take() {
        hub.defer(move |_| callback(status));
    }
}

/// Recomputes the per-pass relevance flag, bottom up.
///
/// A node is relevant when it qualifies under the filter on its own, or when
/// any child is relevant (intermediate nodes are retained to form a path
/// from the snapshot root to interesting leaves). Timeliness implies
/// relevance.
fn update_relevance(snapshot_root: &EntryRef, node: &EntryRef, filter: u32, since: Timestamp) {
    let mut relevant = false;
    let mut timely = false;

    if Rc::ptr_eq(node, snapshot_root) {
        relevant = true;
    } else if filter & FILTER_CREATED != 0 && node.is_new() {
        relevant = true;
    } else if filter & FILTER_DELETED != 0 && node.is_deleted() {
        relevant = true;
    } else if filter & (FILTER_CREATED | FILTER_NORMAL) != 0 {
        timely = node.last_modified() > since;
        relevant = timely;
    }

    let mut child = node.first_child_ex(true);
    while let Some(entry) = child {
        update_relevance(snapshot_root, &entry, filter, since);
        relevant = entry.is_relevant() || relevant;
        child = entry.next_sibling_ex(true);
    }

    trace!(
        path = %node.absolute_path(),
        relevant,
        "snapshot.relevance"
    );
    node.set_relevance(relevant);
    debug_assert!(!(timely && !relevant), "timely node must be relevant");
}

/// Records the deletion of a node. With tracking enabled the entry stays
/// linked, flagged deleted; otherwise it is unlinked immediately.
pub(crate) fn record_node_deletion(hub: &HubState, entry: &EntryRef) {
    if hub.deletions_tracked.get() {
        entry.set_deleted();
    } else {
        Entry::unlink(entry);
    }
}

/// Recursively removes every deletion record beneath `node`.
pub(crate) fn flush_deletion_records(node: &EntryRef) {
    let mut next = node.first_child_ex(true);
    while let Some(child) = next {
        next = child.next_sibling_ex(true);
        flush_deletion_records(&child);
        if child.is_deleted() {
            Entry::unlink(&child);
        }
    }
}
