//! Snapshot formatter producing JSON output.
//!
//! Byte-level encoder around a bounded buffer: fill the buffer, arm the
//! sink wakeup, write what the pipe accepts, and only once the buffer has
//! drained advance the inner state machine (and eventually the outer one).
//! A full pipe stalls the snapshot without losing data.
//!
//! Document shape:
//!
//! ```text
//! {"ts":<ts>,"root":"<path>","upserted":<NODE>,"deleted":<NODE>}
//! ```
//!
//! where a `<NODE>` object holds `"type"`, `"ts"`, `"mandatory"`, `"new"`
//! and `"value"` fields for timely data-bearing entries, and child entries
//! as nested named objects. The first pass covers live nodes; at the end of
//! it the formatter switches its filter to deleted nodes and requests one
//! more pass.

use bytes::BytesMut;
use tracing::trace;

use crate::error::HubError;
use crate::sample::codec::convert_to_json;
use crate::sample::DataType;
use crate::snapshot::pipe::{PipeWriter, WriteOutcome};
use crate::snapshot::{Formatter, StepCtx, FILTER_CREATED, FILTER_DELETED, FILTER_NORMAL};
use crate::tree::EntryType;

/// Filter bitmask for live node detection.
const LIVE_FILTERS: u32 = FILTER_CREATED | FILTER_NORMAL;

/// Inner formatter states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Start,
    SnapshotStep,
    NodeName,
    NodeOpen,
    NodeValues,
    NodeValueBody,
}

pub(crate) struct JsonFormatter {
    writer: PipeWriter,
    buffer: BytesMut,
    /// Offset of the next unsent byte in `buffer`.
    next: usize,
    needs_comma: bool,
    is_root: bool,
    next_state: State,
    filter: u32,
    scan: bool,
}

impl JsonFormatter {
    pub(crate) fn new(writer: PipeWriter, max_string_bytes: usize) -> Self {
        Self {
            writer,
            // Two extra bytes for the quotation marks around string values.
            buffer: BytesMut::with_capacity(max_string_bytes + 2),
            next: 0,
            needs_comma: false,
            is_root: true,
            next_state: State::Start,
            filter: LIVE_FILTERS,
            scan: true,
        }
    }

    /// Replaces the (drained) buffer contents and arms sending.
    fn buffer_str(&mut self, ctx: &StepCtx<'_>, prepend_comma: bool, text: &str) {
        debug_assert_eq!(self.next, 0, "buffering while unsent data remains");
        debug_assert!(self.buffer.is_empty(), "buffering while unsent data remains");
        self.append_str(ctx, prepend_comma, text);
    }

    /// Appends to the buffer contents and arms sending.
    fn append_str(&mut self, ctx: &StepCtx<'_>, prepend_comma: bool, text: &str) {
        if prepend_comma {
            self.buffer.extend_from_slice(b",");
        }
        self.buffer.extend_from_slice(text.as_bytes());
        self.enable_send(ctx);
    }

    fn enable_send(&mut self, ctx: &StepCtx<'_>) {
        self.writer.enable_writable();
        // The pipe may already have room and so never produce a wakeup on
        // its own; trigger an explicit send attempt.
        ctx.queue_wake();
    }

    /// Sends buffered bytes to the pipe; steps the inner machine once the
    /// buffer has fully drained.
    fn send_data(&mut self, ctx: &StepCtx<'_>) {
        let available = self.buffer.len() - self.next;
        if available == 0 {
            trace!("formatter.json.nothing_to_send");
            return;
        }
        match self.writer.write(&self.buffer[self.next..]) {
            WriteOutcome::Closed => {
                ctx.fail(HubError::Closed);
            }
            WriteOutcome::WouldBlock => {
                // Wait for the reader to free space.
            }
            WriteOutcome::Wrote(count) if count < available => {
                trace!(count, "formatter.json.sent_some");
                self.next += count;
            }
            WriteOutcome::Wrote(count) => {
                trace!(count, "formatter.json.sent_all");
                self.next = 0;
                self.buffer.clear();
                self.writer.disable_writable();
                self.step(ctx);
            }
        }
    }

    /// Transitions the inner state machine.
    fn step(&mut self, ctx: &StepCtx<'_>) {
        trace!(state = ?self.next_state, "formatter.json.step");
        match self.next_state {
            // Nothing has started yet; wait.
            State::Start => {}
            State::SnapshotStep => ctx.queue_step(),
            State::NodeName => self.node_name(ctx),
            State::NodeOpen => self.node_open(ctx),
            State::NodeValues => self.node_values(ctx),
            State::NodeValueBody => self.node_value_body(ctx),
        }
    }

    fn node_name(&mut self, ctx: &StepCtx<'_>) {
        let Some(node) = ctx.node() else { return };
        let name = node.name().to_string();
        trace!(name = %name, "formatter.json.node_name");
        self.buffer_str(ctx, false, &name);
        self.needs_comma = false;
        self.next_state = State::NodeOpen;
    }

    fn node_open(&mut self, ctx: &StepCtx<'_>) {
        let Some(node) = ctx.node().cloned() else { return };
        trace!(path = %node.absolute_path(), "formatter.json.node_open");

        // A non-root node is preceded by `"<name>`; close that off and open
        // the node object.
        let opening = if self.is_root { "{" } else { "\":{" };
        self.buffer_str(ctx, false, opening);
        self.is_root = false;
        self.needs_comma = false;

        self.next_state = match node.kind() {
            // Namespaces have no fields of their own; proceed to children.
            EntryType::Namespace => State::SnapshotStep,
            _ => {
                let has_value = node
                    .resource()
                    .as_ref()
                    .is_some_and(|res| res.current().is_some());
                if self.filter & LIVE_FILTERS != 0 && ctx.is_timely(&node) && has_value {
                    State::NodeValues
                } else {
                    // Just transiting this node to get somewhere more
                    // interesting.
                    State::SnapshotStep
                }
            }
        };
    }

    fn node_values(&mut self, ctx: &StepCtx<'_>) {
        let Some(node) = ctx.node().cloned() else { return };
        debug_assert!(self.filter & LIVE_FILTERS != 0);
        trace!(path = %node.absolute_path(), "formatter.json.node_values");

        let (sample, data_type) = {
            let guard = node.resource();
            let Some(res) = guard.as_ref() else { return };
            let Some(sample) = res.current().cloned() else { return };
            (sample, res.data_type())
        };

        let fields = format!(
            "\"type\":{},\"ts\":{:.6},\"mandatory\":{},\"new\":{}",
            data_type.code(),
            sample.timestamp(),
            node.is_mandatory(),
            node.is_new(),
        );
        self.buffer_str(ctx, false, &fields);
        self.needs_comma = true;

        match data_type {
            DataType::Trigger => {
                self.next_state = State::SnapshotStep;
            }
            DataType::Boolean | DataType::Numeric => {
                self.append_str(ctx, true, "\"value\":");
                let value =
                    convert_to_json(&sample, data_type).unwrap_or_else(|_| "null".to_string());
                self.append_str(ctx, false, &value);
                self.next_state = State::SnapshotStep;
            }
            DataType::String | DataType::Json => {
                self.append_str(ctx, true, "\"value\":");
                self.needs_comma = false;
                self.next_state = State::NodeValueBody;
            }
        }
    }

    fn node_value_body(&mut self, ctx: &StepCtx<'_>) {
        let Some(node) = ctx.node().cloned() else { return };
        // The value part of a key/value pair never takes a leading comma.
        debug_assert!(!self.needs_comma);
        trace!(path = %node.absolute_path(), "formatter.json.node_value_body");

        let body = {
            let guard = node.resource();
            guard
                .as_ref()
                .and_then(|res| {
                    res.current()
                        .map(|sample| convert_to_json(sample, res.data_type()))
                })
                .and_then(|converted| converted.ok())
                .unwrap_or_else(|| "null".to_string())
        };
        self.buffer_str(ctx, false, &body);
        self.needs_comma = true;
        self.next_state = State::SnapshotStep;
    }
}

impl Formatter for JsonFormatter {
    fn filter(&self) -> u32 {
        self.filter
    }

    fn scan(&self) -> bool {
        self.scan
    }

    fn start_tree(&mut self, ctx: &StepCtx<'_>) {
        trace!(filter = self.filter, "formatter.json.start_tree");
        if self.filter & LIVE_FILTERS != 0 {
            let path = ctx
                .node()
                .map(|node| node.absolute_path())
                .unwrap_or_else(|| "/".to_string());
            let header = format!(
                "{{\"ts\":{:.6},\"root\":\"{}\",\"upserted\":",
                ctx.timestamp(),
                path
            );
            self.buffer_str(ctx, false, &header);
        } else {
            self.buffer_str(ctx, true, "\"deleted\":");
        }
        // Wait for the buffer to drain, then step the outer machine.
        self.is_root = true;
        self.next_state = State::SnapshotStep;
    }

    fn begin_node(&mut self, ctx: &StepCtx<'_>) {
        if self.is_root {
            // The root node is opened without a key.
            trace!("formatter.json.begin_root");
            self.next_state = State::NodeOpen;
            self.needs_comma = false;
            self.step(ctx);
        } else {
            trace!("formatter.json.begin_child");
            let comma = self.needs_comma;
            self.buffer_str(ctx, comma, "\"");
            self.next_state = State::NodeName;
        }
    }

    fn end_node(&mut self, ctx: &StepCtx<'_>) {
        trace!("formatter.json.end_node");
        self.buffer_str(ctx, false, "}");
        self.needs_comma = true;
        self.next_state = State::SnapshotStep;
    }

    fn end_tree(&mut self, ctx: &StepCtx<'_>) {
        trace!(filter = self.filter, "formatter.json.end_tree");
        self.next_state = State::SnapshotStep;

        // After the live pass, ask for one more pass over deleted nodes.
        self.scan = self.filter & LIVE_FILTERS != 0;
        if self.scan {
            self.filter = FILTER_DELETED;
            self.needs_comma = true;
            // Nothing to output here; step directly.
            self.step(ctx);
        } else {
            self.buffer_str(ctx, false, "}");
            self.needs_comma = false;
        }
    }

    fn wake(&mut self, ctx: &StepCtx<'_>) {
        self.send_data(ctx);
    }

    fn close(&mut self) {
        trace!("formatter.json.close");
    }
}
