//! Query API: value readers, snapshots and deletion tracking.

use std::rc::Rc;

use tracing::{debug, info};

use crate::error::{HubError, Result};
use crate::sample::{now, DataType, Sample, Timestamp};
use crate::snapshot::json::JsonFormatter;
use crate::snapshot::pipe::{pipe, SnapshotReader};
use crate::snapshot::{self, Formatter, SnapshotJob, FORMAT_JSON};

use super::DataHub;

impl DataHub {
    /// The resource's current data type.
    pub fn get_data_type(&self, path: &str) -> Result<DataType> {
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        let guard = entry.resource();
        let res = guard.as_ref().ok_or(HubError::NotFound)?;
        Ok(res.data_type())
    }

    /// The resource's units string.
    pub fn get_units(&self, path: &str) -> Result<String> {
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        let guard = entry.resource();
        let res = guard.as_ref().ok_or(HubError::NotFound)?;
        Ok(res.units().to_string())
    }

    /// The resource's current value and data type, if it has one.
    pub fn get_current_value(&self, path: &str) -> Result<Option<(DataType, Sample)>> {
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        let guard = entry.resource();
        let res = guard.as_ref().ok_or(HubError::NotFound)?;
        Ok(res.current().map(|sample| (res.data_type(), sample.clone())))
    }

    /// The last accepted pushed value and its data type, before any
    /// override substitution.
    pub fn get_pushed_value(&self, path: &str) -> Result<Option<(DataType, Sample)>> {
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        let guard = entry.resource();
        let res = guard.as_ref().ok_or(HubError::NotFound)?;
        Ok(res.pushed().map(|sample| (res.pushed_type(), sample.clone())))
    }

    /// Captures a snapshot of the tree at and beneath `path`, encoded by the
    /// formatter selected with `format` and streamed through the returned
    /// reader. Only values changed after `since` are included
    /// ([`crate::sample::BEGINNING_OF_TIME`] requests everything).
    ///
    /// The terminal result always arrives through `callback`; `None` is
    /// returned when no stream could be set up (the callback still fires,
    /// e.g. with `Busy` when a snapshot is already running).
    pub fn take_snapshot(
        &self,
        format: u32,
        flags: u32,
        path: &str,
        since: Timestamp,
        callback: impl FnOnce(Result<()>) + 'static,
    ) -> Option<SnapshotReader> {
        let state = &self.inner;

        if state.snapshot.borrow().is_some() {
            state.defer(move |_| callback(Err(HubError::Busy)));
            return None;
        }

        // Pause tree updates for the duration of the scan.
        state.tree.start_update();

        let (writer, reader) = pipe(state.cfg.pipe_capacity);
        let weak = Rc::downgrade(state);
        writer.set_waker(Rc::new(move || {
            if let Some(hub) = weak.upgrade() {
                hub.defer(snapshot::formatter_wake);
            }
        }));

        let formatter: Box<dyn Formatter> = match format {
            FORMAT_JSON => Box::new(JsonFormatter::new(
                writer.clone(),
                state.cfg.max_string_bytes,
            )),
            _ => {
                writer.close();
                state.end_tree_update();
                state.defer(move |_| callback(Err(HubError::NotImplemented)));
                return None;
            }
        };

        if !formatter.scan() {
            writer.close();
            state.end_tree_update();
            state.defer(move |_| callback(Err(HubError::Unsupported)));
            return None;
        }

        let root = match state.tree.find_at_absolute_path(path) {
            Ok(root) => root,
            Err(err) => {
                writer.close();
                state.end_tree_update();
                state.defer(move |_| callback(Err(err)));
                return None;
            }
        };

        info!(path = %root.absolute_path(), flags, since, "snapshot.start");
        *state.snapshot.borrow_mut() = Some(SnapshotJob::new(
            writer,
            flags,
            since,
            now(),
            state.cfg.max_passes,
            root,
            formatter,
            Box::new(callback),
        ));
        snapshot::start_pass(state);
        Some(reader)
    }

    /// Controls whether deletion records are maintained. Disabling tracking
    /// flushes every existing record.
    pub fn track_deletions(&self, on: bool) {
        let state = &self.inner;
        state.deletions_tracked.set(on);
        debug!(on, "hub.deletions.tracking");
        if !on {
            state.tree.start_update();
            snapshot::flush_deletion_records(&state.tree.root());
            state.end_tree_update();
        }
    }
}
