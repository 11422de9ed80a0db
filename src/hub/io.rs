//! Publisher API: resource creation, value pushes and push handlers.
//!
//! Creation is idempotent: recreating an existing resource with identical
//! kind, data type and units succeeds; any mismatch is `Duplicate`. Pushes
//! are best-effort: a sample dropped by a filter or a type mismatch is not
//! an error, and pushes arriving while a snapshot holds the tree are held
//! and applied when the lock is released.

use std::rc::Rc;

use tracing::info;

use crate::error::{HubError, Result};
use crate::resource::{self, PushCallback, Resource, MAX_UNITS_BYTES};
use crate::sample::{DataType, Sample, Timestamp, Value};
use crate::snapshot;
use crate::tree::EntryType;

use super::{DataHub, HandlerId, TreeChangeOp};

impl DataHub {
    /// Creates (or idempotently re-creates) an input resource.
    pub fn create_input(&self, path: &str, data_type: DataType, units: &str) -> Result<()> {
        self.create_io(path, EntryType::Input, data_type, units)
    }

    /// Creates (or idempotently re-creates) an output resource.
    pub fn create_output(&self, path: &str, data_type: DataType, units: &str) -> Result<()> {
        self.create_io(path, EntryType::Output, data_type, units)
    }

    fn create_io(&self, path: &str, kind: EntryType, data_type: DataType, units: &str) -> Result<()> {
        let state = &self.inner;
        if state.tree.is_update_paused() {
            return Err(HubError::Busy);
        }
        if units.len() > MAX_UNITS_BYTES {
            return Err(HubError::Overflow);
        }
        let entry = state.tree.get_or_create(path)?;
        if entry.parent().is_none() {
            return Err(HubError::BadParameter("cannot create a resource at the root"));
        }
        match entry.kind() {
            EntryType::Namespace => {
                let res = match kind {
                    EntryType::Input => Resource::input(data_type, units),
                    _ => Resource::output(data_type, units),
                };
                *entry.resource_mut() = Some(res);
                entry.set_kind(kind);
                entry.mark_new();
                info!(path = %entry.absolute_path(), kind = %kind, "hub.resource.created");
                state.notify_tree_change(entry.absolute_path(), kind, TreeChangeOp::Added);
                Ok(())
            }
            existing if existing == kind => {
                let guard = entry.resource();
                let res = guard.as_ref().ok_or(HubError::NotFound)?;
                if res.data_type() == data_type && res.units() == units {
                    Ok(())
                } else {
                    Err(HubError::Duplicate)
                }
            }
            EntryType::Placeholder => {
                // The entry was configured ahead of (or outlived) its
                // resource; the new resource takes the settings over.
                let mut replacement = match kind {
                    EntryType::Input => Resource::input(data_type, units),
                    _ => Resource::output(data_type, units),
                };
                if let Some(res) = entry.resource_mut().as_mut() {
                    res.move_admin_settings(&mut replacement);
                }
                *entry.resource_mut() = Some(replacement);
                entry.set_kind(kind);
                resource::promote_default(&entry, &state.pools);
                entry.mark_new();
                info!(path = %entry.absolute_path(), kind = %kind, "hub.resource.recreated");
                state.notify_tree_change(entry.absolute_path(), kind, TreeChangeOp::Added);
                Ok(())
            }
            _ => Err(HubError::Duplicate),
        }
    }

    /// Deletes an input or output resource.
    ///
    /// An entry carrying administrative settings is converted into a
    /// placeholder that retains them; otherwise the entry is removed (or
    /// retained as a deletion record while deletion tracking is on).
    pub fn delete_resource(&self, path: &str) -> Result<()> {
        let state = &self.inner;
        if state.tree.is_update_paused() {
            return Err(HubError::Busy);
        }
        let entry = state.tree.find_at_absolute_path(path)?;
        let kind = entry.kind();
        if !matches!(kind, EntryType::Input | EntryType::Output) {
            return Err(HubError::NotFound);
        }

        let has_admin = entry
            .resource()
            .as_ref()
            .map(Resource::has_admin_settings)
            .unwrap_or(false);
        if has_admin {
            let mut replacement = Resource::placeholder();
            if let Some(res) = entry.resource_mut().as_mut() {
                res.move_admin_settings(&mut replacement);
            }
            *entry.resource_mut() = Some(replacement);
            entry.set_kind(EntryType::Placeholder);
            resource::promote_default(&entry, &state.pools);
            info!(path = %entry.absolute_path(), "hub.resource.to_placeholder");
        } else {
            resource::detach_routes(&entry);
            *entry.resource_mut() = None;
            snapshot::record_node_deletion(state, &entry);
            info!(path = %entry.absolute_path(), "hub.resource.deleted");
        }
        state.notify_tree_change(entry.absolute_path(), kind, TreeChangeOp::Removed);
        Ok(())
    }

    /// Pushes a trigger sample.
    pub fn push_trigger(&self, path: &str, timestamp: Timestamp) -> Result<()> {
        let sample = Sample::trigger(&self.inner.pools, timestamp);
        self.push_sample(path, DataType::Trigger, sample)
    }

    /// Pushes a Boolean sample.
    pub fn push_boolean(&self, path: &str, timestamp: Timestamp, value: bool) -> Result<()> {
        let sample = Sample::boolean(&self.inner.pools, timestamp, value);
        self.push_sample(path, DataType::Boolean, sample)
    }

    /// Pushes a numeric sample.
    pub fn push_numeric(&self, path: &str, timestamp: Timestamp, value: f64) -> Result<()> {
        let sample = Sample::numeric(&self.inner.pools, timestamp, value);
        self.push_sample(path, DataType::Numeric, sample)
    }

    /// Pushes a string sample.
    pub fn push_string(&self, path: &str, timestamp: Timestamp, value: &str) -> Result<()> {
        let sample = Sample::string(&self.inner.pools, timestamp, value)?;
        self.push_sample(path, DataType::String, sample)
    }

    /// Pushes a JSON sample. The payload must parse as JSON.
    pub fn push_json(&self, path: &str, timestamp: Timestamp, value: &str) -> Result<()> {
        serde_json::from_str::<serde::de::IgnoredAny>(value)
            .map_err(|err| HubError::FormatError(err.to_string()))?;
        let sample = Sample::json(&self.inner.pools, timestamp, value)?;
        self.push_sample(path, DataType::Json, sample)
    }

    fn push_sample(&self, path: &str, data_type: DataType, sample: Sample) -> Result<()> {
        let state = &self.inner;
        if state.tree.is_update_paused() {
            // Held until the snapshot releases the tree; the timestamp was
            // already resolved at creation.
            state.hold_push(path, data_type, sample);
            return Ok(());
        }
        let entry = state.tree.find_at_absolute_path(path)?;
        resource::push(&entry, data_type, "", sample, &state.pools);
        Ok(())
    }

    /// Timestamp of the resource's current value.
    pub fn get_timestamp(&self, path: &str) -> Result<Timestamp> {
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        let guard = entry.resource();
        let res = guard.as_ref().ok_or(HubError::NotFound)?;
        res.current()
            .map(Sample::timestamp)
            .ok_or(HubError::NotFound)
    }

    /// Flags the entry as mandatory, which is surfaced in snapshot output.
    pub fn set_mandatory(&self, path: &str, mandatory: bool) -> Result<()> {
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        entry.set_mandatory(mandatory);
        Ok(())
    }

    fn add_push_handler(
        &self,
        path: &str,
        data_type: DataType,
        callback: PushCallback,
    ) -> Result<HandlerId> {
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        let id = self.inner.next_id();
        {
            let mut guard = entry.resource_mut();
            let res = guard.as_mut().ok_or(HubError::NotFound)?;
            res.add_handler(id, data_type, callback);
        }
        self.inner.register_push_handler(id, &entry);
        Ok(HandlerId(id))
    }

    /// Registers a handler receiving trigger notifications for every
    /// accepted sample.
    pub fn add_trigger_push_handler(
        &self,
        path: &str,
        handler: impl Fn(Timestamp) + 'static,
    ) -> Result<HandlerId> {
        self.add_push_handler(
            path,
            DataType::Trigger,
            Rc::new(move |ts, _value| handler(ts)),
        )
    }

    /// Registers a Boolean push handler.
    pub fn add_boolean_push_handler(
        &self,
        path: &str,
        handler: impl Fn(Timestamp, bool) + 'static,
    ) -> Result<HandlerId> {
        self.add_push_handler(
            path,
            DataType::Boolean,
            Rc::new(move |ts, value| {
                if let Value::Bool(v) = value {
                    handler(ts, *v);
                }
            }),
        )
    }

    /// Registers a numeric push handler.
    pub fn add_numeric_push_handler(
        &self,
        path: &str,
        handler: impl Fn(Timestamp, f64) + 'static,
    ) -> Result<HandlerId> {
        self.add_push_handler(
            path,
            DataType::Numeric,
            Rc::new(move |ts, value| {
                if let Value::Num(v) = value {
                    handler(ts, *v);
                }
            }),
        )
    }

    /// Registers a string push handler (any sample type coerces to string).
    pub fn add_string_push_handler(
        &self,
        path: &str,
        handler: impl Fn(Timestamp, &str) + 'static,
    ) -> Result<HandlerId> {
        self.add_push_handler(
            path,
            DataType::String,
            Rc::new(move |ts, value| {
                if let Value::Text(s) = value {
                    handler(ts, s.as_str());
                }
            }),
        )
    }

    /// Registers a JSON push handler (any sample type coerces to JSON).
    pub fn add_json_push_handler(
        &self,
        path: &str,
        handler: impl Fn(Timestamp, &str) + 'static,
    ) -> Result<HandlerId> {
        self.add_push_handler(
            path,
            DataType::Json,
            Rc::new(move |ts, value| {
                if let Value::Text(s) = value {
                    handler(ts, s.as_str());
                }
            }),
        )
    }

    /// Withdraws a push handler registration.
    pub fn remove_push_handler(&self, handle: HandlerId) {
        if let Some(entry) = self.inner.unregister_push_handler(handle.0) {
            if let Some(res) = entry.resource_mut().as_mut() {
                res.remove_handler(handle.0);
            }
        }
    }
}
