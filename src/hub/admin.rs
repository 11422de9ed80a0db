//! Administrator API: observations, routing, policy and tree watching.
//!
//! Administrative settings may be applied before the resource they target
//! exists: the setter materializes a placeholder entry that retains the
//! settings until a producer creates the real resource over it.
//!
//! Structural and administrative mutations return `Busy` while a snapshot
//! holds the tree; their result codes are part of their contract, so they
//! are refused rather than deferred.

use std::rc::Rc;

use tracing::info;

use crate::error::{HubError, Result};
use crate::resource::{self, ObservationPolicy, Resource};
use crate::sample::{DataType, Sample, NOW};
use crate::snapshot;
use crate::tree::{EntryRef, EntryType};

use super::{DataHub, HandlerId, TreeChangeOp};

impl DataHub {
    fn obs_path(name: &str) -> String {
        if name.starts_with('/') {
            name.to_string()
        } else {
            format!("/obs/{name}")
        }
    }

    fn check_unlocked(&self) -> Result<()> {
        if self.inner.tree.is_update_paused() {
            Err(HubError::Busy)
        } else {
            Ok(())
        }
    }

    /// Resolves a path for administrative configuration, creating a
    /// placeholder entry when nothing lives there yet.
    fn admin_entry(&self, path: &str) -> Result<EntryRef> {
        let entry = self.inner.tree.get_or_create(path)?;
        if entry.parent().is_none() {
            return Err(HubError::BadParameter("cannot configure the root entry"));
        }
        if entry.kind() == EntryType::Namespace {
            *entry.resource_mut() = Some(Resource::placeholder());
            entry.set_kind(EntryType::Placeholder);
            entry.mark_new();
            info!(path = %entry.absolute_path(), "hub.placeholder.created");
        }
        Ok(entry)
    }

    /// Creates an observation. A bare name is placed under `/obs`.
    pub fn create_obs(&self, name: &str) -> Result<()> {
        self.check_unlocked()?;
        if name.trim_matches('/').is_empty() {
            return Err(HubError::BadParameter("observation name is empty"));
        }
        let path = Self::obs_path(name);
        let entry = self.inner.tree.get_or_create(&path)?;
        match entry.kind() {
            EntryType::Namespace => {
                *entry.resource_mut() = Some(Resource::new_observation());
                entry.set_kind(EntryType::Observation);
                entry.mark_new();
                info!(path = %entry.absolute_path(), "hub.observation.created");
                self.inner.notify_tree_change(
                    entry.absolute_path(),
                    EntryType::Observation,
                    TreeChangeOp::Added,
                );
                Ok(())
            }
            EntryType::Observation => Ok(()),
            _ => Err(HubError::Duplicate),
        }
    }

    /// Deletes an observation: routes detached, handlers dropped, samples
    /// released.
    pub fn delete_obs(&self, name: &str) -> Result<()> {
        self.check_unlocked()?;
        let path = Self::obs_path(name);
        let entry = self.inner.tree.find_at_absolute_path(&path)?;
        if entry.kind() != EntryType::Observation {
            return Err(HubError::NotFound);
        }
        resource::delete_observation(&entry);
        *entry.resource_mut() = None;
        snapshot::record_node_deletion(&self.inner, &entry);
        info!(path = %entry.absolute_path(), "hub.observation.deleted");
        self.inner.notify_tree_change(
            entry.absolute_path(),
            EntryType::Observation,
            TreeChangeOp::Removed,
        );
        Ok(())
    }

    /// Sets (or clears, with `None`) the routing source of `dest_path`.
    /// Fails `Duplicate` when the edge would create a loop.
    pub fn set_source(&self, dest_path: &str, source_path: Option<&str>) -> Result<()> {
        self.check_unlocked()?;
        let dest = self.admin_entry(dest_path)?;
        let source = source_path.map(|p| self.admin_entry(p)).transpose()?;
        resource::set_source(&dest, source.as_ref())
    }

    /// Path of the configured routing source, if any.
    pub fn get_source(&self, dest_path: &str) -> Result<Option<String>> {
        let entry = self.inner.tree.find_at_absolute_path(dest_path)?;
        let guard = entry.resource();
        let res = guard.as_ref().ok_or(HubError::NotFound)?;
        Ok(res.source_entry().map(|src| src.absolute_path()))
    }

    fn set_default_sample(&self, path: &str, data_type: DataType, sample: Sample) -> Result<()> {
        self.check_unlocked()?;
        let entry = self.admin_entry(path)?;
        resource::set_default(&entry, data_type, sample, &self.inner.pools);
        Ok(())
    }

    /// Sets a Boolean default value.
    pub fn set_boolean_default(&self, path: &str, value: bool) -> Result<()> {
        let sample = Sample::boolean(&self.inner.pools, NOW, value);
        self.set_default_sample(path, DataType::Boolean, sample)
    }

    /// Sets a numeric default value.
    pub fn set_numeric_default(&self, path: &str, value: f64) -> Result<()> {
        let sample = Sample::numeric(&self.inner.pools, NOW, value);
        self.set_default_sample(path, DataType::Numeric, sample)
    }

    /// Sets a string default value.
    pub fn set_string_default(&self, path: &str, value: &str) -> Result<()> {
        let sample = Sample::string(&self.inner.pools, NOW, value)?;
        self.set_default_sample(path, DataType::String, sample)
    }

    /// Sets a JSON default value.
    pub fn set_json_default(&self, path: &str, value: &str) -> Result<()> {
        serde_json::from_str::<serde::de::IgnoredAny>(value)
            .map_err(|err| HubError::FormatError(err.to_string()))?;
        let sample = Sample::json(&self.inner.pools, NOW, value)?;
        self.set_default_sample(path, DataType::Json, sample)
    }

    /// Removes any default value.
    pub fn remove_default(&self, path: &str) -> Result<()> {
        self.check_unlocked()?;
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        let mut guard = entry.resource_mut();
        let res = guard.as_mut().ok_or(HubError::NotFound)?;
        res.remove_default();
        drop(guard);
        entry.touch();
        Ok(())
    }

    /// Whether a default value is set.
    pub fn has_default(&self, path: &str) -> Result<bool> {
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        let guard = entry.resource();
        let res = guard.as_ref().ok_or(HubError::NotFound)?;
        Ok(res.has_default())
    }

    /// The default value and its data type, if set.
    pub fn get_default(&self, path: &str) -> Result<Option<(DataType, Sample)>> {
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        let guard = entry.resource();
        let res = guard.as_ref().ok_or(HubError::NotFound)?;
        Ok(res
            .default_value()
            .map(|sample| (res.default_data_type(), sample.clone())))
    }

    fn set_override_sample(&self, path: &str, data_type: DataType, sample: Sample) -> Result<()> {
        self.check_unlocked()?;
        let entry = self.admin_entry(path)?;
        resource::set_override(&entry, data_type, sample);
        Ok(())
    }

    /// Sets a Boolean override; subsequently accepted samples carry it.
    pub fn set_boolean_override(&self, path: &str, value: bool) -> Result<()> {
        let sample = Sample::boolean(&self.inner.pools, NOW, value);
        self.set_override_sample(path, DataType::Boolean, sample)
    }

    /// Sets a numeric override.
    pub fn set_numeric_override(&self, path: &str, value: f64) -> Result<()> {
        let sample = Sample::numeric(&self.inner.pools, NOW, value);
        self.set_override_sample(path, DataType::Numeric, sample)
    }

    /// Sets a string override.
    pub fn set_string_override(&self, path: &str, value: &str) -> Result<()> {
        let sample = Sample::string(&self.inner.pools, NOW, value)?;
        self.set_override_sample(path, DataType::String, sample)
    }

    /// Sets a JSON override.
    pub fn set_json_override(&self, path: &str, value: &str) -> Result<()> {
        serde_json::from_str::<serde::de::IgnoredAny>(value)
            .map_err(|err| HubError::FormatError(err.to_string()))?;
        let sample = Sample::json(&self.inner.pools, NOW, value)?;
        self.set_override_sample(path, DataType::Json, sample)
    }

    /// Removes any override.
    pub fn remove_override(&self, path: &str) -> Result<()> {
        self.check_unlocked()?;
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        let mut guard = entry.resource_mut();
        let res = guard.as_mut().ok_or(HubError::NotFound)?;
        res.remove_override();
        drop(guard);
        entry.touch();
        Ok(())
    }

    /// Whether an override is in effect.
    pub fn is_overridden(&self, path: &str) -> Result<bool> {
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        let guard = entry.resource();
        let res = guard.as_ref().ok_or(HubError::NotFound)?;
        Ok(res.is_overridden())
    }

    /// Whether the entry carries administrative settings.
    pub fn has_admin_settings(&self, path: &str) -> Result<bool> {
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        let guard = entry.resource();
        let res = guard.as_ref().ok_or(HubError::NotFound)?;
        Ok(res.has_admin_settings())
    }

    /// Sets the units string of a resource.
    pub fn set_units(&self, path: &str, units: &str) -> Result<()> {
        self.check_unlocked()?;
        let entry = self.inner.tree.find_at_absolute_path(path)?;
        let mut guard = entry.resource_mut();
        let res = guard.as_mut().ok_or(HubError::NotFound)?;
        res.set_units(units)?;
        drop(guard);
        entry.touch();
        Ok(())
    }

    /// The kind of the entry at `path`.
    pub fn get_entry_type(&self, path: &str) -> Result<EntryType> {
        Ok(self.inner.tree.find_at_absolute_path(path)?.kind())
    }

    fn with_observation<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ObservationPolicy) -> R,
    ) -> Result<R> {
        let path = Self::obs_path(name);
        let entry = self.inner.tree.find_at_absolute_path(&path)?;
        let mut guard = entry.resource_mut();
        let res = guard.as_mut().ok_or(HubError::NotFound)?;
        let policy = res.observation_mut().ok_or(HubError::NotFound)?;
        let result = f(policy);
        drop(guard);
        entry.touch();
        Ok(result)
    }

    fn read_observation<R>(
        &self,
        name: &str,
        f: impl FnOnce(&ObservationPolicy) -> R,
    ) -> Result<R> {
        let path = Self::obs_path(name);
        let entry = self.inner.tree.find_at_absolute_path(&path)?;
        let guard = entry.resource();
        let res = guard.as_ref().ok_or(HubError::NotFound)?;
        let policy = res.observation().ok_or(HubError::NotFound)?;
        Ok(f(policy))
    }

    /// Sets the minimum period between samples accepted by an observation.
    pub fn set_min_period(&self, name: &str, seconds: f64) -> Result<()> {
        self.check_unlocked()?;
        self.with_observation(name, |obs| obs.min_period = seconds)
    }

    /// The minimum accepted period, or 0 when unset.
    pub fn get_min_period(&self, name: &str) -> Result<f64> {
        self.read_observation(name, |obs| obs.min_period)
    }

    /// Sets the highest accepted value (numeric and Boolean samples).
    pub fn set_high_limit(&self, name: &str, limit: f64) -> Result<()> {
        self.check_unlocked()?;
        self.with_observation(name, |obs| obs.high_limit = limit)
    }

    /// The high limit, or NaN when unset.
    pub fn get_high_limit(&self, name: &str) -> Result<f64> {
        self.read_observation(name, |obs| obs.high_limit)
    }

    /// Sets the lowest accepted value (numeric and Boolean samples).
    pub fn set_low_limit(&self, name: &str, limit: f64) -> Result<()> {
        self.check_unlocked()?;
        self.with_observation(name, |obs| obs.low_limit = limit)
    }

    /// The low limit, or NaN when unset.
    pub fn get_low_limit(&self, name: &str) -> Result<f64> {
        self.read_observation(name, |obs| obs.low_limit)
    }

    /// Sets the magnitude a sample must differ from the current value by to
    /// be accepted. Zero disables the filter; ignored for triggers.
    pub fn set_change_by(&self, name: &str, change: f64) -> Result<()> {
        self.check_unlocked()?;
        self.with_observation(name, |obs| obs.change_by = change)
    }

    /// The change-by magnitude, or 0 when unset.
    pub fn get_change_by(&self, name: &str) -> Result<f64> {
        self.read_observation(name, |obs| obs.change_by)
    }

    /// Sets the FIFO ring capacity for accepted samples.
    pub fn set_buffer_max_count(&self, name: &str, count: u32) -> Result<()> {
        self.check_unlocked()?;
        self.with_observation(name, |obs| {
            obs.buffer_max_count = count;
            while obs.buffer.len() > count as usize {
                obs.buffer.pop_front();
            }
        })
    }

    /// The ring capacity, or 0 when unset.
    pub fn get_buffer_max_count(&self, name: &str) -> Result<u32> {
        self.read_observation(name, |obs| obs.buffer_max_count)
    }

    /// Sets the minimum time between buffer backups to non-volatile
    /// storage. Retained as policy; this build performs no persistence.
    pub fn set_buffer_backup_period(&self, name: &str, seconds: u32) -> Result<()> {
        self.check_unlocked()?;
        self.with_observation(name, |obs| obs.buffer_backup_period = seconds)
    }

    /// The buffer backup period, or 0 when backups are disabled.
    pub fn get_buffer_backup_period(&self, name: &str) -> Result<u32> {
        self.read_observation(name, |obs| obs.buffer_backup_period)
    }

    /// Registers a callback observing resource creation and deletion.
    pub fn add_tree_change_handler(
        &self,
        handler: impl Fn(&str, EntryType, TreeChangeOp) + 'static,
    ) -> HandlerId {
        let id = self.inner.next_id();
        self.inner.add_tree_watcher(id, Rc::new(handler));
        HandlerId(id)
    }

    /// Withdraws a tree-change callback.
    pub fn remove_tree_change_handler(&self, handle: HandlerId) {
        self.inner.remove_tree_watcher(handle.0);
    }
}
