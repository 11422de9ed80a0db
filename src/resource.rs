//! Resource state and the sample admission pipeline.
//!
//! A [`Resource`] record is attached to every non-namespace tree entry. It
//! holds the current and last-pushed values, the administrative policy
//! (default, override, and for observations the filter/throttle/buffer
//! settings), the routing edges, and the registered push handlers.
//!
//! Routing edges are non-owning (`Weak`) in both directions; the tree owns
//! entries, entries own their resource, the resource owns its sample
//! references. [`set_source`] refuses edges that would close a loop, so the
//! routing graph stays a forest and propagation terminates.

use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::trace;

use crate::error::{HubError, Result};
use crate::sample::codec::{convert_to_json, convert_to_string};
use crate::sample::{now, DataType, Sample, SamplePools, Timestamp, Value};
use crate::tree::{Entry, EntryRef, EntryType};

/// Longest accepted units string.
pub const MAX_UNITS_BYTES: usize = 32;

/// Callback invoked for each accepted sample, with the payload coerced to
/// the handler's registered type.
pub type PushCallback = Rc<dyn Fn(Timestamp, &Value)>;

pub(crate) struct PushHandler {
    pub(crate) id: u64,
    pub(crate) data_type: DataType,
    pub(crate) callback: PushCallback,
}

/// Filter, throttle and buffer settings carried only by observations.
pub(crate) struct ObservationPolicy {
    pub(crate) min_period: f64,
    pub(crate) high_limit: f64,
    pub(crate) low_limit: f64,
    pub(crate) change_by: f64,
    pub(crate) buffer_max_count: u32,
    pub(crate) buffer_backup_period: u32,
    pub(crate) buffer: VecDeque<Sample>,
}

impl ObservationPolicy {
    fn new() -> Self {
        Self {
            min_period: 0.0,
            high_limit: f64::NAN,
            low_limit: f64::NAN,
            change_by: 0.0,
            buffer_max_count: 0,
            buffer_backup_period: 0,
            buffer: VecDeque::new(),
        }
    }

    /// Runs the observation filter chain: range, change, then throttle.
    fn accepts(
        &self,
        current: Option<&Sample>,
        current_type: DataType,
        data_type: DataType,
        sample: &Sample,
    ) -> bool {
        if matches!(data_type, DataType::Numeric | DataType::Boolean) {
            let v = match sample.value() {
                Value::Num(n) => *n,
                Value::Bool(b) => {
                    if *b {
                        1.0
                    } else {
                        0.0
                    }
                }
                _ => 0.0,
            };
            // Both limits set with low above high is an empty range.
            if !self.low_limit.is_nan() && !self.high_limit.is_nan() && self.low_limit > self.high_limit
            {
                trace!(value = v, "resource.push.rejected_empty_range");
                return false;
            }
            if !self.high_limit.is_nan() && v > self.high_limit {
                trace!(value = v, high = self.high_limit, "resource.push.rejected_high");
                return false;
            }
            if !self.low_limit.is_nan() && v < self.low_limit {
                trace!(value = v, low = self.low_limit, "resource.push.rejected_low");
                return false;
            }
        }

        if self.change_by > 0.0 && data_type != DataType::Trigger {
            if let Some(cur) = current {
                if current_type == data_type {
                    let unchanged = match (cur.value(), sample.value()) {
                        (Value::Num(a), Value::Num(b)) => (b - a).abs() < self.change_by,
                        (Value::Bool(a), Value::Bool(b)) => a == b,
                        (Value::Text(a), Value::Text(b)) => a.as_str() == b.as_str(),
                        _ => false,
                    };
                    if unchanged {
                        trace!(change_by = self.change_by, "resource.push.rejected_unchanged");
                        return false;
                    }
                }
            }
        }

        if self.min_period > 0.0 {
            if let Some(cur) = current {
                if sample.timestamp() - cur.timestamp() < self.min_period {
                    trace!(min_period = self.min_period, "resource.push.rejected_throttled");
                    return false;
                }
            }
        }

        true
    }
}

/// Per-entry resource record.
pub(crate) struct Resource {
    units: String,
    current_type: DataType,
    current: Option<Sample>,
    pushed_type: DataType,
    pushed: Option<Sample>,
    source: Option<Weak<Entry>>,
    destinations: SmallVec<[Weak<Entry>; 2]>,
    override_value: Option<Sample>,
    override_type: DataType,
    default_value: Option<Sample>,
    default_type: DataType,
    handlers: SmallVec<[PushHandler; 2]>,
    observation: Option<ObservationPolicy>,
}

impl Resource {
    fn new(data_type: DataType, units: &str, observation: bool) -> Self {
        Self {
            units: units.to_string(),
            current_type: data_type,
            current: None,
            pushed_type: data_type,
            pushed: None,
            source: None,
            destinations: SmallVec::new(),
            override_value: None,
            override_type: DataType::Trigger,
            default_value: None,
            default_type: DataType::Trigger,
            handlers: SmallVec::new(),
            observation: observation.then(ObservationPolicy::new),
        }
    }

    pub(crate) fn input(data_type: DataType, units: &str) -> Self {
        Self::new(data_type, units, false)
    }

    pub(crate) fn output(data_type: DataType, units: &str) -> Self {
        Self::new(data_type, units, false)
    }

    pub(crate) fn new_observation() -> Self {
        Self::new(DataType::Trigger, "", true)
    }

    pub(crate) fn placeholder() -> Self {
        Self::new(DataType::Trigger, "", false)
    }

    pub(crate) fn units(&self) -> &str {
        &self.units
    }

    pub(crate) fn set_units(&mut self, units: &str) -> Result<()> {
        if units.len() > MAX_UNITS_BYTES {
            return Err(HubError::Overflow);
        }
        self.units = units.to_string();
        Ok(())
    }

    pub(crate) fn data_type(&self) -> DataType {
        self.current_type
    }

    pub(crate) fn current(&self) -> Option<&Sample> {
        self.current.as_ref()
    }

    pub(crate) fn pushed(&self) -> Option<&Sample> {
        self.pushed.as_ref()
    }

    pub(crate) fn pushed_type(&self) -> DataType {
        self.pushed_type
    }

    pub(crate) fn source_entry(&self) -> Option<EntryRef> {
        self.source.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn has_default(&self) -> bool {
        self.default_value.is_some()
    }

    pub(crate) fn default_value(&self) -> Option<&Sample> {
        self.default_value.as_ref()
    }

    pub(crate) fn default_data_type(&self) -> DataType {
        self.default_type
    }

    pub(crate) fn remove_default(&mut self) {
        self.default_value = None;
    }

    pub(crate) fn is_overridden(&self) -> bool {
        self.override_value.is_some()
    }

    pub(crate) fn remove_override(&mut self) {
        self.override_value = None;
    }

    pub(crate) fn observation(&self) -> Option<&ObservationPolicy> {
        self.observation.as_ref()
    }

    pub(crate) fn observation_mut(&mut self) -> Option<&mut ObservationPolicy> {
        self.observation.as_mut()
    }

    pub(crate) fn add_handler(&mut self, id: u64, data_type: DataType, callback: PushCallback) {
        self.handlers.push(PushHandler {
            id,
            data_type,
            callback,
        });
    }

    pub(crate) fn remove_handler(&mut self, id: u64) {
        self.handlers.retain(|h| h.id != id);
    }

    /// Whether administrative state is present (observation-specific
    /// settings deliberately not considered).
    pub(crate) fn has_admin_settings(&self) -> bool {
        self.source.is_some()
            || self.destinations.iter().any(|d| d.upgrade().is_some())
            || self.override_value.is_some()
            || self.default_value.is_some()
    }

    /// Transplants administrative state into `to`. Routing back-edges keep
    /// pointing at the same tree entry, so they stay consistent.
    pub(crate) fn move_admin_settings(&mut self, to: &mut Resource) {
        to.source = self.source.take();
        to.destinations = std::mem::take(&mut self.destinations);
        to.override_value = self.override_value.take();
        to.override_type = self.override_type;
        to.default_value = self.default_value.take();
        to.default_type = self.default_type;
    }
}

fn units_accept(mine: &str, theirs: &str) -> bool {
    mine.is_empty() || theirs.is_empty() || mine == theirs
}

fn source_of(entry: &EntryRef) -> Option<EntryRef> {
    entry.resource().as_ref().and_then(Resource::source_entry)
}

fn remove_edge(list: &mut SmallVec<[Weak<Entry>; 2]>, target: &EntryRef) {
    list.retain(|weak| match weak.upgrade() {
        Some(entry) => !Rc::ptr_eq(&entry, target),
        None => false,
    });
}

/// Establishes (or clears, with `None`) the routing edge feeding `dest`.
///
/// Rejects edges that would close a loop by walking the transitive source
/// chain of the proposed source. A route that already exists is a no-op.
pub(crate) fn set_source(dest: &EntryRef, source: Option<&EntryRef>) -> Result<()> {
    if dest.resource().is_none() {
        return Err(HubError::NotFound);
    }

    if let Some(src) = source {
        if src.resource().is_none() {
            return Err(HubError::NotFound);
        }
        if Rc::ptr_eq(src, dest) {
            return Err(HubError::Duplicate);
        }
        let mut cursor = source_of(src);
        while let Some(entry) = cursor {
            if Rc::ptr_eq(&entry, dest) {
                trace!(
                    dest = %dest.absolute_path(),
                    src = %src.absolute_path(),
                    "resource.route.rejected_loop"
                );
                return Err(HubError::Duplicate);
            }
            cursor = source_of(&entry);
        }
        if let Some(existing) = source_of(dest) {
            if Rc::ptr_eq(&existing, src) {
                return Ok(());
            }
        }
    }

    // Detach the previous edge, if any.
    if let Some(old_src) = source_of(dest) {
        if let Some(res) = old_src.resource_mut().as_mut() {
            remove_edge(&mut res.destinations, dest);
        }
    }

    match source {
        Some(src) => {
            if let Some(res) = dest.resource_mut().as_mut() {
                res.source = Some(Rc::downgrade(src));
            }
            if let Some(res) = src.resource_mut().as_mut() {
                res.destinations.push(Rc::downgrade(dest));
            }
            trace!(
                dest = %dest.absolute_path(),
                src = %src.absolute_path(),
                "resource.route.set"
            );
        }
        None => {
            if let Some(res) = dest.resource_mut().as_mut() {
                res.source = None;
            }
            trace!(dest = %dest.absolute_path(), "resource.route.cleared");
        }
    }
    dest.touch();
    Ok(())
}

/// Detaches every routing edge touching `entry` (both directions).
pub(crate) fn detach_routes(entry: &EntryRef) {
    if let Some(src) = source_of(entry) {
        if let Some(res) = src.resource_mut().as_mut() {
            remove_edge(&mut res.destinations, entry);
        }
    }
    let dests: Vec<EntryRef> = entry
        .resource()
        .as_ref()
        .map(|res| res.destinations.iter().filter_map(Weak::upgrade).collect())
        .unwrap_or_default();
    for dest in dests {
        if let Some(res) = dest.resource_mut().as_mut() {
            res.source = None;
        }
    }
    if let Some(res) = entry.resource_mut().as_mut() {
        res.source = None;
        res.destinations.clear();
    }
}

/// Fully clears an observation before its entry goes away: routes, handlers
/// and retained samples.
pub(crate) fn delete_observation(entry: &EntryRef) {
    detach_routes(entry);
    if let Some(res) = entry.resource_mut().as_mut() {
        res.handlers.clear();
        res.current = None;
        res.pushed = None;
        res.override_value = None;
        res.default_value = None;
        if let Some(obs) = res.observation.as_mut() {
            obs.buffer.clear();
        }
    }
}

/// Sets the default value. Discarded with a trace when an input or output
/// declares a different type. A resource with no current value adopts the
/// default immediately (re-stamped to the present).
pub(crate) fn set_default(
    entry: &EntryRef,
    data_type: DataType,
    sample: Sample,
    pools: &SamplePools,
) {
    let kind = entry.kind();
    {
        let mut guard = entry.resource_mut();
        let Some(res) = guard.as_mut() else { return };
        if matches!(kind, EntryType::Input | EntryType::Output) && data_type != res.current_type {
            trace!(path = %entry.absolute_path(), "resource.default.discarded_type");
            return;
        }
        res.default_value = Some(sample);
        res.default_type = data_type;
    }
    promote_default(entry, pools);
    entry.touch();
}

/// Promotes the default value to current when no current value exists (the
/// default-fallback stage of the pipeline). The promoted copy is re-stamped
/// to the present; the stored default keeps its own timestamp.
pub(crate) fn promote_default(entry: &EntryRef, pools: &SamplePools) {
    let kind = entry.kind();
    let mut guard = entry.resource_mut();
    let Some(res) = guard.as_mut() else { return };
    if res.current.is_some() {
        return;
    }
    let Some(default) = res.default_value.clone() else {
        return;
    };
    if matches!(kind, EntryType::Input | EntryType::Output) && res.default_type != res.current_type
    {
        return;
    }
    if let Ok(promoted) = default.deep_copy(pools) {
        promoted.set_timestamp(now());
        res.current = Some(promoted);
        if matches!(kind, EntryType::Observation | EntryType::Placeholder) {
            res.current_type = res.default_type;
        }
    }
}

/// Sets an override. Discarded with a trace when an input or output declares
/// a different type; takes effect on subsequent pushes.
pub(crate) fn set_override(entry: &EntryRef, data_type: DataType, sample: Sample) {
    let kind = entry.kind();
    let mut guard = entry.resource_mut();
    let Some(res) = guard.as_mut() else { return };
    if matches!(kind, EntryType::Input | EntryType::Output) && data_type != res.current_type {
        trace!(path = %entry.absolute_path(), "resource.override.discarded_type");
        return;
    }
    res.override_value = Some(sample);
    res.override_type = data_type;
    drop(guard);
    entry.touch();
}

/// Coerces an accepted sample's payload to a handler's registered type.
/// Returns `None` when no lossless coercion exists.
fn coerce_value(
    sample: &Sample,
    sample_type: DataType,
    handler_type: DataType,
    pools: &SamplePools,
) -> Option<Value> {
    match (sample_type, handler_type) {
        (DataType::Numeric, DataType::Boolean) => sample.as_num().map(|v| Value::Bool(v != 0.0)),
        (DataType::Boolean, DataType::Numeric) => sample
            .as_bool()
            .map(|v| Value::Num(if v { 1.0 } else { 0.0 })),
        (_, DataType::Trigger) => Some(Value::None),
        (_, DataType::String) => convert_to_string(sample, sample_type)
            .ok()
            .and_then(|s| pools.alloc_string(&s).ok())
            .map(Value::Text),
        (_, DataType::Json) => convert_to_json(sample, sample_type)
            .ok()
            .and_then(|s| pools.alloc_string(&s).ok())
            .map(Value::Text),
        _ => None,
    }
}

/// Admits a sample into a resource and, when accepted, propagates it to
/// every destination and registered handler. Propagation to destinations
/// and handlers completes before this call returns.
pub(crate) fn push(
    entry: &EntryRef,
    data_type: DataType,
    units: &str,
    sample: Sample,
    pools: &SamplePools,
) {
    let kind = entry.kind();
    let accepted;
    let accepted_type;
    let forward_units;
    let dests: Vec<EntryRef>;
    let handlers: Vec<(DataType, PushCallback)>;
    {
        let mut guard = entry.resource_mut();
        let Some(res) = guard.as_mut() else { return };

        match kind {
            EntryType::Input | EntryType::Output => {
                // Strict type check; mismatches are silently dropped.
                if data_type != res.current_type {
                    trace!(
                        path = %entry.absolute_path(),
                        pushed = %data_type,
                        declared = %res.current_type,
                        "resource.push.rejected_type"
                    );
                    return;
                }
            }
            EntryType::Observation | EntryType::Placeholder => {
                if !units_accept(&res.units, units) {
                    trace!(path = %entry.absolute_path(), "resource.push.rejected_units");
                    return;
                }
                if let Some(obs) = &res.observation {
                    if !obs.accepts(res.current.as_ref(), res.current_type, data_type, &sample) {
                        return;
                    }
                }
            }
            EntryType::Namespace => return,
        }

        res.pushed_type = data_type;
        res.pushed = Some(sample.clone());

        let mut value = sample.clone();
        let mut value_type = data_type;
        if let Some(over) = &res.override_value {
            if let Ok(substituted) = over.deep_copy(pools) {
                substituted.set_timestamp(sample.timestamp());
                value = substituted;
                value_type = res.override_type;
            }
        }

        res.current = Some(value.clone());
        if matches!(kind, EntryType::Observation | EntryType::Placeholder) {
            res.current_type = value_type;
        }

        if let Some(obs) = res.observation.as_mut() {
            if obs.buffer_max_count > 0 {
                obs.buffer.push_back(value.clone());
                while obs.buffer.len() > obs.buffer_max_count as usize {
                    obs.buffer.pop_front();
                }
            }
        }

        res.destinations.retain(|weak| weak.upgrade().is_some());
        dests = res.destinations.iter().filter_map(Weak::upgrade).collect();
        handlers = res
            .handlers
            .iter()
            .map(|h| (h.data_type, h.callback.clone()))
            .collect();
        forward_units = res.units.clone();
        accepted = value;
        accepted_type = value_type;
    }

    trace!(
        path = %entry.absolute_path(),
        ty = %accepted_type,
        ts = accepted.timestamp(),
        "resource.push.accepted"
    );

    for (handler_type, callback) in handlers {
        if handler_type == accepted_type {
            callback(accepted.timestamp(), accepted.value());
        } else if let Some(value) = coerce_value(&accepted, accepted_type, handler_type, pools) {
            callback(accepted.timestamp(), &value);
        }
    }

    for dest in dests {
        push(&dest, accepted_type, &forward_units, accepted.clone(), pools);
    }
}
