//! Timestamped data samples.
//!
//! A [`Sample`] is a reference-counted, immutable pairing of a timestamp and
//! a variant value. The data type tag is deliberately *not* stored inside
//! the sample: most samples share the type of their owning resource, which
//! keeps the tag there (`current_type`, `pushed_type`, and so on). The
//! [`Value`] enum carries the payload shape only.
//!
//! Samples and their textual payloads come from the bounded pools in
//! [`pool`].

pub mod codec;
pub mod pool;

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HubError, Result};

pub use self::pool::{PoolStats, PooledStr, SamplePools, TierStats};

/// Seconds since the Unix epoch.
pub type Timestamp = f64;

/// Sentinel timestamp replaced with the current wall-clock time at sample
/// creation.
pub const NOW: Timestamp = 0.0;

/// Sentinel snapshot window meaning "no lower bound".
pub const BEGINNING_OF_TIME: Timestamp = 0.0;

/// Current wall-clock time as a [`Timestamp`].
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn resolve(timestamp: Timestamp) -> Timestamp {
    if timestamp == NOW {
        now()
    } else {
        timestamp
    }
}

/// The closed set of sample data types.
///
/// Discriminants are wire-visible: snapshot output emits them in the
/// `"type"` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    /// An event with no payload.
    Trigger = 0,
    /// Boolean payload.
    Boolean = 1,
    /// Double-precision numeric payload.
    Numeric = 2,
    /// UTF-8 string payload.
    String = 3,
    /// UTF-8 payload interpreted as JSON.
    Json = 4,
}

impl DataType {
    /// Numeric code used in encoded snapshot output.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Whether the payload representation is textual (string and JSON share
    /// one representation and differ only in interpretation).
    pub fn is_textual(self) -> bool {
        matches!(self, DataType::String | DataType::Json)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Trigger => "trigger",
            DataType::Boolean => "boolean",
            DataType::Numeric => "numeric",
            DataType::String => "string",
            DataType::Json => "json",
        };
        f.write_str(name)
    }
}

impl FromStr for DataType {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "trigger" => Ok(DataType::Trigger),
            "boolean" => Ok(DataType::Boolean),
            "numeric" => Ok(DataType::Numeric),
            "string" => Ok(DataType::String),
            "json" => Ok(DataType::Json),
            _ => Err(HubError::BadParameter("unknown data type name")),
        }
    }
}

/// Sample payload variants. `Text` serves both string and JSON samples.
#[derive(Debug)]
pub enum Value {
    /// No payload (triggers).
    None,
    /// Boolean payload.
    Bool(bool),
    /// Numeric payload.
    Num(f64),
    /// Textual payload (string or JSON).
    Text(PooledStr),
}

struct SampleInner {
    timestamp: Cell<Timestamp>,
    value: Value,
    _slot: pool::SampleSlot,
}

/// A reference-counted, timestamped data sample.
///
/// Immutable after publication; the single sanctioned mutation is
/// re-stamping during controlled promotion (override substitution, default
/// adoption).
#[derive(Clone)]
pub struct Sample {
    inner: Rc<SampleInner>,
}

impl Sample {
    fn new(pools: &SamplePools, timestamp: Timestamp, value: Value) -> Self {
        Self {
            inner: Rc::new(SampleInner {
                timestamp: Cell::new(resolve(timestamp)),
                value,
                _slot: pools.take_sample_slot(),
            }),
        }
    }

    /// Creates a trigger sample.
    pub fn trigger(pools: &SamplePools, timestamp: Timestamp) -> Self {
        Self::new(pools, timestamp, Value::None)
    }

    /// Creates a Boolean sample.
    pub fn boolean(pools: &SamplePools, timestamp: Timestamp, value: bool) -> Self {
        Self::new(pools, timestamp, Value::Bool(value))
    }

    /// Creates a numeric sample.
    pub fn numeric(pools: &SamplePools, timestamp: Timestamp, value: f64) -> Self {
        Self::new(pools, timestamp, Value::Num(value))
    }

    /// Creates a string sample, copying the payload into a pooled buffer.
    pub fn string(pools: &SamplePools, timestamp: Timestamp, value: &str) -> Result<Self> {
        let text = pools.alloc_string(value)?;
        Ok(Self::new(pools, timestamp, Value::Text(text)))
    }

    /// Creates a JSON sample. JSON payloads are stored exactly like string
    /// payloads; the owning resource's type tag tells them apart.
    pub fn json(pools: &SamplePools, timestamp: Timestamp, value: &str) -> Result<Self> {
        Self::string(pools, timestamp, value)
    }

    /// The sample's timestamp.
    pub fn timestamp(&self) -> Timestamp {
        self.inner.timestamp.get()
    }

    /// Re-stamps the sample. Only used during controlled promotion; samples
    /// are otherwise immutable after publication.
    pub(crate) fn set_timestamp(&self, timestamp: Timestamp) {
        self.inner.timestamp.set(timestamp);
    }

    /// The payload.
    pub fn value(&self) -> &Value {
        &self.inner.value
    }

    /// Boolean payload, if this is a Boolean sample.
    pub fn as_bool(&self) -> Option<bool> {
        match self.inner.value {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric payload, if this is a numeric sample.
    pub fn as_num(&self) -> Option<f64> {
        match self.inner.value {
            Value::Num(v) => Some(v),
            _ => None,
        }
    }

    /// Textual payload, if this is a string or JSON sample.
    pub fn as_text(&self) -> Option<&str> {
        match &self.inner.value {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Deep copy. Textual payloads are duplicated into fresh pooled buffers;
    /// scalar payloads are plain copies.
    pub fn deep_copy(&self, pools: &SamplePools) -> Result<Self> {
        let value = match &self.inner.value {
            Value::Text(s) => Value::Text(pools.alloc_string(s.as_str())?),
            Value::None => Value::None,
            Value::Bool(v) => Value::Bool(*v),
            Value::Num(v) => Value::Num(*v),
        };
        Ok(Self::new(pools, self.timestamp(), value))
    }
}

impl fmt::Debug for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sample")
            .field("timestamp", &self.timestamp())
            .field("value", &self.inner.value)
            .finish()
    }
}
