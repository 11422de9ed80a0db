//! # Data Hub - Embedded Sample Broker
//!
//! An in-process broker mediating between producer components (sensors,
//! "inputs") and consumer components (actuators, "outputs"), joined by
//! administratively configured observations that filter, throttle, buffer
//! and route timestamped data samples through a hierarchical resource tree.
//!
//! ## Quick Start
//!
//! ```rust
//! use datahub::{DataHub, DataType, ReadOutcome, BEGINNING_OF_TIME, FORMAT_JSON, NOW};
//!
//! let hub = DataHub::new();
//!
//! // A producer declares an input and publishes a sample.
//! hub.create_input("/app/sensor/temp", DataType::Numeric, "degC")?;
//! hub.push_numeric("/app/sensor/temp", NOW, 21.5)?;
//! hub.run_until_idle();
//!
//! // Stream a JSON snapshot of the whole tree.
//! let mut reader = hub
//!     .take_snapshot(FORMAT_JSON, 0, "/", BEGINNING_OF_TIME, |result| {
//!         assert!(result.is_ok());
//!     })
//!     .expect("snapshot stream");
//!
//! let mut doc = Vec::new();
//! let mut buf = [0u8; 256];
//! loop {
//!     hub.run_until_idle();
//!     match reader.read(&mut buf) {
//!         ReadOutcome::Data(n) => doc.extend_from_slice(&buf[..n]),
//!         ReadOutcome::WouldBlock => continue,
//!         ReadOutcome::Eof => break,
//!     }
//! }
//! assert!(doc.starts_with(b"{\"ts\":"));
//! # Ok::<(), datahub::HubError>(())
//! ```
//!
//! ## Architecture
//!
//! - **Samples** ([`sample`]): reference-counted, immutable, timestamped
//!   variant values drawn from bounded, size-tiered allocation pools.
//! - **Resource tree** ([`tree`], resources): a hierarchical namespace of
//!   polymorphic entries with loop-free routing edges and per-resource
//!   administrative policy (defaults, overrides, limits, filters).
//! - **Snapshot engine** ([`snapshot`]): a cooperative two-level state
//!   machine that walks a delimited portion of the tree, decides per-node
//!   relevance against a time window and filter mask, and streams
//!   formatter-encoded bytes through a backpressured pipe.
//!
//! Everything runs single-threaded on the hub's deferred event queue;
//! drive it with [`DataHub::run_until_idle`].

pub mod config;
pub mod error;
mod event;
pub mod hub;
mod resource;
pub mod sample;
pub mod snapshot;
pub mod tree;

// Re-export the main public API.
pub use crate::config::HubConfig;
pub use crate::error::{HubError, Result};
pub use crate::hub::{DataHub, HandlerId, TreeChangeOp};
pub use crate::resource::MAX_UNITS_BYTES;
pub use crate::sample::{
    DataType, PoolStats, Sample, SamplePools, Timestamp, Value, BEGINNING_OF_TIME, NOW,
};
pub use crate::snapshot::pipe::{ReadOutcome, SnapshotReader};
pub use crate::snapshot::{FLAG_FLUSH_DELETIONS, FORMAT_JSON};
pub use crate::tree::EntryType;
