//! Bounded allocation pools for samples and their textual payloads.
//!
//! The hub targets constrained deployments: sample count and string storage
//! are capacity-planned up front. Strings draw from three size tiers so that
//! short payloads do not fragment the large buffers; each sub-tier's entry
//! count is derived from half the byte capacity of its parent tier. Freed
//! buffers return to their tier's free list when the last reference drops.
//!
//! Pool exhaustion is fatal by design: a correctly sized deployment never
//! exhausts a pool, and there is no reasonable degraded mode on the kind of
//! device this targets.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use tracing::trace;

use crate::config::{HubConfig, MED_STRING_BYTES, SMALL_STRING_BYTES};
use crate::error::{HubError, Result};

const TIER_COUNT: usize = 3;

struct Tier {
    bytes: usize,
    capacity: usize,
    in_use: Cell<usize>,
    free: RefCell<Vec<String>>,
}

impl Tier {
    fn new(bytes: usize, capacity: usize) -> Self {
        Self {
            bytes,
            capacity,
            in_use: Cell::new(0),
            free: RefCell::new(Vec::new()),
        }
    }

    fn try_take(&self) -> Option<String> {
        if let Some(mut buf) = self.free.borrow_mut().pop() {
            buf.clear();
            self.in_use.set(self.in_use.get() + 1);
            return Some(buf);
        }
        if self.in_use.get() < self.capacity {
            self.in_use.set(self.in_use.get() + 1);
            return Some(String::with_capacity(self.bytes));
        }
        None
    }

    fn give_back(&self, mut buf: String) {
        buf.clear();
        self.in_use.set(self.in_use.get() - 1);
        self.free.borrow_mut().push(buf);
    }
}

struct PoolInner {
    sample_capacity: usize,
    samples_live: Cell<usize>,
    // Ordered smallest to largest; allocation picks the smallest fitting
    // tier and escalates on exhaustion.
    tiers: [Tier; TIER_COUNT],
}

/// Shared handle to the hub's allocation pools.
#[derive(Clone)]
pub struct SamplePools {
    inner: Rc<PoolInner>,
}

impl SamplePools {
    pub(crate) fn new(cfg: &HubConfig) -> Self {
        Self {
            inner: Rc::new(PoolInner {
                sample_capacity: cfg.sample_pool_size,
                samples_live: Cell::new(0),
                tiers: [
                    Tier::new(SMALL_STRING_BYTES, cfg.small_string_pool_size()),
                    Tier::new(MED_STRING_BYTES, cfg.medium_string_pool_size()),
                    Tier::new(cfg.max_string_bytes, cfg.large_string_pool_size),
                ],
            }),
        }
    }

    /// Largest textual payload the pools can hold.
    pub fn max_string_bytes(&self) -> usize {
        self.inner.tiers[TIER_COUNT - 1].bytes
    }

    /// Claims one sample slot. Panics when the pool is exhausted.
    pub(crate) fn take_sample_slot(&self) -> SampleSlot {
        let live = self.inner.samples_live.get();
        assert!(
            live < self.inner.sample_capacity,
            "data sample pool exhausted ({} slots)",
            self.inner.sample_capacity
        );
        self.inner.samples_live.set(live + 1);
        SampleSlot {
            pool: self.inner.clone(),
        }
    }

    /// Copies `content` into a pooled buffer from the smallest fitting tier,
    /// escalating to larger tiers when one is exhausted.
    ///
    /// Returns `Overflow` for payloads larger than the large tier. Tier
    /// exhaustion across the board is fatal.
    pub(crate) fn alloc_string(&self, content: &str) -> Result<PooledStr> {
        let len = content.len();
        if len > self.max_string_bytes() {
            return Err(HubError::Overflow);
        }
        for (index, tier) in self.inner.tiers.iter().enumerate() {
            if len > tier.bytes {
                continue;
            }
            if let Some(mut buf) = tier.try_take() {
                buf.push_str(content);
                trace!(len, tier = tier.bytes, "pool.string.alloc");
                return Ok(PooledStr {
                    buf: Some(buf),
                    tier: index,
                    pool: self.inner.clone(),
                });
            }
        }
        panic!("string pool exhausted: no tier free for {len} bytes");
    }

    /// Point-in-time pool usage, for diagnostics.
    pub fn stats(&self) -> PoolStats {
        let tier = |t: &Tier| TierStats {
            bytes: t.bytes,
            capacity: t.capacity,
            in_use: t.in_use.get(),
        };
        PoolStats {
            samples_live: self.inner.samples_live.get(),
            sample_capacity: self.inner.sample_capacity,
            small: tier(&self.inner.tiers[0]),
            medium: tier(&self.inner.tiers[1]),
            large: tier(&self.inner.tiers[2]),
        }
    }
}

/// RAII claim on one sample slot.
pub(crate) struct SampleSlot {
    pool: Rc<PoolInner>,
}

impl Drop for SampleSlot {
    fn drop(&mut self) {
        self.pool
            .samples_live
            .set(self.pool.samples_live.get() - 1);
    }
}

/// An immutable pooled string payload; the buffer returns to its tier's free
/// list on drop.
pub struct PooledStr {
    buf: Option<String>,
    tier: usize,
    pool: Rc<PoolInner>,
}

impl PooledStr {
    /// Borrows the payload.
    pub fn as_str(&self) -> &str {
        self.buf.as_deref().unwrap_or("")
    }
}

impl Deref for PooledStr {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Debug for PooledStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for PooledStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for PooledStr {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Drop for PooledStr {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.tiers[self.tier].give_back(buf);
        }
    }
}

/// Usage numbers for one string tier.
#[derive(Clone, Copy, Debug)]
pub struct TierStats {
    /// Byte capacity of one entry in this tier.
    pub bytes: usize,
    /// Number of entries this tier may hand out.
    pub capacity: usize,
    /// Entries currently handed out.
    pub in_use: usize,
}

/// Point-in-time usage of all pools.
#[derive(Clone, Copy, Debug)]
pub struct PoolStats {
    /// Live data samples.
    pub samples_live: usize,
    /// Sample slot capacity.
    pub sample_capacity: usize,
    /// Small string tier usage.
    pub small: TierStats,
    /// Medium string tier usage.
    pub medium: TierStats,
    /// Large string tier usage.
    pub large: TierStats,
}
