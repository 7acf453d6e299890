//! Context id allocation (authority only)
//!
//! Ids are handed out lowest-first from a bounded range. A released id is
//! held back for `reuse_delay` ticks so that a dependent still holding the
//! previous version never reinterprets an address under a reused id.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use meshdata_core::{ContextId, Ipv6Prefix, MeshError, MeshResult};
use tracing::debug;

use crate::DatasetChanged;

/// Allocator configuration
#[derive(Clone, Debug)]
pub struct AllocatorConfig {
    /// Valid context ids (id 0 is kept for the mesh-local prefix)
    pub range: RangeInclusive<u8>,
    /// Ticks a released id stays unusable
    pub reuse_delay: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            range: 1..=15,
            reuse_delay: 8,
        }
    }
}

impl AllocatorConfig {
    pub fn with_range(mut self, range: RangeInclusive<u8>) -> Self {
        self.range = range;
        self
    }

    pub fn with_reuse_delay(mut self, ticks: u64) -> Self {
        self.reuse_delay = ticks;
        self
    }
}

/// Context allocator
#[derive(Debug, Default)]
pub struct ContextAllocator {
    config: AllocatorConfig,
    /// Ids bound to live prefixes
    live: BTreeMap<ContextId, Ipv6Prefix>,
    /// Released ids and the tick they were released at
    retiring: BTreeMap<ContextId, u64>,
    /// Last tick seen
    now: u64,
}

impl ContextAllocator {
    pub fn new(config: AllocatorConfig) -> Self {
        ContextAllocator {
            config,
            ..Default::default()
        }
    }

    /// Id for a prefix: its current id if it has one, else the lowest free id
    pub fn allocate(&mut self, prefix: Ipv6Prefix) -> MeshResult<ContextId> {
        if let Some((&id, _)) = self.live.iter().find(|(_, p)| **p == prefix) {
            return Ok(id);
        }

        let id = self
            .config
            .range
            .clone()
            .map(ContextId::new)
            .find(|id| !self.live.contains_key(id) && !self.retiring.contains_key(id))
            .ok_or(MeshError::ExhaustedContexts)?;

        debug!(context = %id, prefix = %prefix, "allocated context");
        self.live.insert(id, prefix);
        Ok(id)
    }

    /// Retire an id; it becomes reusable after the reuse delay
    pub fn release(&mut self, id: ContextId, now: u64) {
        if self.live.remove(&id).is_some() {
            debug!(context = %id, now, "context retiring");
            self.retiring.insert(id, now);
        }
    }

    /// Return ids whose reuse delay has passed to the free pool
    pub fn expire(&mut self, now: u64) -> Vec<ContextId> {
        self.now = now;
        let delay = self.config.reuse_delay;
        let expired: Vec<ContextId> = self
            .retiring
            .iter()
            .filter(|&(_, &released)| now.saturating_sub(released) >= delay)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.retiring.remove(id);
            debug!(context = %id, now, "context reusable");
        }
        expired
    }

    /// Track a dataset change notification
    pub fn observe(&mut self, change: &DatasetChanged) {
        for id in &change.contexts_removed {
            self.release(*id, self.now);
        }
        for ctx in &change.contexts_added {
            self.retiring.remove(&ctx.id);
            self.live.insert(ctx.id, ctx.prefix);
        }
    }

    pub fn is_live(&self, id: ContextId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn is_retiring(&self, id: ContextId) -> bool {
        self.retiring.contains_key(&id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Drop all state (authority restart)
    pub fn reset(&mut self) {
        self.live.clear();
        self.retiring.clear();
    }
}
