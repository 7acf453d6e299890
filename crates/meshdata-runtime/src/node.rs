//! MESHDATA Node - per-node sequential event loop

use std::collections::VecDeque;
use std::net::Ipv6Addr;
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use meshdata_core::{
    DataVersion, Ipv6Prefix, MeshAddress, MeshError, MeshResult, NodeId, PrefixFlags,
};
use meshdata_diffusion::{
    AddressConfigurator, AttachState, LinkSupervisor, LinkTransition, Outbound,
    PropagationEngine, PropagationStats, Publisher, Role,
};
use meshdata_state::{AllocatorConfig, ContextAllocator, DatasetStore, NetworkData};
use meshdata_wire::{Frame, MAX_CONTEXTS_PER_FRAME};
use tracing::{debug, info, warn};

/// MESHDATA Node configuration
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Context ids the authority may hand out
    pub context_range: RangeInclusive<u8>,
    /// Ticks a released context id stays unusable
    pub context_reuse_delay: u64,
    /// Maximum incoming frame buffer
    pub max_inbound: usize,
    /// Maximum outgoing frame buffer
    pub max_outbound: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let alloc = AllocatorConfig::default();
        NodeConfig {
            context_range: alloc.range,
            context_reuse_delay: alloc.reuse_delay,
            max_inbound: 1000,
            max_outbound: 1000,
        }
    }
}

impl NodeConfig {
    pub fn with_context_range(mut self, range: RangeInclusive<u8>) -> Self {
        self.context_range = range;
        self
    }

    pub fn with_context_reuse_delay(mut self, ticks: u64) -> Self {
        self.context_reuse_delay = ticks;
        self
    }

    pub fn with_max_inbound(mut self, max: usize) -> Self {
        self.max_inbound = max;
        self
    }

    pub fn with_max_outbound(mut self, max: usize) -> Self {
        self.max_outbound = max;
        self
    }

    /// Every id in the context range must be usable at once: the full data
    /// set has to fit a single snapshot or jump delta
    pub fn validate(&self) -> MeshResult<()> {
        let range = &self.context_range;
        if range.is_empty() || *range.start() == 0 {
            return Err(MeshError::InvalidConfig(format!(
                "context range {:?} must be non-empty and exclude id 0",
                range
            )));
        }
        let ids = range.clone().count();
        if ids > MAX_CONTEXTS_PER_FRAME {
            return Err(MeshError::InvalidConfig(format!(
                "context range {:?} allows {} ids, a frame carries at most {}",
                range, ids, MAX_CONTEXTS_PER_FRAME
            )));
        }
        Ok(())
    }

    pub fn allocator_config(&self) -> AllocatorConfig {
        AllocatorConfig::default()
            .with_range(self.context_range.clone())
            .with_reuse_delay(self.context_reuse_delay)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RuntimeStats {
    pub ticks: u64,
    pub incoming_queued: u64,
    /// Inbound buffer full, or node detached
    pub incoming_dropped: u64,
    pub malformed_frames: u64,
    pub outgoing_queued: u64,
    pub outgoing_popped: u64,
    /// Queued for a neighbor that stopped being admissible
    pub outgoing_suppressed: u64,
    pub addresses_added: u64,
    pub addresses_removed: u64,
    pub last_tick_duration: Duration,
}

/// Frame addressed to a direct neighbor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingFrame {
    pub to: NodeId,
    pub frame: Frame,
}

/// MESHDATA Node - one role-tagged record for leader, router and end device
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    role: Role,
    /// Attached to the mesh
    started: bool,
    /// Last tick seen
    now: u64,
    store: DatasetStore,
    allocator: ContextAllocator,
    links: LinkSupervisor,
    addresses: AddressConfigurator,
    propagation: PropagationEngine,
    /// Incoming frame buffer
    incoming: VecDeque<Frame>,
    /// Outgoing frame buffer
    outgoing: VecDeque<OutgoingFrame>,
    config: NodeConfig,
    stats: RuntimeStats,
}

impl Node {
    pub fn new(id: NodeId, role: Role) -> Self {
        Self::build(id, role, NodeConfig::default())
    }

    pub fn with_config(id: NodeId, role: Role, config: NodeConfig) -> MeshResult<Self> {
        config.validate()?;
        Ok(Self::build(id, role, config))
    }

    fn build(id: NodeId, role: Role, config: NodeConfig) -> Self {
        Node {
            id,
            role,
            started: false,
            now: 0,
            store: DatasetStore::new(id, role.can_publish()),
            allocator: ContextAllocator::new(config.allocator_config()),
            links: LinkSupervisor::new(id),
            addresses: AddressConfigurator::new(id),
            propagation: PropagationEngine::new(id, role),
            incoming: VecDeque::new(),
            outgoing: VecDeque::new(),
            config,
            stats: RuntimeStats::default(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Attach to the mesh and re-sync with every admissible neighbor
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        info!(node = %self.id, role = ?self.role, "node started");

        for neighbor in self.links.admissible_neighbors() {
            let out = self
                .propagation
                .on_link_restored(neighbor, &self.store, &self.links);
            self.enqueue(out);
        }
    }

    /// Leave the mesh; all network data and addresses are forgotten
    pub fn detach(&mut self) {
        self.started = false;
        self.store.reset();
        self.store.take_notifications();
        self.allocator.reset();
        let report = self.addresses.clear();
        self.stats.addresses_removed += report.removed.len() as u64;
        self.incoming.clear();
        self.outgoing.clear();
        info!(node = %self.id, "node detached");
    }

    pub fn get_state(&self) -> AttachState {
        AttachState::from_role(self.role, self.started)
    }

    /// Authority entry point: publish a prefix to the whole mesh
    pub fn add_prefix_and_publish(
        &mut self,
        prefix: Ipv6Prefix,
        flags: PrefixFlags,
    ) -> MeshResult<DataVersion> {
        let before = self.store.version();
        self.allocator.expire(self.now);
        let version = Publisher::new(self.id, self.role, &mut self.store, &mut self.allocator)
            .add_prefix(prefix, flags)?;
        self.after_local_change(before, version);
        Ok(version)
    }

    /// Authority entry point: withdraw a prefix from the whole mesh
    pub fn remove_prefix_and_publish(&mut self, prefix: Ipv6Prefix) -> MeshResult<DataVersion> {
        let before = self.store.version();
        self.allocator.expire(self.now);
        let version = Publisher::new(self.id, self.role, &mut self.store, &mut self.allocator)
            .remove_prefix(prefix)?;
        self.after_local_change(before, version);
        Ok(version)
    }

    fn after_local_change(&mut self, before: DataVersion, after: DataVersion) {
        self.process_notifications();
        if after > before {
            let out = self.propagation.on_local_change(&self.store, &self.links);
            self.enqueue(out);
        }
    }

    pub fn add_neighbor(&mut self, neighbor: NodeId) {
        self.links.add_neighbor(neighbor);
    }

    pub fn remove_neighbor(&mut self, neighbor: NodeId) -> bool {
        self.links.remove_neighbor(neighbor)
    }

    /// Change admissibility of a neighbor; restoring a link re-syncs it
    pub fn set_admissible(&mut self, neighbor: NodeId, admissible: bool) -> LinkTransition {
        let transition = self.links.set_admissible(neighbor, admissible);
        if transition == LinkTransition::Restored && self.started {
            let out = self
                .propagation
                .on_link_restored(neighbor, &self.store, &self.links);
            self.enqueue(out);
        }
        transition
    }

    pub fn is_admissible(&self, neighbor: NodeId) -> bool {
        self.links.is_admissible(neighbor)
    }

    /// Queue raw bytes from the link layer; malformed frames are dropped
    pub fn queue_incoming(&mut self, data: &[u8]) -> bool {
        match Frame::parse(data) {
            Ok(frame) => self.queue_frame(frame),
            Err(e) => {
                warn!(node = %self.id, error = %e, len = data.len(), "dropping malformed frame");
                self.stats.malformed_frames += 1;
                false
            }
        }
    }

    /// Queue an already decoded frame
    pub fn queue_frame(&mut self, frame: Frame) -> bool {
        if !self.started || self.incoming.len() >= self.config.max_inbound {
            self.stats.incoming_dropped += 1;
            return false;
        }
        self.incoming.push_back(frame);
        self.stats.incoming_queued += 1;
        true
    }

    /// Get next outgoing frame whose link is still admissible
    pub fn pop_outgoing(&mut self) -> Option<OutgoingFrame> {
        while let Some(out) = self.outgoing.pop_front() {
            if !self.links.is_admissible(out.to) {
                debug!(node = %self.id, to = %out.to, "suppressing frame to inadmissible neighbor");
                self.stats.outgoing_suppressed += 1;
                continue;
            }
            self.stats.outgoing_popped += 1;
            return Some(out);
        }
        None
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    pub fn has_incoming(&self) -> bool {
        !self.incoming.is_empty()
    }

    /// Run one pass of the event loop
    pub fn tick(&mut self, now: u64) {
        let start = Instant::now();
        self.now = now;
        self.stats.ticks += 1;

        // Inbound frames, in arrival order
        while let Some(frame) = self.incoming.pop_front() {
            let out = self
                .propagation
                .on_frame(&frame, &mut self.store, &self.links);
            self.enqueue(out);
        }

        // Context ids past their reuse delay
        if self.role.can_publish() {
            self.allocator.expire(now);
        }

        self.process_notifications();
        self.stats.last_tick_duration = start.elapsed();
    }

    /// Feed change notifications to the allocator and the address engine
    fn process_notifications(&mut self) {
        let changes = self.store.take_notifications();
        if changes.is_empty() {
            return;
        }
        if self.role.can_publish() {
            for change in &changes {
                self.allocator.observe(change);
            }
        }

        let report = self.addresses.reconcile(self.store.data());
        self.stats.addresses_added += report.added.len() as u64;
        self.stats.addresses_removed += report.removed.len() as u64;
    }

    fn enqueue(&mut self, out: Vec<Outbound>) {
        if !self.started {
            return;
        }
        for o in out {
            if self.outgoing.len() >= self.config.max_outbound {
                warn!(node = %self.id, to = %o.to, "outgoing buffer full, dropping frame");
                continue;
            }
            self.outgoing.push_back(OutgoingFrame {
                to: o.to,
                frame: Frame::new(self.id, o.message),
            });
            self.stats.outgoing_queued += 1;
        }
    }

    pub fn configured_addresses(&self) -> Vec<MeshAddress> {
        self.addresses.addresses()
    }

    pub fn has_address(&self, addr: Ipv6Addr) -> bool {
        self.addresses.has_address(addr)
    }

    pub fn version(&self) -> DataVersion {
        self.store.version()
    }

    pub fn data(&self) -> &NetworkData {
        self.store.data()
    }

    pub fn links(&self) -> &LinkSupervisor {
        &self.links
    }

    pub fn allocator(&self) -> &ContextAllocator {
        &self.allocator
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn propagation_stats(&self) -> &PropagationStats {
        self.propagation.stats()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}
