//! Authority model - who may author network data
//!
//! Exactly one node (the leader) publishes network data. Role is a tag on
//! the node, checked at the API boundary before any mutation.

use std::fmt;

use meshdata_core::{DataVersion, Ipv6Prefix, MeshError, MeshResult, NodeId, PrefixFlags};
use meshdata_state::{ContextAllocator, DatasetStore, LocalChange};

/// Node role in network data distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sole author of network data (leader)
    Authority,
    /// Receives and re-forwards to its own dependents (router)
    Relay,
    /// Receives only (end device)
    Leaf,
}

impl Role {
    pub fn can_publish(self) -> bool {
        self == Role::Authority
    }

    /// Relays and the authority forward to dependents
    pub fn forwards(self) -> bool {
        matches!(self, Role::Authority | Role::Relay)
    }
}

/// Attachment state as reported to the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachState {
    Leader,
    Router,
    Child,
    Detached,
}

impl AttachState {
    pub fn from_role(role: Role, attached: bool) -> Self {
        if !attached {
            return AttachState::Detached;
        }
        match role {
            Role::Authority => AttachState::Leader,
            Role::Relay => AttachState::Router,
            Role::Leaf => AttachState::Child,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttachState::Leader => "leader",
            AttachState::Router => "router",
            AttachState::Child => "child",
            AttachState::Detached => "detached",
        }
    }
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authority-side publishing: allocate a context and commit the change
#[derive(Debug)]
pub struct Publisher<'a> {
    node: NodeId,
    role: Role,
    store: &'a mut DatasetStore,
    allocator: &'a mut ContextAllocator,
}

impl<'a> Publisher<'a> {
    pub fn new(
        node: NodeId,
        role: Role,
        store: &'a mut DatasetStore,
        allocator: &'a mut ContextAllocator,
    ) -> Self {
        Self {
            node,
            role,
            store,
            allocator,
        }
    }

    fn check_authority(&self) -> MeshResult<()> {
        if !self.role.can_publish() {
            return Err(MeshError::NotAuthority(self.node));
        }
        Ok(())
    }

    /// Publish a prefix; a fresh context id is allocated unless the prefix
    /// already owns one
    pub fn add_prefix(
        &mut self,
        prefix: Ipv6Prefix,
        flags: PrefixFlags,
    ) -> MeshResult<DataVersion> {
        self.check_authority()?;
        let context = self.allocator.allocate(prefix)?;
        self.store.apply_local_change(LocalChange::AddPrefix {
            prefix,
            flags,
            context,
        })
    }

    /// Withdraw a prefix; its context starts retiring once the change
    /// notification reaches the allocator
    pub fn remove_prefix(&mut self, prefix: Ipv6Prefix) -> MeshResult<DataVersion> {
        self.check_authority()?;
        self.store
            .apply_local_change(LocalChange::RemovePrefix(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshdata_core::ContextId;
    use meshdata_state::AllocatorConfig;

    fn prefix(s: &str) -> Ipv6Prefix {
        s.parse().unwrap()
    }

    #[test]
    fn test_attach_state_names() {
        assert_eq!(AttachState::from_role(Role::Authority, true).as_str(), "leader");
        assert_eq!(AttachState::from_role(Role::Relay, true).as_str(), "router");
        assert_eq!(AttachState::from_role(Role::Leaf, true).to_string(), "child");
        assert_eq!(AttachState::from_role(Role::Leaf, false), AttachState::Detached);
    }

    #[test]
    fn test_publisher_allocates_contexts() {
        let leader = NodeId::new(1);
        let mut store = DatasetStore::new(leader, true);
        let mut alloc = ContextAllocator::new(AllocatorConfig::default());
        let mut publisher = Publisher::new(leader, Role::Authority, &mut store, &mut alloc);

        publisher.add_prefix(prefix("2001:2:0:1::/64"), "paros".parse().unwrap()).unwrap();
        let v = publisher.add_prefix(prefix("2001:2:0:2::/64"), "paros".parse().unwrap()).unwrap();
        assert_eq!(v, DataVersion::new(2));

        let ctx = store.data().context_for(&prefix("2001:2:0:2::/64")).unwrap();
        assert_eq!(ctx.id, ContextId::new(2));
    }

    #[test]
    fn test_publisher_rejects_non_authority() {
        let node = NodeId::new(2);
        let mut store = DatasetStore::new(node, false);
        let mut alloc = ContextAllocator::new(AllocatorConfig::default());
        let mut publisher = Publisher::new(node, Role::Leaf, &mut store, &mut alloc);

        let err = publisher
            .add_prefix(prefix("2001:2:0:1::/64"), "paros".parse().unwrap())
            .unwrap_err();
        assert_eq!(err, MeshError::NotAuthority(node));
        assert_eq!(alloc.live_count(), 0);
    }

    #[test]
    fn test_publisher_surfaces_exhaustion() {
        let leader = NodeId::new(1);
        let mut store = DatasetStore::new(leader, true);
        let mut alloc = ContextAllocator::new(AllocatorConfig::default().with_range(1..=1));
        let mut publisher = Publisher::new(leader, Role::Authority, &mut store, &mut alloc);

        publisher.add_prefix(prefix("2001:2:0:1::/64"), "paros".parse().unwrap()).unwrap();
        let err = publisher
            .add_prefix(prefix("2001:2:0:2::/64"), "paros".parse().unwrap())
            .unwrap_err();
        assert_eq!(err, MeshError::ExhaustedContexts);
        assert_eq!(store.version(), DataVersion::new(1));
    }
}
