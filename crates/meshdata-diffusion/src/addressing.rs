//! Address configuration - SLAAC addresses from network data contexts
//!
//! Reconciliation is computed from the full merged data set, never from the
//! notification contents alone, so running it twice is a no-op.

use std::collections::BTreeMap;
use std::net::Ipv6Addr;

use meshdata_core::{ContextId, InterfaceId, MeshAddress, NodeId};
use meshdata_state::NetworkData;
use tracing::{debug, info};

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<MeshAddress>,
    pub removed: Vec<MeshAddress>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Per-node address configuration engine
#[derive(Debug, Clone)]
pub struct AddressConfigurator {
    owner: NodeId,
    iid: InterfaceId,
    /// At most one address per context
    configured: BTreeMap<ContextId, MeshAddress>,
}

impl AddressConfigurator {
    pub fn new(owner: NodeId) -> Self {
        Self {
            owner,
            iid: InterfaceId::from_node(owner),
            configured: BTreeMap::new(),
        }
    }

    pub fn interface_id(&self) -> InterfaceId {
        self.iid
    }

    /// Addresses derivable from a data set
    pub fn derive(&self, data: &NetworkData) -> BTreeMap<ContextId, MeshAddress> {
        data.contexts()
            .filter_map(|ctx| {
                let entry = data.prefix(&ctx.prefix)?;
                if !entry.is_slaac_eligible() {
                    return None;
                }
                Some((
                    ctx.id,
                    MeshAddress::slaac(ctx.prefix, ctx.id, self.iid, entry.flags.is_preferred()),
                ))
            })
            .collect()
    }

    /// Bring configured addresses in line with the data set
    pub fn reconcile(&mut self, data: &NetworkData) -> ReconcileReport {
        let wanted = self.derive(data);
        let mut report = ReconcileReport::default();

        let stale: Vec<ContextId> = self
            .configured
            .iter()
            .filter(|(id, addr)| wanted.get(*id).map(|w| w.addr) != Some(addr.addr))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(addr) = self.configured.remove(&id) {
                info!(node = %self.owner, address = %addr, context = %id, "address removed");
                report.removed.push(addr);
            }
        }

        for (id, addr) in wanted {
            match self.configured.get_mut(&id) {
                Some(existing) if *existing == addr => {}
                Some(existing) => {
                    debug!(
                        node = %self.owner,
                        address = %addr,
                        preferred = addr.preferred,
                        "address refreshed"
                    );
                    *existing = addr;
                }
                None => {
                    info!(node = %self.owner, address = %addr, context = %id, "address added");
                    self.configured.insert(id, addr);
                    report.added.push(addr);
                }
            }
        }

        report
    }

    /// Drop every address (detach)
    pub fn clear(&mut self) -> ReconcileReport {
        let removed: Vec<MeshAddress> =
            std::mem::take(&mut self.configured).into_values().collect();
        for addr in &removed {
            info!(node = %self.owner, address = %addr, "address removed on detach");
        }
        ReconcileReport {
            added: Vec::new(),
            removed,
        }
    }

    pub fn addresses(&self) -> Vec<MeshAddress> {
        self.configured.values().copied().collect()
    }

    pub fn has_address(&self, addr: Ipv6Addr) -> bool {
        self.configured.values().any(|a| a.addr == addr)
    }

    pub fn address_for(&self, context: ContextId) -> Option<&MeshAddress> {
        self.configured.get(&context)
    }

    pub fn len(&self) -> usize {
        self.configured.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configured.is_empty()
    }
}
