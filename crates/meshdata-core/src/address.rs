//! SLAAC addresses
//!
//! An address is the /64 prefix of a context followed by the node's fixed
//! interface identifier, so the same (prefix, node) always yields the same
//! address.

use std::fmt;
use std::net::Ipv6Addr;

use crate::{ContextId, Ipv6Prefix, NodeId};

/// Universal/local bit of a modified EUI-64 interface identifier
const UNIVERSAL_LOCAL_BIT: u64 = 0x0200_0000_0000_0000;

/// Fixed per-node interface identifier (lower 64 bits of every SLAAC address)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InterfaceId(pub u64);

impl InterfaceId {
    /// Derive from the node's extended address (U/L bit flipped)
    #[inline]
    pub fn from_node(node: NodeId) -> Self {
        InterfaceId(node.0 ^ UNIVERSAL_LOCAL_BIT)
    }
}

impl fmt::Debug for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iid({:016x})", self.0)
    }
}

/// Address configured from a network data context
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshAddress {
    pub addr: Ipv6Addr,
    /// Context the address was derived under
    pub context: ContextId,
    pub prefix: Ipv6Prefix,
    pub preferred: bool,
}

impl MeshAddress {
    /// Combine a /64 prefix with an interface identifier
    pub fn slaac(
        prefix: Ipv6Prefix,
        context: ContextId,
        iid: InterfaceId,
        preferred: bool,
    ) -> Self {
        let addr = Ipv6Addr::from(prefix.value() | iid.0 as u128);
        MeshAddress {
            addr,
            context,
            prefix,
            preferred,
        }
    }
}

impl fmt::Display for MeshAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_id_flips_ul_bit() {
        let iid = InterfaceId::from_node(NodeId::new(0x1234_5678_9abc_def0));
        assert_eq!(iid.0, 0x1034_5678_9abc_def0);
    }

    #[test]
    fn test_slaac_is_deterministic() {
        let prefix: Ipv6Prefix = "2001:2:0:1::/64".parse().unwrap();
        let iid = InterfaceId::from_node(NodeId::new(0x0000_0000_0000_0042));
        let a = MeshAddress::slaac(prefix, ContextId::new(1), iid, true);
        let b = MeshAddress::slaac(prefix, ContextId::new(1), iid, true);

        assert_eq!(a, b);
        assert!(prefix.contains(a.addr));
        assert_eq!(a.addr.to_string(), "2001:2:0:1:200::42");
    }
}
