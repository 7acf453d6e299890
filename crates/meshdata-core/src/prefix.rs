//! Prefixes, prefix flags and network data entries
//!
//! Prefix flags use the single-letter syntax of mesh CLIs:
//! - `p` preferred
//! - `a` SLAAC allowed
//! - `r` default route
//! - `o` on-mesh
//! - `s` stable
//!
//! so `"paros"` is a preferred, SLAAC-capable, on-mesh, stable default route.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use crate::{ContextId, MeshError, MeshResult, NodeId};

/// Prefix length required for SLAAC address derivation
pub const SLAAC_PREFIX_LEN: u8 = 64;

/// IPv6 prefix (value + length), bits past the length are always zero
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ipv6Prefix {
    value: u128,
    len: u8,
}

impl Ipv6Prefix {
    pub fn new(value: u128, len: u8) -> MeshResult<Self> {
        if len > 128 {
            return Err(MeshError::InvalidPrefix(format!("length {} > 128", len)));
        }
        Ok(Ipv6Prefix {
            value: value & Self::mask(len),
            len,
        })
    }

    #[inline]
    fn mask(len: u8) -> u128 {
        if len == 0 {
            0
        } else {
            u128::MAX << (128 - len as u32)
        }
    }

    #[inline]
    pub fn value(&self) -> u128 {
        self.value
    }

    #[inline]
    pub fn len(&self) -> u8 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Network portion as an address
    pub fn network(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.value)
    }

    /// Check if an address falls inside this prefix
    pub fn contains(&self, addr: Ipv6Addr) -> bool {
        u128::from(addr) & Self::mask(self.len) == self.value
    }

    /// Only /64 prefixes can carry SLAAC addresses
    #[inline]
    pub fn is_slaac_capable(&self) -> bool {
        self.len == SLAAC_PREFIX_LEN
    }
}

impl FromStr for Ipv6Prefix {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| MeshError::InvalidPrefix(format!("missing length in {:?}", s)))?;
        let addr: Ipv6Addr = addr
            .parse()
            .map_err(|_| MeshError::InvalidPrefix(format!("bad address in {:?}", s)))?;
        let len: u8 = len
            .parse()
            .map_err(|_| MeshError::InvalidPrefix(format!("bad length in {:?}", s)))?;
        Ipv6Prefix::new(u128::from(addr), len)
    }
}

impl fmt::Debug for Ipv6Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prefix({})", self)
    }
}

impl fmt::Display for Ipv6Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.len)
    }
}

/// Prefix flags (1 byte)
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PrefixFlags(pub u8);

impl PrefixFlags {
    pub const NONE: PrefixFlags = PrefixFlags(0);

    // Flag bits
    pub const PREFERRED: u8 = 0b0000_0001;
    pub const SLAAC: u8 = 0b0000_0010;
    pub const DEFAULT_ROUTE: u8 = 0b0000_0100;
    pub const ON_MESH: u8 = 0b0000_1000;
    pub const STABLE: u8 = 0b0001_0000;

    const LETTERS: [(char, u8); 5] = [
        ('p', Self::PREFERRED),
        ('a', Self::SLAAC),
        ('r', Self::DEFAULT_ROUTE),
        ('o', Self::ON_MESH),
        ('s', Self::STABLE),
    ];

    #[inline]
    pub fn new(bits: u8) -> Self {
        PrefixFlags(bits)
    }

    #[inline]
    pub fn is_preferred(self) -> bool {
        self.0 & Self::PREFERRED != 0
    }

    #[inline]
    pub fn is_slaac(self) -> bool {
        self.0 & Self::SLAAC != 0
    }

    #[inline]
    pub fn is_default_route(self) -> bool {
        self.0 & Self::DEFAULT_ROUTE != 0
    }

    #[inline]
    pub fn is_on_mesh(self) -> bool {
        self.0 & Self::ON_MESH != 0
    }

    #[inline]
    pub fn is_stable(self) -> bool {
        self.0 & Self::STABLE != 0
    }

    /// Union of two flag variants of the same prefix
    #[inline]
    pub fn merge(self, other: PrefixFlags) -> PrefixFlags {
        PrefixFlags(self.0 | other.0)
    }

    #[inline]
    pub fn contains(self, other: PrefixFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl FromStr for PrefixFlags {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bits = 0u8;
        for c in s.chars() {
            let (_, bit) = Self::LETTERS
                .iter()
                .find(|(letter, _)| *letter == c)
                .ok_or_else(|| {
                    MeshError::InvalidFlags(format!("unknown flag {:?} in {:?}", c, s))
                })?;
            bits |= bit;
        }
        Ok(PrefixFlags(bits))
    }
}

impl fmt::Debug for PrefixFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({})", self)
    }
}

impl fmt::Display for PrefixFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (letter, bit) in Self::LETTERS {
            if self.0 & bit != 0 {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

impl From<u8> for PrefixFlags {
    fn from(bits: u8) -> Self {
        PrefixFlags(bits)
    }
}

impl From<PrefixFlags> for u8 {
    fn from(flags: PrefixFlags) -> Self {
        flags.0
    }
}

/// On-mesh prefix published in the network data
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PrefixEntry {
    pub prefix: Ipv6Prefix,
    pub flags: PrefixFlags,
    /// Node that registered the prefix
    pub owner: NodeId,
}

impl PrefixEntry {
    pub fn new(prefix: Ipv6Prefix, flags: PrefixFlags, owner: NodeId) -> Self {
        PrefixEntry {
            prefix,
            flags,
            owner,
        }
    }

    /// Eligible for stateless address derivation (given a live context)
    pub fn is_slaac_eligible(&self) -> bool {
        self.flags.is_slaac() && self.prefix.is_slaac_capable()
    }
}

/// Compression context bound to a prefix
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextEntry {
    pub id: ContextId,
    pub prefix: Ipv6Prefix,
    /// Usable for header compression
    pub compress: bool,
}

impl ContextEntry {
    pub fn new(id: ContextId, prefix: Ipv6Prefix) -> Self {
        ContextEntry {
            id,
            prefix,
            compress: true,
        }
    }
}
