//! MESHDATA Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the network data
//! distribution protocol:
//! - Identifiers (NodeId, ContextId, DataVersion)
//! - IPv6 prefixes, prefix flags and network data entries
//! - SLAAC addresses and interface identifiers
//! - The protocol error type

pub mod address;
pub mod error;
pub mod id;
pub mod prefix;

pub use address::*;
pub use error::*;
pub use id::*;
pub use prefix::*;
