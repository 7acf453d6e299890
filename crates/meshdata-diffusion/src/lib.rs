//! MESHDATA Diffusion
//!
//! Network data propagation and its consumers.
//!
//! Key concepts:
//! - Authority: the one node allowed to author network data (leader)
//! - Propagation: versioned deltas pushed hop by hop, snapshots on gaps
//! - Links: per-node allow-list of admissible neighbors gating all traffic
//! - Addressing: SLAAC addresses derived from the merged contexts

pub mod addressing;
pub mod authority;
pub mod links;
pub mod propagation;

pub use addressing::*;
pub use authority::*;
pub use links::*;
pub use propagation::*;
