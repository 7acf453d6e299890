//! MESHDATA Wire Protocol - Frame encoding for network data propagation
//!
//! Every hop carries one of three messages:
//! - Delta: incremental change between two versions
//! - SnapshotRequest: gap recovery, asks for the full data set
//! - Snapshot: the full data set

pub mod frame;
pub mod header;

pub use frame::*;
pub use header::*;
