//! MESHDATA Runtime - Node orchestration and event loop
//!
//! Each node runs one sequential loop:
//! 1. Ingest frames (decoded from the link layer, malformed ones dropped)
//! 2. Filter by link admissibility
//! 3. Merge deltas and snapshots into the data set
//! 4. Re-forward or request snapshots
//! 5. Expire retiring context ids
//! 6. Reconcile configured addresses
//! 7. Schedule transmission (handled externally via pop_outgoing)
//!
//! [`NodeService`] runs the same loop as a tokio task.

pub mod node;
pub mod service;

pub use node::*;
pub use service::*;
