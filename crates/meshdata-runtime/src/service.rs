//! Node service - a node driven as an independent tokio task
//!
//! Everything that touches the node's data set goes through the command
//! channel, so inbound frames, authority mutations and admissibility changes
//! are serialized per node. The harness only ever sees a [`NodeView`].
//!
//! The loop never waits on its outbound channel: a frame that finds the
//! channel full is dropped and counted, like a lost radio frame.

use std::sync::Arc;

use bytes::Bytes;
use meshdata_core::{
    DataVersion, Ipv6Prefix, MeshAddress, MeshError, MeshResult, NodeId, PrefixFlags,
};
use meshdata_diffusion::AttachState;
use parking_lot::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Node;

/// Commands accepted by a running node
#[derive(Debug)]
pub enum NodeCommand {
    Start,
    Detach,
    /// Encoded frame from the link layer
    Inbound(Bytes),
    AddPrefix {
        prefix: Ipv6Prefix,
        flags: PrefixFlags,
        reply: oneshot::Sender<MeshResult<DataVersion>>,
    },
    RemovePrefix {
        prefix: Ipv6Prefix,
        reply: oneshot::Sender<MeshResult<DataVersion>>,
    },
    AddNeighbor(NodeId),
    SetAdmissible {
        neighbor: NodeId,
        admissible: bool,
    },
    Tick(u64),
    Shutdown,
}

/// Encoded frame leaving a node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundBytes {
    pub from: NodeId,
    pub to: NodeId,
    pub data: Bytes,
}

/// Read-only snapshot of a node, published after every command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeView {
    pub id: NodeId,
    pub state: AttachState,
    pub version: DataVersion,
    pub addresses: Vec<MeshAddress>,
    /// Encoded frames dropped because the outbound channel was full
    pub outbound_dropped: u64,
}

impl NodeView {
    pub fn of(node: &Node) -> Self {
        NodeView {
            id: node.node_id(),
            state: node.get_state(),
            version: node.version(),
            addresses: node.configured_addresses(),
            outbound_dropped: 0,
        }
    }
}

/// Handle to a running node
#[derive(Clone, Debug)]
pub struct NodeHandle {
    id: NodeId,
    commands: mpsc::Sender<NodeCommand>,
    view: Arc<RwLock<NodeView>>,
}

impl NodeHandle {
    pub fn node_id(&self) -> NodeId {
        self.id
    }

    pub fn view(&self) -> NodeView {
        self.view.read().clone()
    }

    async fn send(&self, cmd: NodeCommand) -> MeshResult<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| MeshError::ServiceClosed)
    }

    pub async fn start(&self) -> MeshResult<()> {
        self.send(NodeCommand::Start).await
    }

    pub async fn detach(&self) -> MeshResult<()> {
        self.send(NodeCommand::Detach).await
    }

    pub async fn inbound(&self, data: Bytes) -> MeshResult<()> {
        self.send(NodeCommand::Inbound(data)).await
    }

    pub async fn add_neighbor(&self, neighbor: NodeId) -> MeshResult<()> {
        self.send(NodeCommand::AddNeighbor(neighbor)).await
    }

    pub async fn set_admissible(&self, neighbor: NodeId, admissible: bool) -> MeshResult<()> {
        self.send(NodeCommand::SetAdmissible {
            neighbor,
            admissible,
        })
        .await
    }

    pub async fn tick(&self, now: u64) -> MeshResult<()> {
        self.send(NodeCommand::Tick(now)).await
    }

    pub async fn add_prefix(
        &self,
        prefix: Ipv6Prefix,
        flags: PrefixFlags,
    ) -> MeshResult<DataVersion> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::AddPrefix {
            prefix,
            flags,
            reply,
        })
        .await?;
        rx.await.map_err(|_| MeshError::ServiceClosed)?
    }

    pub async fn remove_prefix(&self, prefix: Ipv6Prefix) -> MeshResult<DataVersion> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::RemovePrefix { prefix, reply }).await?;
        rx.await.map_err(|_| MeshError::ServiceClosed)?
    }

    pub async fn shutdown(&self) -> MeshResult<()> {
        self.send(NodeCommand::Shutdown).await
    }
}

/// Spawns nodes onto the tokio runtime
pub struct NodeService;

impl NodeService {
    /// Run `node` as a task. Returns its handle, the stream of encoded
    /// outbound frames, and the task itself (yielding the node on shutdown).
    pub fn spawn(
        node: Node,
        capacity: usize,
    ) -> (NodeHandle, mpsc::Receiver<OutboundBytes>, JoinHandle<Node>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let view = Arc::new(RwLock::new(NodeView::of(&node)));

        let handle = NodeHandle {
            id: node.node_id(),
            commands: cmd_tx,
            view: Arc::clone(&view),
        };
        let task = tokio::spawn(run(node, cmd_rx, out_tx, view));
        (handle, out_rx, task)
    }
}

async fn run(
    mut node: Node,
    mut commands: mpsc::Receiver<NodeCommand>,
    outbound: mpsc::Sender<OutboundBytes>,
    view: Arc<RwLock<NodeView>>,
) -> Node {
    let mut now = 0u64;
    let mut dropped = 0u64;

    while let Some(cmd) = commands.recv().await {
        match cmd {
            NodeCommand::Start => node.start(),
            NodeCommand::Detach => node.detach(),
            NodeCommand::Inbound(data) => {
                if node.queue_incoming(&data) {
                    node.tick(now);
                }
            }
            NodeCommand::AddPrefix {
                prefix,
                flags,
                reply,
            } => {
                let _ = reply.send(node.add_prefix_and_publish(prefix, flags));
            }
            NodeCommand::RemovePrefix { prefix, reply } => {
                let _ = reply.send(node.remove_prefix_and_publish(prefix));
            }
            NodeCommand::AddNeighbor(neighbor) => node.add_neighbor(neighbor),
            NodeCommand::SetAdmissible {
                neighbor,
                admissible,
            } => {
                node.set_admissible(neighbor, admissible);
            }
            NodeCommand::Tick(t) => {
                now = t;
                node.tick(now);
            }
            NodeCommand::Shutdown => break,
        }

        while let Some(out) = node.pop_outgoing() {
            let data = match out.frame.serialize() {
                Ok(data) => data,
                Err(e) => {
                    warn!(
                        node = %node.node_id(),
                        to = %out.to,
                        error = %e,
                        "frame not encodable"
                    );
                    continue;
                }
            };
            let msg = OutboundBytes {
                from: node.node_id(),
                to: out.to,
                data,
            };
            match outbound.try_send(msg) {
                Ok(()) => {}
                Err(TrySendError::Full(msg)) => {
                    dropped += 1;
                    debug!(node = %msg.from, to = %msg.to, dropped, "outbound channel full");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(node = %node.node_id(), "outbound receiver gone");
                }
            }
        }

        let mut next = NodeView::of(&node);
        next.outbound_dropped = dropped;
        *view.write() = next;
    }

    debug!(node = %node.node_id(), "node service stopped");
    node
}
