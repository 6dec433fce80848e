//! Single-process node service.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use groupcast_core::{GroupId, Payload, RetCode};
use groupcast_engine::{Engine, NodeAddr, NodeService};
use tracing::debug;

/// Node service for a cluster of one.
///
/// Routes every group fan-out straight into one local [`Engine`] and
/// answers presence queries from its registry. Holds the engine weakly
/// so an engine torn down in tests (or during shutdown) reads as
/// `ENGINE_NULL` instead of keeping the registry alive.
pub struct LocalNode {
    engine: Weak<Engine>,
    addr: NodeAddr,
}

impl LocalNode {
    /// Create a node service over `engine`, advertising `addr` as this
    /// node's address in presence listings.
    pub fn new(engine: &Arc<Engine>, addr: NodeAddr) -> Arc<Self> {
        Arc::new(Self {
            engine: Arc::downgrade(engine),
            addr,
        })
    }

    /// Create the node service and register it on the engine in one step.
    pub fn install(engine: &Arc<Engine>, addr: NodeAddr) -> Arc<Self> {
        let node = Self::new(engine, addr);
        engine.set_node_service(Arc::clone(&node) as Arc<dyn NodeService>);
        node
    }

    /// The address this node advertises.
    pub fn addr(&self) -> NodeAddr {
        self.addr
    }
}

impl NodeService for LocalNode {
    fn send_message(
        &self,
        groupid: &GroupId,
        recent: bool,
        payload: &Payload,
        last: bool,
    ) -> RetCode {
        let Some(engine) = self.engine.upgrade() else {
            return RetCode::ENGINE_NULL;
        };
        let Some(group) = engine.group(groupid) else {
            debug!(groupid = %groupid, "fan-out to unknown group");
            return RetCode::GROUP_EMPTY;
        };
        if recent {
            let Some(target) = group.most_recent() else {
                return RetCode::GROUP_EMPTY;
            };
            if target.is_closed() {
                return RetCode::TARGET_OFFLINE;
            }
            let rs = target.send(payload.to_packet(last));
            // A runner whose writer is gone means the target is known
            // but no longer connected.
            if rs.contains(RetCode::SESSION_CLOSED) {
                RetCode::TARGET_OFFLINE
            } else {
                rs
            }
        } else {
            group.broadcast(&payload.to_packet(last))
        }
    }

    fn online_nodes(&self, groupid: &GroupId) -> HashSet<NodeAddr> {
        let mut nodes = HashSet::new();
        if let Some(engine) = self.engine.upgrade() {
            if engine.group(groupid).is_some_and(|g| !g.is_empty()) {
                let _ = nodes.insert(self.addr);
            }
        }
        nodes
    }

    fn online_remote_addrs(&self, groupid: &GroupId) -> HashMap<NodeAddr, Vec<String>> {
        let mut listing = HashMap::new();
        if let Some(engine) = self.engine.upgrade() {
            if let Some(group) = engine.group(groupid) {
                let members: Vec<String> = group
                    .snapshot()
                    .iter()
                    .map(|s| s.remote_addr_str().to_owned())
                    .collect();
                if !members.is_empty() {
                    let _ = listing.insert(self.addr, members);
                }
            }
        }
        listing
    }
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNode").field("addr", &self.addr).finish()
    }
}
