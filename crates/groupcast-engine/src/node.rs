//! Cluster directory/transport contract.
//!
//! The engine consumes this abstraction for every group-fanout operation;
//! it never implements cluster routing itself. Any implementation — the
//! single-process router in `groupcast-cluster`, a gossip-backed
//! directory, a broker-backed one — is substitutable as long as it honors
//! the contract below.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use groupcast_core::{GroupId, Payload, RetCode};

/// Network identity of one node in the cluster.
pub type NodeAddr = SocketAddr;

/// Cluster-wide group delivery and presence directory.
///
/// Implementations must be callable from arbitrary threads and must
/// report failures through [`RetCode`], never by panicking or blocking
/// indefinitely. Remote delivery failures are returned verbatim to the
/// caller.
pub trait NodeService: Send + Sync {
    /// Deliver `payload` to every session of `groupid` across every node
    /// in the cluster, including the local one. With `recent` set, only
    /// the single most-recently-attached session of the group receives
    /// it.
    fn send_message(&self, groupid: &GroupId, recent: bool, payload: &Payload, last: bool)
        -> RetCode;

    /// Nodes currently hosting at least one session of the group.
    fn online_nodes(&self, groupid: &GroupId) -> HashSet<NodeAddr>;

    /// Per-node listing of the group's connected members.
    fn online_remote_addrs(&self, groupid: &GroupId) -> HashMap<NodeAddr, Vec<String>>;
}
