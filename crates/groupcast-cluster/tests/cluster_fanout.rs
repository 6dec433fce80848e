#![allow(missing_docs)]

//! End-to-end group fan-out through a local node service.

use std::net::SocketAddr;
use std::sync::Arc;

use groupcast_cluster::LocalNode;
use groupcast_core::{GroupId, Handshake, Packet, RetCode, StaticHandshake};
use groupcast_engine::{Engine, Mode, Session, SessionHandler};
use tokio::sync::mpsc;

struct GroupByUser;

impl SessionHandler for GroupByUser {
    fn create_groupid(&self, handshake: &dyn Handshake) -> Option<GroupId> {
        // One group per user identity; several devices of the same user
        // share a group.
        let sid = handshake.session_id()?;
        let user = sid.as_str().split('/').next()?;
        Some(GroupId::new(user))
    }
}

fn peer(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn node_addr() -> SocketAddr {
    "10.1.1.1:7070".parse().unwrap()
}

fn attach(
    engine: &Arc<Engine>,
    sid: &str,
    port: u16,
) -> (Arc<Session>, mpsc::Receiver<Packet>) {
    engine
        .attach(
            Arc::new(GroupByUser),
            &StaticHandshake::new(sid, peer(port)),
            Mode::Structured,
        )
        .expect("attach")
}

#[tokio::test]
async fn send_each_reaches_every_member_exactly_once() {
    let engine = Engine::new("node-a");
    let _node = LocalNode::install(&engine, node_addr());

    let (a, mut rxa) = attach(&engine, "g1/phone", 9001);
    let (_b, mut rxb) = attach(&engine, "g1/laptop", 9002);

    let rs = a.send_each_message(&GroupId::new("g1"), "hi");
    assert_eq!(rs, RetCode::OK);

    assert_eq!(rxa.recv().await.unwrap(), Packet::text("hi"));
    assert!(rxa.try_recv().is_err());
    assert_eq!(rxb.recv().await.unwrap(), Packet::text("hi"));
    assert!(rxb.try_recv().is_err());
}

#[tokio::test]
async fn send_each_to_unknown_group_is_group_empty() {
    let engine = Engine::new("node-a");
    let _node = LocalNode::install(&engine, node_addr());
    let (a, _rxa) = attach(&engine, "g1/phone", 9001);

    assert_eq!(
        a.send_each_message(&GroupId::new("g2"), "hi"),
        RetCode::GROUP_EMPTY
    );
}

#[tokio::test]
async fn fanout_without_node_service_fails_even_with_local_members() {
    let engine = Engine::new("node-a");
    let (a, _rxa) = attach(&engine, "g1/phone", 9001);
    let (_b, _rxb) = attach(&engine, "g1/laptop", 9002);

    assert_eq!(
        a.send_each_message(&GroupId::new("g1"), "hi"),
        RetCode::NODE_SERVICE_NULL
    );
}

#[tokio::test]
async fn recent_delivery_targets_latest_device_only() {
    let engine = Engine::new("node-a");
    let _node = LocalNode::install(&engine, node_addr());

    let (a, mut rxa) = attach(&engine, "g1/phone", 9001);
    let (_b, mut rxb) = attach(&engine, "g1/laptop", 9002);

    let rs = a.send_recent_message(&GroupId::new("g1"), "latest wins");
    assert_eq!(rs, RetCode::OK);

    // Only the most recently attached device hears it.
    assert_eq!(rxb.recv().await.unwrap(), Packet::text("latest wins"));
    assert!(rxa.try_recv().is_err());
}

#[tokio::test]
async fn recent_delivery_to_gone_writer_is_target_offline() {
    let engine = Engine::new("node-a");
    let _node = LocalNode::install(&engine, node_addr());

    let (a, _rxa) = attach(&engine, "g1/phone", 9001);
    let (_b, rxb) = attach(&engine, "g1/laptop", 9002);
    drop(rxb); // the latest device's transport writer is gone

    assert_eq!(
        a.send_recent_message(&GroupId::new("g1"), "anyone there"),
        RetCode::TARGET_OFFLINE
    );
}

#[tokio::test]
async fn binary_fanout_and_fragments() {
    let engine = Engine::new("node-a");
    let _node = LocalNode::install(&engine, node_addr());

    let (a, mut rxa) = attach(&engine, "g1/phone", 9001);

    assert_eq!(
        a.send_each_message(&GroupId::new("g1"), vec![1u8, 2, 3]),
        RetCode::OK
    );
    assert_eq!(
        a.send_each_fragment(&GroupId::new("g1"), "part one, ", false),
        RetCode::OK
    );

    assert_eq!(rxa.recv().await.unwrap(), Packet::binary(vec![1u8, 2, 3]));
    assert_eq!(
        rxa.recv().await.unwrap(),
        Packet::text_fragment("part one, ", false)
    );
}

#[tokio::test]
async fn failed_attach_never_touches_the_registry() {
    let engine = Engine::new("node-a");
    let _node = LocalNode::install(&engine, node_addr());

    // No session identity: attach aborts before any group state exists.
    let err = engine
        .attach(
            Arc::new(GroupByUser),
            &StaticHandshake::anonymous(peer(9001)),
            Mode::Structured,
        )
        .unwrap_err();
    assert_eq!(err, groupcast_core::AttachError::InvalidSession);

    let (a, _rxa) = attach(&engine, "g1/phone", 9001);
    assert_eq!(
        a.send_each_message(&GroupId::new("g9"), "hi"),
        RetCode::GROUP_EMPTY
    );
    assert_eq!(engine.group_count(), 1);
}

#[tokio::test]
async fn presence_reflects_local_membership() {
    let engine = Engine::new("node-a");
    let _node = LocalNode::install(&engine, node_addr());

    let (a, _rxa) = attach(&engine, "g1/phone", 9001);
    let (b, _rxb) = attach(&engine, "g1/laptop", 9002);

    let nodes = a.online_nodes(&GroupId::new("g1"));
    assert_eq!(nodes.len(), 1);
    assert!(nodes.contains(&node_addr()));

    let listing = a.online_remote_addrs(&GroupId::new("g1"));
    let members = listing.get(&node_addr()).expect("this node listed");
    assert_eq!(members.len(), 2);
    assert!(members.contains(&"127.0.0.1:9001".to_owned()));
    assert!(members.contains(&"127.0.0.1:9002".to_owned()));

    a.close();
    b.close();
    assert!(b.online_nodes(&GroupId::new("g1")).is_empty());
    assert!(b.online_remote_addrs(&GroupId::new("g1")).is_empty());
}

#[tokio::test]
async fn departed_members_miss_later_broadcasts() {
    let engine = Engine::new("node-a");
    let _node = LocalNode::install(&engine, node_addr());

    let (a, mut rxa) = attach(&engine, "g1/phone", 9001);
    let (b, mut rxb) = attach(&engine, "g1/laptop", 9002);

    assert_eq!(a.send_each_message(&GroupId::new("g1"), "one"), RetCode::OK);
    b.close();
    assert_eq!(a.send_each_message(&GroupId::new("g1"), "two"), RetCode::OK);

    assert_eq!(rxa.recv().await.unwrap(), Packet::text("one"));
    assert_eq!(rxa.recv().await.unwrap(), Packet::text("two"));

    // b saw the first broadcast, then its close frame, nothing after.
    assert_eq!(rxb.recv().await.unwrap(), Packet::text("one"));
    assert_eq!(rxb.recv().await.unwrap(), Packet::close_normal());
    assert!(rxb.try_recv().is_err());
}
