//! One connection: lifecycle, send surface, handler callbacks.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use groupcast_core::packet::CLOSE_NORMAL;
use groupcast_core::{
    AttributeStore, GroupId, Handshake, Packet, Payload, RetCode, SessionId,
};
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::group::Group;
use crate::node::{NodeAddr, NodeService};
use crate::runner::Runner;

/// Operating mode of a session, chosen once at attach and fixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Decoded frames are dispatched to the structured handler callbacks.
    Structured,
    /// `on_read` is invoked once and takes exclusive ownership of the
    /// transport; structured callbacks never fire afterwards.
    Raw,
}

/// Externally observable lifecycle state.
///
/// A `Session` only exists once attach has fully succeeded, so the
/// pre-attach states have no representation here: construction *is* the
/// `NEW → ATTACHED → ACTIVE` transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Attached and serving its chosen mode.
    Active,
    /// `close` has begun; sends fail fast.
    Closing,
    /// Terminal. The session never rejoins a group.
    Closed,
}

const STATE_ACTIVE: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Opaque transport channel handed to `on_read` in raw mode. The core
/// never touches it after ownership transfers; the handler downcasts to
/// the concrete transport type it was configured with.
pub struct RawChannel(Box<dyn Any + Send>);

impl RawChannel {
    /// Wrap a concrete transport channel.
    pub fn new<T: Any + Send>(channel: T) -> Self {
        Self(Box::new(channel))
    }

    /// Recover the concrete channel type.
    pub fn downcast<T: Any + Send>(self) -> Result<Box<T>, RawChannel> {
        self.0.downcast::<T>().map_err(RawChannel)
    }
}

impl fmt::Debug for RawChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawChannel")
    }
}

/// Capability-set callbacks for a session.
///
/// Every method except [`SessionHandler::create_groupid`] has a default
/// no-op (or pass-through) implementation; concrete session types
/// implement only what they need. Callbacks are invoked by the external
/// dispatch layer as decoded frames arrive; errors escaping a callback
/// are that layer's responsibility.
pub trait SessionHandler: Send + Sync {
    /// Derive the group identity for this connection, commonly a user
    /// id. `None` aborts the attach as an invalid connection.
    fn create_groupid(&self, handshake: &dyn Handshake) -> Option<GroupId>;

    /// Resolve the session identity from the handshake. `None` aborts
    /// the attach. Defaults to the handshake's own session id.
    fn on_open(&self, handshake: &dyn Handshake) -> Option<SessionId> {
        handshake.session_id()
    }

    /// Attach completed (structured mode only), about to receive frames.
    fn on_connected(&self, _session: &Session) {}

    /// Complete text message arrived.
    fn on_message_text(&self, _session: &Session, _text: &str) {}

    /// Complete binary message arrived.
    fn on_message_binary(&self, _session: &Session, _data: &[u8]) {}

    /// Text fragment arrived.
    fn on_fragment_text(&self, _session: &Session, _text: &str, _last: bool) {}

    /// Binary fragment arrived.
    fn on_fragment_binary(&self, _session: &Session, _data: &[u8], _last: bool) {}

    /// Ping received.
    fn on_ping(&self, _session: &Session, _data: &[u8]) {}

    /// Pong received.
    fn on_pong(&self, _session: &Session, _data: &[u8]) {}

    /// Session closed, locally or by the peer.
    fn on_close(&self, _session: &Session, _code: u16, _reason: &str) {}

    /// Raw mode only: take exclusive ownership of the transport. Invoked
    /// exactly once, after attach.
    fn on_read(&self, _session: &Session, _channel: RawChannel) {}
}

/// One logical connection and its identity, group membership, and
/// outbound write authority.
///
/// Sessions are constructed only by [`Engine::attach`], fully populated:
/// `sessionid` and `groupid` are immutable and always present, and the
/// session belongs to exactly one group for its entire lifetime.
pub struct Session {
    sessionid: SessionId,
    groupid: GroupId,
    remote_addr: SocketAddr,
    remote_addr_str: String,
    /// Wall-clock millis at attach.
    createtime: i64,
    /// Engine-wide monotonic attach counter; tie-break for most-recent
    /// selection.
    join_seq: u64,
    mode: Mode,
    state: AtomicU8,
    raw_taken: AtomicBool,
    attributes: AttributeStore,
    handler: Arc<dyn SessionHandler>,
    runner: Arc<Runner>,
    engine: Weak<Engine>,
    group: Weak<Group>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        sessionid: SessionId,
        groupid: GroupId,
        remote_addr: SocketAddr,
        remote_addr_str: String,
        join_seq: u64,
        mode: Mode,
        handler: Arc<dyn SessionHandler>,
        runner: Arc<Runner>,
        engine: Weak<Engine>,
        group: Weak<Group>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessionid,
            groupid,
            remote_addr,
            remote_addr_str,
            createtime: chrono::Utc::now().timestamp_millis(),
            join_seq,
            mode,
            state: AtomicU8::new(STATE_ACTIVE),
            raw_taken: AtomicBool::new(false),
            attributes: AttributeStore::new(),
            handler,
            runner,
            engine,
            group,
        })
    }

    // ── Identity ────────────────────────────────────────────────────────

    /// Session identity, immutable after attach.
    pub fn sessionid(&self) -> &SessionId {
        &self.sessionid
    }

    /// Group identity, immutable after attach.
    pub fn groupid(&self) -> &GroupId {
        &self.groupid
    }

    /// Peer socket address (the proxy's address behind a proxy).
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Best-known client address string.
    pub fn remote_addr_str(&self) -> &str {
        &self.remote_addr_str
    }

    /// Wall-clock millis at attach.
    pub fn createtime(&self) -> i64 {
        self.createtime
    }

    /// Monotonic attach counter within the engine.
    pub fn join_seq(&self) -> u64 {
        self.join_seq
    }

    /// Operating mode, fixed at attach.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::Acquire) {
            STATE_ACTIVE => SessionState::Active,
            STATE_CLOSING => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    /// True once close has begun.
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) != STATE_ACTIVE
    }

    /// The owning group, while both are alive.
    pub fn group(&self) -> Option<Arc<Group>> {
        self.group.upgrade()
    }

    /// The owning engine, while both are alive.
    pub fn engine(&self) -> Option<Arc<Engine>> {
        self.engine.upgrade()
    }

    pub(crate) fn runner(&self) -> &Arc<Runner> {
        &self.runner
    }

    // ── Attributes ──────────────────────────────────────────────────────

    /// The session's attribute scratch space.
    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    /// Read an attribute. See [`AttributeStore::get`].
    pub fn get_attribute<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.attributes.get(name)
    }

    /// Set an attribute. See [`AttributeStore::set`].
    pub fn set_attribute<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) {
        self.attributes.set(name, value);
    }

    /// Remove an attribute.
    pub fn remove_attribute(&self, name: &str) {
        let _ = self.attributes.remove(name);
    }

    // ── Single-session sends ────────────────────────────────────────────

    /// Hand one fully-formed packet to the runner. Returns a
    /// [`RetCode`]; never panics and never blocks.
    ///
    /// Fails fast with `SESSION_CLOSED` once close has begun, without
    /// touching the transport, and with `ILLEGAL_PACKET` in raw mode
    /// (the transport belongs to `on_read` there) or for a malformed
    /// control frame.
    pub fn send(&self, packet: Packet) -> RetCode {
        if self.is_closed() {
            return RetCode::SESSION_CLOSED;
        }
        if self.mode == Mode::Raw {
            return RetCode::ILLEGAL_PACKET;
        }
        if !packet.is_valid() {
            return RetCode::ILLEGAL_PACKET;
        }
        let summary = self.verbose().then(|| packet.summary());
        let rs = self.runner.send(packet);
        if let Some(summary) = summary {
            debug!(groupid = %self.groupid, session = %self, packet = %summary, result = %rs, "send");
        }
        rs
    }

    /// Send a single text message.
    pub fn send_text(&self, text: impl Into<Arc<str>>) -> RetCode {
        self.send(Packet::text(text))
    }

    /// Send a text fragment.
    pub fn send_text_fragment(&self, text: impl Into<Arc<str>>, last: bool) -> RetCode {
        self.send(Packet::text_fragment(text, last))
    }

    /// Send a single binary message.
    pub fn send_binary(&self, data: impl Into<Arc<[u8]>>) -> RetCode {
        self.send(Packet::binary(data))
    }

    /// Send a binary fragment.
    pub fn send_binary_fragment(&self, data: impl Into<Arc<[u8]>>, last: bool) -> RetCode {
        self.send(Packet::binary_fragment(data, last))
    }

    /// Send an empty keepalive ping.
    pub fn send_ping(&self) -> RetCode {
        self.send(Packet::ping())
    }

    /// Send a ping carrying application data.
    pub fn send_ping_with(&self, data: impl Into<Arc<[u8]>>) -> RetCode {
        self.send(Packet::ping_with(data))
    }

    /// Send a pong.
    pub fn send_pong(&self, data: impl Into<Arc<[u8]>>) -> RetCode {
        self.send(Packet::pong(data))
    }

    // ── Group fan-out (cluster-wide, via the node service) ─────────────

    /// Deliver to every session of `groupid` across the whole cluster.
    ///
    /// Requires a configured node service even when all intended
    /// recipients are local; fails with `NODE_SERVICE_NULL` otherwise.
    pub fn send_each_message(&self, groupid: &GroupId, payload: impl Into<Payload>) -> RetCode {
        self.send_group(groupid, false, &payload.into(), true)
    }

    /// Fragment variant of [`Session::send_each_message`].
    pub fn send_each_fragment(
        &self,
        groupid: &GroupId,
        payload: impl Into<Payload>,
        last: bool,
    ) -> RetCode {
        self.send_group(groupid, false, &payload.into(), last)
    }

    /// Deliver only to the most-recently-attached session of `groupid`
    /// ("latest device wins"). Same node-service requirement as
    /// [`Session::send_each_message`].
    pub fn send_recent_message(&self, groupid: &GroupId, payload: impl Into<Payload>) -> RetCode {
        self.send_group(groupid, true, &payload.into(), true)
    }

    /// Fragment variant of [`Session::send_recent_message`].
    pub fn send_recent_fragment(
        &self,
        groupid: &GroupId,
        payload: impl Into<Payload>,
        last: bool,
    ) -> RetCode {
        self.send_group(groupid, true, &payload.into(), last)
    }

    fn send_group(&self, groupid: &GroupId, recent: bool, payload: &Payload, last: bool) -> RetCode {
        let Some(engine) = self.engine.upgrade() else {
            return RetCode::ENGINE_NULL;
        };
        engine.send_group(groupid, recent, payload, last)
    }

    // ── Presence queries ────────────────────────────────────────────────

    /// Nodes currently hosting at least one session of the group. Empty
    /// when no node service is configured.
    pub fn online_nodes(&self, groupid: &GroupId) -> HashSet<NodeAddr> {
        match self.node_service() {
            Some(node) => node.online_nodes(groupid),
            None => HashSet::new(),
        }
    }

    /// Per-node member listing for the group. Empty when no node service
    /// is configured.
    pub fn online_remote_addrs(&self, groupid: &GroupId) -> HashMap<NodeAddr, Vec<String>> {
        match self.node_service() {
            Some(node) => node.online_remote_addrs(groupid),
            None => HashMap::new(),
        }
    }

    fn node_service(&self) -> Option<Arc<dyn NodeService>> {
        self.engine.upgrade()?.node_service()
    }

    fn verbose(&self) -> bool {
        self.engine.upgrade().is_some_and(|e| e.is_verbose())
    }

    // ── Inbound dispatch (called by the external dispatch layer) ───────

    /// Complete text message from the wire.
    pub fn dispatch_text(&self, text: &str) {
        if self.structured_dispatch_allowed("text") {
            self.handler.on_message_text(self, text);
        }
    }

    /// Complete binary message from the wire.
    pub fn dispatch_binary(&self, data: &[u8]) {
        if self.structured_dispatch_allowed("binary") {
            self.handler.on_message_binary(self, data);
        }
    }

    /// Text fragment from the wire.
    pub fn dispatch_fragment_text(&self, text: &str, last: bool) {
        if self.structured_dispatch_allowed("fragment") {
            self.handler.on_fragment_text(self, text, last);
        }
    }

    /// Binary fragment from the wire.
    pub fn dispatch_fragment_binary(&self, data: &[u8], last: bool) {
        if self.structured_dispatch_allowed("fragment") {
            self.handler.on_fragment_binary(self, data, last);
        }
    }

    /// Ping from the wire.
    pub fn dispatch_ping(&self, data: &[u8]) {
        if self.structured_dispatch_allowed("ping") {
            self.handler.on_ping(self, data);
        }
    }

    /// Pong from the wire.
    pub fn dispatch_pong(&self, data: &[u8]) {
        if self.structured_dispatch_allowed("pong") {
            self.handler.on_pong(self, data);
        }
    }

    /// Transport termination or close frame from the wire.
    pub fn dispatch_close(&self, code: u16, reason: &str) {
        self.close_with(code, reason);
    }

    fn structured_dispatch_allowed(&self, kind: &str) -> bool {
        if self.mode == Mode::Raw {
            warn!(session = %self, kind, "structured frame dispatched to raw-mode session, dropped");
            return false;
        }
        if self.is_closed() {
            debug!(session = %self, kind, "frame for closed session, dropped");
            return false;
        }
        true
    }

    /// Raw mode: hand the transport to `on_read`. Effective exactly once;
    /// returns false on repeat calls or for structured-mode sessions.
    pub fn start_raw(&self, channel: RawChannel) -> bool {
        if self.mode != Mode::Raw {
            warn!(session = %self, "start_raw on structured-mode session");
            return false;
        }
        if self.raw_taken.swap(true, Ordering::AcqRel) {
            warn!(session = %self, "on_read already invoked");
            return false;
        }
        self.handler.on_read(self, channel);
        true
    }

    pub(crate) fn fire_connected(&self) {
        if self.mode == Mode::Structured {
            self.handler.on_connected(self);
        }
    }

    // ── Close ───────────────────────────────────────────────────────────

    /// Close the session. Idempotent and safe to call concurrently with
    /// in-flight sends: once close begins, new sends fail with
    /// `SESSION_CLOSED`; packets accepted earlier follow the runner's
    /// documented flush policy.
    pub fn close(&self) {
        self.close_with(CLOSE_NORMAL, "");
    }

    /// Close with an explicit code and reason.
    pub fn close_with(&self, code: u16, reason: &str) {
        if self
            .state
            .compare_exchange(STATE_ACTIVE, STATE_CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let _ = self.runner.close();
        if let Some(engine) = self.engine.upgrade() {
            engine.detach(self);
        }
        self.state.store(STATE_CLOSED, Ordering::Release);
        debug!(session = %self, code, reason, "session closed");
        if self.mode == Mode::Structured {
            self.handler.on_close(self, code, reason);
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws{}@{}", self.join_seq, self.remote_addr_str)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("sessionid", &self.sessionid)
            .field("groupid", &self.groupid)
            .field("state", &self.state())
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groupcast_core::StaticHandshake;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use crate::engine::Engine;

    /// Records every structured callback it receives.
    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl Recording {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl SessionHandler for Recording {
        fn create_groupid(&self, handshake: &dyn Handshake) -> Option<GroupId> {
            // Group by user: here, derived from the session identity.
            handshake.session_id().map(|s| GroupId::new(s.as_str()))
        }

        fn on_connected(&self, _session: &Session) {
            self.events.lock().push("connected".into());
        }

        fn on_message_text(&self, _session: &Session, text: &str) {
            self.events.lock().push(format!("text:{text}"));
        }

        fn on_message_binary(&self, _session: &Session, data: &[u8]) {
            self.events.lock().push(format!("binary:{}", data.len()));
        }

        fn on_fragment_text(&self, _session: &Session, text: &str, last: bool) {
            self.events.lock().push(format!("frag:{text}:{last}"));
        }

        fn on_ping(&self, session: &Session, data: &[u8]) {
            self.events.lock().push("ping".into());
            let _ = session.send_pong(data.to_vec());
        }

        fn on_pong(&self, _session: &Session, _data: &[u8]) {
            self.events.lock().push("pong".into());
        }

        fn on_close(&self, _session: &Session, code: u16, reason: &str) {
            self.events.lock().push(format!("close:{code}:{reason}"));
        }
    }

    /// Raw-mode handler capturing the channel it was handed.
    #[derive(Default)]
    struct RawGrabber {
        seen: Mutex<Option<String>>,
    }

    impl SessionHandler for RawGrabber {
        fn create_groupid(&self, _handshake: &dyn Handshake) -> Option<GroupId> {
            Some(GroupId::new("raw"))
        }

        fn on_read(&self, _session: &Session, channel: RawChannel) {
            let label = channel.downcast::<String>().expect("string channel");
            *self.seen.lock() = Some(*label);
        }
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn attach_recording(
        mode: Mode,
    ) -> (Arc<Recording>, Arc<Session>, mpsc::Receiver<Packet>) {
        let engine = Engine::new("e1");
        let handler = Arc::new(Recording::default());
        let (session, rx) = engine
            .attach(
                Arc::clone(&handler) as Arc<dyn SessionHandler>,
                &StaticHandshake::new("u1", addr()),
                mode,
            )
            .expect("attach");
        // Tests drop the engine here; the session holds only a weak ref,
        // which is fine for single-session send paths.
        (handler, session, rx)
    }

    #[tokio::test]
    async fn dispatch_routes_to_handler() {
        let (handler, session, mut rx) = attach_recording(Mode::Structured);
        session.dispatch_text("hello");
        session.dispatch_binary(&[1, 2, 3]);
        session.dispatch_fragment_text("part", false);
        session.dispatch_ping(b"k");
        session.dispatch_pong(b"k");

        assert_eq!(
            handler.events(),
            vec!["connected", "text:hello", "binary:3", "frag:part:false", "ping", "pong"]
        );
        // The ping handler answered with a pong through the runner.
        assert_eq!(rx.recv().await.unwrap(), Packet::pong(b"k".to_vec()));
    }

    #[tokio::test]
    async fn dispatch_close_notifies_once_and_finalizes() {
        let (handler, session, _rx) = attach_recording(Mode::Structured);
        session.dispatch_close(1006, "abnormal");
        session.dispatch_close(1000, "");
        session.dispatch_text("after close");

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(handler.events(), vec!["connected", "close:1006:abnormal"]);
    }

    #[tokio::test]
    async fn oversized_control_frame_is_illegal_and_never_queued() {
        let (_handler, session, mut rx) = attach_recording(Mode::Structured);
        let big = vec![0u8; 200];
        assert_eq!(session.send_ping_with(big), RetCode::ILLEGAL_PACKET);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn raw_mode_owns_the_transport() {
        let engine = Engine::new("e1");
        let handler = Arc::new(RawGrabber::default());
        let (session, mut rx) = engine
            .attach(
                Arc::clone(&handler) as Arc<dyn SessionHandler>,
                &StaticHandshake::new("u1", addr()),
                Mode::Raw,
            )
            .unwrap();

        assert!(session.start_raw(RawChannel::new(String::from("chan-1"))));
        assert_eq!(handler.seen.lock().as_deref(), Some("chan-1"));

        // on_read fires exactly once.
        assert!(!session.start_raw(RawChannel::new(String::from("chan-2"))));
        assert_eq!(handler.seen.lock().as_deref(), Some("chan-1"));

        // Structured sends would interleave with the owned transport.
        assert_eq!(session.send_text("nope"), RetCode::ILLEGAL_PACKET);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn raw_mode_drops_structured_dispatch() {
        let engine = Engine::new("e1");
        let handler = Arc::new(Recording::default());
        let (session, _rx) = engine
            .attach(
                Arc::clone(&handler) as Arc<dyn SessionHandler>,
                &StaticHandshake::new("u1", addr()),
                Mode::Raw,
            )
            .unwrap();

        session.dispatch_text("x");
        session.dispatch_ping(b"");
        // No on_connected either: that is a structured-mode callback.
        assert!(handler.events().is_empty());
    }

    #[tokio::test]
    async fn structured_session_refuses_start_raw() {
        let (_handler, session, _rx) = attach_recording(Mode::Structured);
        assert!(!session.start_raw(RawChannel::new(0u8)));
    }

    #[tokio::test]
    async fn attribute_passthrough() {
        let (_handler, session, _rx) = attach_recording(Mode::Structured);
        session.set_attribute("device", String::from("phone"));
        assert_eq!(
            session.get_attribute::<String>("device").as_deref().map(String::as_str),
            Some("phone")
        );
        session.remove_attribute("device");
        assert!(session.get_attribute::<String>("device").is_none());
        assert!(session.attributes().is_empty());
    }

    #[tokio::test]
    async fn display_names_join_seq_and_peer() {
        let (_handler, session, _rx) = attach_recording(Mode::Structured);
        assert_eq!(session.to_string(), "ws1@127.0.0.1:8080");
    }

    #[tokio::test]
    async fn fanout_after_engine_dropped_reports_engine_null() {
        let (_handler, session, _rx) = attach_recording(Mode::Structured);
        // attach_recording dropped the engine on return.
        assert_eq!(
            session.send_each_message(&GroupId::new("g"), "hi"),
            RetCode::ENGINE_NULL
        );
    }

    #[test]
    fn raw_channel_downcast_round_trip() {
        let chan = RawChannel::new(42u32);
        let back = chan.downcast::<u32>().unwrap();
        assert_eq!(*back, 42);

        let chan = RawChannel::new(42u32);
        let wrong = chan.downcast::<String>();
        assert!(wrong.is_err());
    }
}
