//! Group registry, atomic attach, node-service gateway.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use groupcast_core::{AttachError, GroupId, Handshake, Packet, Payload, RetCode};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::group::Group;
use crate::metrics::{ATTACH_FAILURES_TOTAL, GROUPS_ACTIVE, SESSIONS_ACTIVE};
use crate::node::NodeService;
use crate::runner::{Runner, DEFAULT_QUEUE_CAPACITY};
use crate::session::{Mode, Session, SessionHandler};

/// Per-process registry mapping group id → [`Group`], plus the optional
/// cluster routing reference.
///
/// Engines are plain injected values — construct as many as you need
/// (one per process in production, one per test case in tests). All
/// internal state is synchronized; callers never lock anything.
pub struct Engine {
    id: String,
    groups: RwLock<HashMap<GroupId, Arc<Group>>>,
    node: RwLock<Option<Arc<dyn NodeService>>>,
    /// Gates the per-send debug logging only; no behavioral effect.
    verbose: AtomicBool,
    join_seq: AtomicU64,
    session_count: AtomicUsize,
    queue_capacity: usize,
}

impl Engine {
    /// Create an engine with the default per-connection queue capacity.
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Self::with_queue_capacity(id, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create an engine with an explicit per-connection queue capacity.
    pub fn with_queue_capacity(id: impl Into<String>, queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            groups: RwLock::new(HashMap::new()),
            node: RwLock::new(None),
            verbose: AtomicBool::new(false),
            join_seq: AtomicU64::new(0),
            session_count: AtomicUsize::new(0),
            queue_capacity,
        })
    }

    /// Engine identifier, used in logs only.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Enable or disable per-send debug logging.
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Whether per-send debug logging is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// Configure the cluster routing service. Without one, local
    /// single-session sends still work but all group-fanout operations
    /// fail with `NODE_SERVICE_NULL`.
    pub fn set_node_service(&self, node: Arc<dyn NodeService>) {
        *self.node.write() = Some(node);
    }

    /// The configured cluster routing service, if any.
    pub fn node_service(&self) -> Option<Arc<dyn NodeService>> {
        self.node.read().clone()
    }

    // ── Attach / detach ─────────────────────────────────────────────────

    /// Atomically attach a new connection.
    ///
    /// Both preconditions run before any engine state is touched:
    /// `on_open` must yield a session id and `create_groupid` a group id.
    /// On success the returned [`Session`] is fully populated and already
    /// a member of its group; the returned receiver is the outbound
    /// packet stream the embedding layer writes to the transport.
    ///
    /// On failure nothing joined anything — the handshake layer tears
    /// the connection down.
    pub fn attach(
        self: &Arc<Self>,
        handler: Arc<dyn SessionHandler>,
        handshake: &dyn Handshake,
        mode: Mode,
    ) -> Result<(Arc<Session>, mpsc::Receiver<Packet>), AttachError> {
        let Some(sessionid) = handler.on_open(handshake) else {
            counter!(ATTACH_FAILURES_TOTAL, "reason" => "session").increment(1);
            return Err(AttachError::InvalidSession);
        };
        let Some(groupid) = handler.create_groupid(handshake) else {
            counter!(ATTACH_FAILURES_TOTAL, "reason" => "group").increment(1);
            return Err(AttachError::InvalidGroup);
        };

        let (runner, rx) = Runner::channel(self.queue_capacity);

        let session = {
            let mut groups = self.groups.write();
            // Assigned under the registry lock so join_seq order always
            // matches group insertion order; most_recent's tie-break
            // depends on that.
            let join_seq = self.join_seq.fetch_add(1, Ordering::Relaxed) + 1;
            let group = match groups.get(&groupid) {
                Some(g) => Arc::clone(g),
                None => {
                    let g = Group::new(groupid.clone());
                    let _ = groups.insert(groupid.clone(), Arc::clone(&g));
                    g
                }
            };
            let session = Session::new(
                sessionid,
                groupid,
                handshake.remote_addr(),
                handshake.remote_addr_str(),
                join_seq,
                mode,
                handler,
                runner,
                Arc::downgrade(self),
                Arc::downgrade(&group),
            );
            // Eviction retires groups only under this same registry
            // write lock, so the entry fetched above cannot retire
            // before the add lands.
            let replaced = group.try_add(Arc::clone(&session));
            debug_assert!(replaced.is_some(), "group retired while registry lock held");
            if replaced == Some(false) {
                let count = self.session_count.fetch_add(1, Ordering::Relaxed) + 1;
                gauge!(SESSIONS_ACTIVE).set(count as f64);
            }
            gauge!(GROUPS_ACTIVE).set(groups.len() as f64);
            session
        };

        info!(engine = %self.id, session = %session, groupid = %session.groupid(), ?mode, "session attached");
        session.fire_connected();
        Ok((session, rx))
    }

    /// Remove a closed session from its group and evict the group if it
    /// became empty. The emptiness check and the registry removal happen
    /// under one registry write lock, so a concurrent join never lands
    /// in a removed group.
    pub(crate) fn detach(&self, session: &Session) {
        let mut groups = self.groups.write();
        let Some(group) = groups.get(session.groupid()).map(Arc::clone) else {
            return;
        };
        if group
            .remove_matching(session.sessionid(), session.join_seq())
            .is_some()
        {
            let count = self.session_count.fetch_sub(1, Ordering::Relaxed) - 1;
            gauge!(SESSIONS_ACTIVE).set(count as f64);
        }
        if group.retire_if_empty() {
            let _ = groups.remove(session.groupid());
            gauge!(GROUPS_ACTIVE).set(groups.len() as f64);
            debug!(engine = %self.id, groupid = %session.groupid(), "empty group evicted");
        }
    }

    // ── Registry reads ──────────────────────────────────────────────────

    /// The group for `groupid`, if it currently has members.
    pub fn group(&self, groupid: &GroupId) -> Option<Arc<Group>> {
        self.groups.read().get(groupid).map(Arc::clone)
    }

    /// All groups currently known to this engine.
    pub fn groups(&self) -> Vec<Arc<Group>> {
        self.groups.read().values().cloned().collect()
    }

    /// Number of non-empty groups.
    pub fn group_count(&self) -> usize {
        self.groups.read().len()
    }

    /// Number of attached sessions.
    pub fn session_count(&self) -> usize {
        self.session_count.load(Ordering::Relaxed)
    }

    // ── Group fan-out ───────────────────────────────────────────────────

    /// Cluster-wide group delivery through the node service.
    ///
    /// Fails with `NODE_SERVICE_NULL` when no node service is configured
    /// — deliberately even when every intended recipient is a local
    /// member, since group fan-out is defined as a cluster-wide
    /// operation. Node-service failures come back verbatim.
    pub fn send_group(
        &self,
        groupid: &GroupId,
        recent: bool,
        payload: &Payload,
        last: bool,
    ) -> RetCode {
        let Some(node) = self.node_service() else {
            return RetCode::NODE_SERVICE_NULL;
        };
        let rs = node.send_message(groupid, recent, payload, last);
        if self.is_verbose() {
            debug!(engine = %self.id, groupid = %groupid, recent, payload = %payload.summary(), result = %rs, "group send");
        }
        rs
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("groups", &self.group_count())
            .field("sessions", &self.session_count())
            .finish()
    }
}
