//! Group membership and fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use groupcast_core::{GroupId, Packet, RetCode, SessionId};
use metrics::counter;
use parking_lot::Mutex;
use tracing::debug;

use crate::metrics::BROADCASTS_TOTAL;
use crate::session::Session;

struct Members {
    map: HashMap<SessionId, Arc<Session>>,
    /// Set once, under the engine's registry lock, when the group is
    /// evicted for being empty. A join observing it retries against a
    /// fresh registry entry instead of adding to a detached group.
    retired: bool,
}

/// Set of sessions sharing one group id.
///
/// Membership mutation is crate-internal (the engine owns the
/// join/leave/evict discipline); reads and broadcast are public.
pub struct Group {
    id: GroupId,
    inner: Mutex<Members>,
}

impl Group {
    pub(crate) fn new(id: GroupId) -> Arc<Self> {
        Arc::new(Self {
            id,
            inner: Mutex::new(Members {
                map: HashMap::new(),
                retired: false,
            }),
        })
    }

    /// The group's id. Every member session carries this as its groupid.
    pub fn id(&self) -> &GroupId {
        &self.id
    }

    /// Add a member. `None` when the group has been retired (the caller
    /// must retry against a fresh registry entry); otherwise whether an
    /// existing member under the same session id was displaced
    /// (membership is last-write-wins on reconnect).
    pub(crate) fn try_add(&self, session: Arc<Session>) -> Option<bool> {
        let mut inner = self.inner.lock();
        if inner.retired {
            return None;
        }
        Some(
            inner
                .map
                .insert(session.sessionid().clone(), session)
                .is_some(),
        )
    }

    /// Remove a member, but only the exact attach generation that asked.
    /// A reconnect that overwrote the membership entry under the same
    /// session id must not be knocked out by the stale session's close.
    pub(crate) fn remove_matching(
        &self,
        sessionid: &SessionId,
        join_seq: u64,
    ) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock();
        if inner
            .map
            .get(sessionid)
            .is_some_and(|s| s.join_seq() == join_seq)
        {
            inner.map.remove(sessionid)
        } else {
            None
        }
    }

    /// Retire the group iff it is empty. Only called while holding the
    /// engine's registry write lock, which is what makes the
    /// check-then-evict atomic with respect to concurrent joins.
    pub(crate) fn retire_if_empty(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.map.is_empty() {
            inner.retired = true;
            true
        } else {
            false
        }
    }

    /// Whether the session id is currently a member.
    pub fn contains(&self, sessionid: &SessionId) -> bool {
        self.inner.lock().map.contains_key(sessionid)
    }

    /// Current member count.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// True when the group has no members.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    /// Point-in-time copy of the membership. Changes after the call
    /// affect only later snapshots.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.inner.lock().map.values().cloned().collect()
    }

    /// The most-recently-attached member: greatest createtime, ties
    /// broken in favor of the later-joined session.
    pub fn most_recent(&self) -> Option<Arc<Session>> {
        self.inner
            .lock()
            .map
            .values()
            .max_by_key(|s| (s.createtime(), s.join_seq()))
            .cloned()
    }

    /// Forward one packet to every current member's runner, OR-ing the
    /// per-member retcodes. Members present at call start receive the
    /// packet at most once; joins and leaves during the call only affect
    /// later broadcasts.
    pub fn broadcast(&self, packet: &Packet) -> RetCode {
        let members = self.snapshot();
        if members.is_empty() {
            return RetCode::GROUP_EMPTY;
        }
        counter!(BROADCASTS_TOTAL).increment(1);
        let mut rs = RetCode::OK;
        for member in &members {
            rs |= member.send(packet.clone());
        }
        debug!(groupid = %self.id, recipients = members.len(), result = %rs, "group broadcast");
        rs
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}
