//! Handshake identity boundary.
//!
//! The upgrade handshake itself happens outside this core; all the attach
//! step needs from it is a nullable session identity and the peer's
//! network identity.

use std::net::SocketAddr;

use crate::ids::SessionId;

/// What the attach step can see of the external handshake request.
pub trait Handshake: Send + Sync {
    /// Session identity carried by the request, if any. `None` is read by
    /// the default `on_open` as an invalid connection.
    fn session_id(&self) -> Option<SessionId>;

    /// Peer socket address. When the connection arrives through a proxy
    /// this is the proxy's address.
    fn remote_addr(&self) -> SocketAddr;

    /// Best-known client address string. Proxy-aware implementations
    /// override this with the forwarded-for address.
    fn remote_addr_str(&self) -> String {
        self.remote_addr().to_string()
    }
}

/// Plain-value [`Handshake`] for embedders that resolve identity before
/// calling attach, and for tests.
#[derive(Clone, Debug)]
pub struct StaticHandshake {
    session_id: Option<SessionId>,
    remote_addr: SocketAddr,
    forwarded_addr: Option<String>,
}

impl StaticHandshake {
    /// Handshake carrying a resolved session identity.
    pub fn new(session_id: impl Into<SessionId>, remote_addr: SocketAddr) -> Self {
        Self {
            session_id: Some(session_id.into()),
            remote_addr,
            forwarded_addr: None,
        }
    }

    /// Handshake with no session identity (an unauthenticated request).
    pub fn anonymous(remote_addr: SocketAddr) -> Self {
        Self {
            session_id: None,
            remote_addr,
            forwarded_addr: None,
        }
    }

    /// Attach a forwarded-for client address.
    #[must_use]
    pub fn with_forwarded_addr(mut self, addr: impl Into<String>) -> Self {
        self.forwarded_addr = Some(addr.into());
        self
    }
}

impl Handshake for StaticHandshake {
    fn session_id(&self) -> Option<SessionId> {
        self.session_id.clone()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn remote_addr_str(&self) -> String {
        self.forwarded_addr
            .clone()
            .unwrap_or_else(|| self.remote_addr.to_string())
    }
}
