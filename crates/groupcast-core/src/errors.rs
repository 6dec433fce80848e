//! Attach-path errors.
//!
//! Send paths never return errors (they report [`crate::RetCode`] flags);
//! the one fallible non-send operation is attaching a new connection.

use thiserror::Error;

/// Why an attach was aborted. In both cases no group or engine state was
/// touched; the handshake layer tears the connection down.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachError {
    /// `on_open` yielded no session identity — the connection is not
    /// logged in or otherwise invalid.
    #[error("handshake produced no session id")]
    InvalidSession,

    /// `create_groupid` yielded no group identity — the connection lacks
    /// the permissions or context to be grouped.
    #[error("handler produced no group id")]
    InvalidGroup,
}
