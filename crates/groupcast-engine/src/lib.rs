//! # groupcast-engine
//!
//! The session/group/engine messaging core.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `runner` | Per-connection outbound write serialization, retcode reporting |
//! | `session` | One connection: handler callbacks, send surface, lifecycle |
//! | `group` | Membership set, snapshot broadcast, most-recent selection |
//! | `engine` | Group registry, atomic attach, node-service gateway |
//! | `node` | `NodeService` cluster directory/transport contract |
//! | `metrics` | Metric name constants |
//!
//! ## Data Flow
//!
//! The dispatch layer feeds decoded inbound frames to a `Session`'s
//! handler. Outbound, single-session sends go through that session's
//! `Runner`; group-wide sends go through the `Engine`, which delegates to
//! the configured `NodeService` for cluster-wide fan-out.
//!
//! ## Crate Position
//!
//! Depends on `groupcast-core`. Depended on by `groupcast-cluster` and by
//! embedding servers.

#![deny(unsafe_code)]

pub mod engine;
pub mod group;
pub mod metrics;
pub mod node;
pub mod runner;
pub mod session;

pub use engine::Engine;
pub use group::Group;
pub use node::{NodeAddr, NodeService};
pub use runner::{Runner, DEFAULT_QUEUE_CAPACITY};
pub use session::{Mode, RawChannel, Session, SessionHandler, SessionState};
