//! # groupcast-cluster
//!
//! [`NodeService`](groupcast_engine::NodeService) implementations.
//!
//! The engine defines the cluster directory/transport contract but never
//! implements it; this crate ships the implementations. Today that is
//! [`LocalNode`], the single-process router for standalone deployments —
//! a gossip- or broker-backed directory would slot in behind the same
//! trait.
//!
//! ## Crate Position
//!
//! Depends on `groupcast-core` and `groupcast-engine`. Depended on by
//! embedding servers.

#![deny(unsafe_code)]

pub mod local;

pub use local::LocalNode;
