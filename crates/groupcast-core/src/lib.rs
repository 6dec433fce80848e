//! # groupcast-core
//!
//! Foundation types for the groupcast messaging core.
//!
//! This crate provides the shared vocabulary that the engine and cluster
//! crates depend on:
//!
//! - **Branded IDs**: [`ids::SessionId`], [`ids::GroupId`] as newtypes
//! - **Packets**: [`packet::Packet`] outbound frame units, [`packet::Payload`]
//!   for group fan-out requests
//! - **Retcodes**: [`retcode::RetCode`] bit-flag send results
//! - **Attributes**: [`attributes::AttributeStore`] per-session scratch space
//! - **Handshake**: [`handshake::Handshake`] identity boundary trait
//! - **Errors**: [`errors::AttachError`] via `thiserror`
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `groupcast-engine` and
//! `groupcast-cluster`.

#![deny(unsafe_code)]

pub mod attributes;
pub mod errors;
pub mod handshake;
pub mod ids;
pub mod packet;
pub mod retcode;

pub use attributes::AttributeStore;
pub use errors::AttachError;
pub use handshake::{Handshake, StaticHandshake};
pub use ids::{GroupId, SessionId};
pub use packet::{FrameType, Packet, Payload, CONTROL_PAYLOAD_MAX};
pub use retcode::RetCode;
