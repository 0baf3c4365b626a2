//! Wire types for the remote sandbox platform.
//!
//! This crate contains the serde-serializable types exchanged with the
//! sandbox platform: the REST envelopes used to resume sandboxes and mint
//! sessions, and the JSON frames spoken over a live client socket.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization and small invariants
//! - **1:1 with the wire**: Field names match what the platform sends
//! - **Stable**: Changes only when the platform contract changes
//!
//! Connection lifecycle, retries and transports live in `sbx-runtime`.

pub mod api;
pub mod rpc;
pub mod sandbox;
pub mod session;

pub use api::*;
pub use rpc::*;
pub use sandbox::*;
pub use session::*;
