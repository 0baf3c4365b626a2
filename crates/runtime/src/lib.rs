//! Session-resilient connections to remote sandboxes.
//!
//! This crate owns the lifecycle of one logical connection to a remote
//! sandbox: resuming it, creating a session, opening a live client and
//! keeping that client valid across socket drops and host focus changes.
//!
//! - **API**: [`SandboxApi`] abstracts the platform's resume/session calls;
//!   [`HttpSandboxApi`] implements it over REST
//! - **Supplier**: [`SessionSupplier`] re-runs resume + create-session on demand
//! - **Transport**: [`Transport`]/[`LiveClient`] are the live-socket contract;
//!   [`WebSocketTransport`] implements it with reconnects and health checks
//! - **Manager**: [`ConnectionManager`] wires the pieces together and tracks
//!   [`ConnectionState`]; [`ConnectionSlot`] holds one connection for an app
//! - **Visibility**: [`VisibilitySource`] is the injectable reconnection trigger
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────┐   resume + session   ┌──────────────┐
//! │ ConnectionManager │ ───────────────────► │  SandboxApi  │
//! └─────────┬─────────┘                      └──────▲───────┘
//!           │ open(session, supplier, focus)        │ on reconnect
//! ┌─────────▼─────────┐                      ┌──────┴───────┐
//! │     Transport     │ ───── get_session ──►│ SessionSupp. │
//! └─────────┬─────────┘                      └──────────────┘
//!           │ focus regained
//! ┌─────────┴─────────┐
//! │ VisibilitySource  │
//! └───────────────────┘
//! ```

pub mod api;
pub mod error;
pub mod http;
pub mod manager;
pub mod slot;
pub mod supplier;
pub mod transport;
pub mod visibility;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ListOptions, SandboxApi, SandboxPage};
pub use error::{ConnectionError, Error, ErrorKind, Result};
pub use http::{HttpSandboxApi, HttpSandboxApiBuilder};
pub use manager::{ConnectOptions, Connection, ConnectionManager, ConnectionState};
pub use slot::ConnectionSlot;
pub use supplier::SessionSupplier;
pub use transport::{ClientEvent, ClientFailure, FocusNotifier, FocusRegistrar, LiveClient, OpenOptions, ProgressHook, Transport};
pub use visibility::{ManualVisibility, Subscription, Visibility, VisibilityCallback, VisibilitySource};
pub use websocket::{ReconnectPolicy, WebSocketClient, WebSocketTransport};
