//! Contract between the connection manager and a live transport.
//!
//! The manager never reconnects by itself. It hands the transport an
//! [`OpenOptions`] holding a [`SessionSupplier`] and a focus registrar, and
//! the transport decides when a fresh session is needed (socket drop, failed
//! health check after focus regain) and asks the supplier for one.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sbx_protocol::{InitProgress, RpcNotification, SandboxId, Session};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{ErrorKind, Result};
use crate::supplier::SessionSupplier;
use crate::visibility::Subscription;

/// Callback the transport hands to the focus registrar; `true` means the
/// host just regained focus and the connection should be verified.
pub type FocusNotifier = Arc<dyn Fn(bool) + Send + Sync>;

/// Registers a [`FocusNotifier`] with the host; the returned subscription
/// unregisters it.
pub type FocusRegistrar = Arc<dyn Fn(FocusNotifier) -> Subscription + Send + Sync>;

/// Receives coarse lifecycle events while a connection comes up.
pub type ProgressHook = Arc<dyn Fn(InitProgress) + Send + Sync>;

/// Everything a transport needs besides the initial session.
#[derive(Clone)]
pub struct OpenOptions {
	/// Produces a brand-new session on every call; used for each reconnect.
	pub get_session: SessionSupplier,
	/// Bridges host focus changes to the transport.
	pub on_focus_change: FocusRegistrar,
	pub on_init_progress: Option<ProgressHook>,
}

impl OpenOptions {
	pub(crate) fn report(&self, progress: InitProgress) {
		if let Some(hook) = &self.on_init_progress {
			hook(progress);
		}
	}
}

impl fmt::Debug for OpenOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OpenOptions")
			.field("get_session", &self.get_session)
			.field("on_init_progress", &self.on_init_progress.is_some())
			.finish_non_exhaustive()
	}
}

/// Opens live clients from sessions.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Consumes `session` and returns an open client.
	async fn open(&self, session: Session, options: OpenOptions) -> Result<Arc<dyn LiveClient>>;
}

/// Open bidirectional channel to a sandbox.
#[async_trait]
pub trait LiveClient: Send + Sync {
	fn sandbox_id(&self) -> &SandboxId;

	/// Client-level lifecycle and error events.
	///
	/// Transport failures that happen outside a request (a reconnect that
	/// gave up, for instance) are reported here rather than through a
	/// process-wide hook. The first receiver handed out must also carry
	/// events emitted between `open` returning and this call; the manager
	/// takes it.
	fn events(&self) -> broadcast::Receiver<ClientEvent>;

	/// Sends a request to the sandbox agent and awaits its response.
	async fn request(&self, method: &str, params: Value) -> Result<Value>;

	/// Notifications pushed by the sandbox agent.
	fn notifications(&self) -> broadcast::Receiver<RpcNotification>;

	/// Releases the transport. Called at most once per client by the manager.
	async fn disconnect(&self) -> Result<()>;
}

/// Lifecycle event emitted by a [`LiveClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
	/// The socket dropped and a fresh session is being acquired.
	Reconnecting,
	/// A reconnect succeeded.
	Reconnected,
	/// The client is lost; the caller must disconnect and connect again.
	Error(ClientFailure),
	/// The client was closed on request.
	Closed,
}

/// Typed failure carried by [`ClientEvent::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFailure {
	pub kind: ErrorKind,
	pub message: String,
}

impl ClientFailure {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
		}
	}
}

impl fmt::Display for ClientFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} error: {}", self.kind, self.message)
	}
}
