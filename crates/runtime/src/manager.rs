//! Session-resilient connection manager.
//!
//! [`ConnectionManager::connect`] resumes a sandbox, creates a session and
//! opens a live client with it. The transport receives a [`SessionSupplier`]
//! it can call whenever the socket needs replacing, so reconnects re-run the
//! resume step without the caller being involved.
//!
//! # State machine
//!
//! ```text
//! Idle ──connect()──► Connecting ──ok──► Connected ◄──reconnected── Reconnecting
//!                         │                  │  └──need new session──►  │
//!                         ▼                  ▼                          ▼
//!                 Error(session|transport)  disconnect() ──► Idle   Error(transport)
//! ```
//!
//! `Error` is terminal from the manager's side: there is no internal retry,
//! the owner decides whether to call `connect()` again.


use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use sbx_protocol::{InitProgress, RpcNotification, SandboxHandle, SandboxId, SandboxMetadata};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::SandboxApi;
use crate::error::{ConnectionError, ErrorKind, Result};
use crate::supplier::SessionSupplier;
use crate::transport::{ClientEvent, FocusNotifier, FocusRegistrar, LiveClient, OpenOptions, ProgressHook, Transport};
use crate::visibility::{Subscription, Visibility, VisibilitySource};

/// Caller-visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
	#[default]
	Idle,
	Connecting,
	Connected,
	Reconnecting,
	Error(ErrorKind),
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConnectionState::Idle => f.write_str("idle"),
			ConnectionState::Connecting => f.write_str("connecting"),
			ConnectionState::Connected => f.write_str("connected"),
			ConnectionState::Reconnecting => f.write_str("reconnecting"),
			ConnectionState::Error(kind) => write!(f, "error({kind})"),
		}
	}
}

/// Per-call hooks and caller data for [`ConnectionManager::connect`].
#[derive(Clone, Default)]
pub struct ConnectOptions {
	metadata: SandboxMetadata,
	on_init_progress: Option<ProgressHook>,
	visibility: Option<Arc<dyn VisibilitySource>>,
	state: Option<watch::Sender<ConnectionState>>,
}

impl ConnectOptions {
	/// Listing metadata re-attached to the handle after every resume.
	pub fn with_metadata(mut self, metadata: SandboxMetadata) -> Self {
		self.metadata = metadata;
		self
	}

	pub fn on_init_progress(mut self, hook: impl Fn(InitProgress) + Send + Sync + 'static) -> Self {
		self.on_init_progress = Some(Arc::new(hook));
		self
	}

	/// Overrides the manager's default visibility source for this connection.
	pub fn with_visibility(mut self, source: Arc<dyn VisibilitySource>) -> Self {
		self.visibility = Some(source);
		self
	}

	/// Publishes state changes on an existing channel instead of a new one.
	pub fn with_state_sender(mut self, state: watch::Sender<ConnectionState>) -> Self {
		self.state = Some(state);
		self
	}
}

impl fmt::Debug for ConnectOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectOptions")
			.field("metadata", &self.metadata)
			.field("on_init_progress", &self.on_init_progress.is_some())
			.field("visibility", &self.visibility.is_some())
			.finish_non_exhaustive()
	}
}

/// Opens and tears down live connections to sandboxes.
///
/// Holds no per-connection state; each [`Connection`] owns its client,
/// listeners and state channel.
pub struct ConnectionManager {
	api: Arc<dyn SandboxApi>,
	transport: Arc<dyn Transport>,
	visibility: Arc<dyn VisibilitySource>,
}

impl ConnectionManager {
	/// `visibility` is the default reconnection trigger for every connection.
	pub fn new(api: Arc<dyn SandboxApi>, transport: Arc<dyn Transport>, visibility: Arc<dyn VisibilitySource>) -> Self {
		Self { api, transport, visibility }
	}

	pub fn api(&self) -> &Arc<dyn SandboxApi> {
		&self.api
	}

	/// Resumes `sandbox_id`, creates a session and opens a live client.
	///
	/// Steps run strictly in order and are not retried. A failure in resume
	/// or session creation is a [`ErrorKind::Session`] error; a failure
	/// opening the transport is a [`ErrorKind::Transport`] error. Listeners
	/// registered during a failed (or dropped) attempt are removed.
	pub async fn connect(&self, sandbox_id: &SandboxId, options: ConnectOptions) -> std::result::Result<Connection, ConnectionError> {
		let ConnectOptions {
			metadata,
			on_init_progress,
			visibility,
			state,
		} = options;
		let state = state.unwrap_or_else(|| watch::channel(ConnectionState::Idle).0);
		state.send_replace(ConnectionState::Connecting);

		info!(target: "sbx.connection", sandbox = %sandbox_id, "connecting");

		let supplier = SessionSupplier::new(Arc::clone(&self.api), sandbox_id.clone(), metadata, on_init_progress.clone());
		let (sandbox, session) = match supplier.acquire().await {
			Ok(acquired) => acquired,
			Err(err) => {
				warn!(target: "sbx.connection", sandbox = %sandbox_id, error = %err, "resume or session creation failed");
				state.send_replace(ConnectionState::Error(ErrorKind::Session));
				return Err(ConnectionError::session(err));
			}
		};

		let listeners = Arc::new(ListenerSet::default());
		let guard = ListenerGuard::new(Arc::clone(&listeners));
		let source = visibility.unwrap_or_else(|| Arc::clone(&self.visibility));

		let open_options = OpenOptions {
			get_session: supplier.clone(),
			on_focus_change: focus_registrar(source, Arc::clone(&listeners)),
			on_init_progress: on_init_progress.clone(),
		};

		let client = match self.transport.open(session, open_options).await {
			Ok(client) => client,
			Err(err) => {
				warn!(target: "sbx.connection", sandbox = %sandbox_id, error = %err, "transport open failed");
				state.send_replace(ConnectionState::Error(ErrorKind::Transport));
				return Err(ConnectionError::transport(err));
			}
		};
		guard.disarm();

		if let Some(hook) = &on_init_progress {
			hook(InitProgress::Connected);
		}
		state.send_replace(ConnectionState::Connected);
		info!(target: "sbx.connection", sandbox = %sandbox_id, title = ?sandbox.title(), "connected");

		let forwarder = spawn_state_forwarder(client.events(), state.clone(), sandbox_id.clone());

		Ok(Connection {
			inner: Arc::new(ConnectionInner {
				client,
				supplier,
				initial: sandbox,
				state,
				listeners,
				forwarder: Mutex::new(Some(forwarder)),
				disposed: AtomicBool::new(false),
			}),
		})
	}

	/// Tears `connection` down. See [`Connection::disconnect`].
	pub async fn disconnect(&self, connection: &Connection) {
		connection.disconnect().await;
	}
}

/// A live connection: the client, the resolved sandbox and its state.
///
/// Clones share the same underlying connection.
#[derive(Clone)]
pub struct Connection {
	inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
	client: Arc<dyn LiveClient>,
	supplier: SessionSupplier,
	initial: SandboxHandle,
	state: watch::Sender<ConnectionState>,
	listeners: Arc<ListenerSet>,
	forwarder: Mutex<Option<JoinHandle<()>>>,
	disposed: AtomicBool,
}

impl Connection {
	/// Latest resolved sandbox handle, caller metadata re-attached.
	pub fn sandbox(&self) -> SandboxHandle {
		self.inner.supplier.latest_sandbox().unwrap_or_else(|| self.inner.initial.clone())
	}

	pub fn sandbox_id(&self) -> &SandboxId {
		&self.inner.initial.id
	}

	pub fn state(&self) -> ConnectionState {
		*self.inner.state.borrow()
	}

	pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
		self.inner.state.subscribe()
	}

	pub fn client(&self) -> &Arc<dyn LiveClient> {
		&self.inner.client
	}

	pub fn supplier(&self) -> &SessionSupplier {
		&self.inner.supplier
	}

	pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
		self.inner.client.request(method, params).await
	}

	pub fn notifications(&self) -> broadcast::Receiver<RpcNotification> {
		self.inner.client.notifications()
	}

	pub fn is_disposed(&self) -> bool {
		self.inner.disposed.load(Ordering::Acquire)
	}

	/// Removes visibility listeners, disconnects the client and moves to `Idle`.
	///
	/// Idempotent and infallible: teardown errors are logged and swallowed,
	/// and the client's own `disconnect` runs at most once.
	pub async fn disconnect(&self) {
		if self.inner.disposed.swap(true, Ordering::AcqRel) {
			debug!(target: "sbx.connection", sandbox = %self.sandbox_id(), "already disconnected");
			return;
		}

		let removed = self.inner.listeners.close();
		if let Some(forwarder) = self.inner.forwarder.lock().take() {
			forwarder.abort();
		}

		if let Err(err) = self.inner.client.disconnect().await {
			warn!(target: "sbx.connection", sandbox = %self.sandbox_id(), error = %err, "client teardown failed");
		}

		self.inner.state.send_replace(ConnectionState::Idle);
		info!(target: "sbx.connection", sandbox = %self.sandbox_id(), listeners = removed, "disconnected");
	}
}

impl fmt::Debug for Connection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Connection")
			.field("sandbox_id", self.sandbox_id())
			.field("state", &self.state())
			.field("disposed", &self.is_disposed())
			.finish_non_exhaustive()
	}
}

impl Drop for ConnectionInner {
	fn drop(&mut self) {
		if self.disposed.load(Ordering::Acquire) {
			return;
		}
		self.listeners.close();
		if let Some(forwarder) = self.forwarder.get_mut().take() {
			forwarder.abort();
		}
	}
}

fn spawn_state_forwarder(
	mut events: broadcast::Receiver<ClientEvent>,
	state: watch::Sender<ConnectionState>,
	sandbox_id: SandboxId,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		loop {
			match events.recv().await {
				Ok(ClientEvent::Reconnecting) => {
					info!(target: "sbx.connection", sandbox = %sandbox_id, "reconnecting");
					state.send_replace(ConnectionState::Reconnecting);
				}
				Ok(ClientEvent::Reconnected) => {
					info!(target: "sbx.connection", sandbox = %sandbox_id, "reconnected");
					state.send_replace(ConnectionState::Connected);
				}
				Ok(ClientEvent::Error(failure)) => {
					warn!(target: "sbx.connection", sandbox = %sandbox_id, kind = %failure.kind, error = %failure.message, "connection lost");
					state.send_replace(ConnectionState::Error(failure.kind));
				}
				Ok(ClientEvent::Closed) | Err(broadcast::error::RecvError::Closed) => break,
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					debug!(target: "sbx.connection", sandbox = %sandbox_id, skipped, "client events lagged");
				}
			}
		}
	})
}

/// Visibility subscriptions owned by one connection attempt.
///
/// Once closed, late registrations are unsubscribed immediately so a
/// transport that registers after teardown cannot leave a listener behind.
#[derive(Default)]
pub(crate) struct ListenerSet {
	state: Mutex<ListenerState>,
}

#[derive(Default)]
struct ListenerState {
	closed: bool,
	subscriptions: Vec<Subscription>,
}

impl ListenerSet {
	fn track(&self, subscription: Subscription) {
		let mut state = self.state.lock();
		if state.closed {
			drop(state);
			subscription.unsubscribe();
		} else {
			state.subscriptions.push(subscription);
		}
	}

	/// Unsubscribes everything; returns how many listeners were removed.
	fn close(&self) -> usize {
		let subscriptions = {
			let mut state = self.state.lock();
			state.closed = true;
			std::mem::take(&mut state.subscriptions)
		};
		subscriptions.iter().filter(|s| s.unsubscribe()).count()
	}
}

/// Closes a [`ListenerSet`] on drop unless disarmed.
struct ListenerGuard {
	listeners: Option<Arc<ListenerSet>>,
}

impl ListenerGuard {
	fn new(listeners: Arc<ListenerSet>) -> Self {
		Self { listeners: Some(listeners) }
	}

	fn disarm(mut self) {
		self.listeners = None;
	}
}

impl Drop for ListenerGuard {
	fn drop(&mut self) {
		if let Some(listeners) = self.listeners.take() {
			let removed = listeners.close();
			if removed > 0 {
				debug!(target: "sbx.connection", removed, "rolled back visibility listeners");
			}
		}
	}
}

/// Bridges host visibility to a transport's focus notifier.
///
/// `Hidden` is forwarded as `false`; `Visible` is forwarded as `true` only
/// after a preceding `Hidden` (or when the host was already hidden at
/// registration), so one regain produces one notification.
fn focus_registrar(source: Arc<dyn VisibilitySource>, listeners: Arc<ListenerSet>) -> FocusRegistrar {
	Arc::new(move |notify: FocusNotifier| {
		let was_hidden = Arc::new(AtomicBool::new(false));
		let seen = Arc::clone(&was_hidden);
		let subscription = source.subscribe(Arc::new(move |visibility| match visibility {
			Visibility::Hidden => {
				was_hidden.store(true, Ordering::SeqCst);
				notify(false);
			}
			Visibility::Visible => {
				if was_hidden.swap(false, Ordering::SeqCst) {
					notify(true);
				}
			}
		}));
		// A host already hidden at registration still owes one regain.
		if source.current() == Visibility::Hidden {
			seen.store(true, Ordering::SeqCst);
		}
		listeners.track(subscription.clone());
		subscription
	})
}
