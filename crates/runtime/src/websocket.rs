//! WebSocket live client with transparent reconnects.
//!
//! Each [`WebSocketClient`] owns one supervisor task that is the only reader
//! and writer of the socket. The task:
//!
//! - Correlates [`RpcRequest`]s with [`RpcResponse`]s by sequential id
//! - Broadcasts agent notifications
//! - Runs a ping health check when the host regains focus
//! - Replaces the socket through the [`SessionSupplier`](crate::SessionSupplier)
//!   when it drops, following a [`ReconnectPolicy`]
//!
//! Because a single task owns the reconnect loop, supplier invocations for
//! one client never overlap, and focus events that arrive while a check or a
//! reconnect is already running are coalesced.


use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use sbx_protocol::{InitProgress, RpcMessage, RpcNotification, RpcRequest, SandboxId, Session};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::transport::{ClientEvent, ClientFailure, LiveClient, OpenOptions, Transport};
use crate::visibility::Subscription;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How a dropped socket is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
	/// Session-supplier + dial attempts before the client gives up.
	pub max_attempts: u32,
	/// Delay before the second attempt; doubles afterwards.
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_backoff: Duration::from_millis(250),
			max_backoff: Duration::from_secs(5),
		}
	}
}

impl ReconnectPolicy {
	/// Delay before `attempt` (1-based). The first attempt runs immediately.
	pub fn backoff(&self, attempt: u32) -> Duration {
		if attempt <= 1 {
			return Duration::ZERO;
		}
		let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
		self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
	}
}

/// [`Transport`] over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
	policy: ReconnectPolicy,
	health_check_timeout: Duration,
	connect_timeout: Duration,
}

impl Default for WebSocketTransport {
	fn default() -> Self {
		Self::new()
	}
}

impl WebSocketTransport {
	pub fn new() -> Self {
		Self {
			policy: ReconnectPolicy::default(),
			health_check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
		}
	}

	pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
		self.policy = policy;
		self
	}

	/// How long a focus-triggered ping may go unanswered before the socket
	/// is considered dropped.
	pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
		self.health_check_timeout = timeout;
		self
	}

	pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
		self.connect_timeout = timeout;
		self
	}
}

#[async_trait]
impl Transport for WebSocketTransport {
	async fn open(&self, session: Session, options: OpenOptions) -> Result<Arc<dyn LiveClient>> {
		options.report(InitProgress::Opening);
		debug!(target: "sbx.ws", sandbox = %session.sandbox_id, session = %session.id, url = %session.url, "dialing");

		let stream = dial(&session, self.connect_timeout).await?;
		let client = WebSocketClient::spawn(session.sandbox_id, stream, options, self.clone());
		Ok(Arc::new(client))
	}
}

async fn dial(session: &Session, timeout: Duration) -> Result<WsStream> {
	let mut request = session.url.as_str().into_client_request()?;
	let bearer = HeaderValue::from_str(&format!("Bearer {}", session.token))
		.map_err(|_| Error::InvalidArgument("session token is not a valid header value".to_string()))?;
	request.headers_mut().insert(AUTHORIZATION, bearer);

	let (stream, _response) = tokio::time::timeout(timeout, connect_async(request))
		.await
		.map_err(|_| Error::Timeout(format!("connecting to {}", session.url)))??;
	Ok(stream)
}

enum Command {
	Send { id: u32, frame: String },
	CheckHealth,
	Close(Option<oneshot::Sender<()>>),
}

/// State shared between the client handle and its supervisor task.
struct Shared {
	sandbox_id: SandboxId,
	last_id: AtomicU32,
	pending: Mutex<HashMap<u32, oneshot::Sender<Result<Value>>>>,
	connected: AtomicBool,
	events: broadcast::Sender<ClientEvent>,
	/// Created before the supervisor starts; handed to the first subscriber.
	first_events: Mutex<Option<broadcast::Receiver<ClientEvent>>>,
	notifications: broadcast::Sender<RpcNotification>,
}

impl Shared {
	fn new(sandbox_id: SandboxId) -> Self {
		let (events, first_events) = broadcast::channel(32);
		Self {
			sandbox_id,
			last_id: AtomicU32::new(0),
			pending: Mutex::new(HashMap::new()),
			connected: AtomicBool::new(true),
			events,
			first_events: Mutex::new(Some(first_events)),
			notifications: broadcast::channel(256).0,
		}
	}

	/// The first call sees every event since construction; later calls
	/// only see events sent after they subscribe.
	fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
		self.first_events.lock().take().unwrap_or_else(|| self.events.subscribe())
	}

	fn dispatch(&self, text: &str) {
		match serde_json::from_str::<RpcMessage>(text) {
			Ok(RpcMessage::Response(response)) => {
				let Some(callback) = self.pending.lock().remove(&response.id) else {
					debug!(target: "sbx.ws", id = response.id, "response for unknown request (ignored)");
					return;
				};
				let result = match response.error {
					Some(error) => Err(Error::Remote {
						code: error.code,
						message: error.message,
					}),
					None => Ok(response.result.unwrap_or(Value::Null)),
				};
				let _ = callback.send(result);
			}
			Ok(RpcMessage::Notification(notification)) => {
				let _ = self.notifications.send(notification);
			}
			Ok(RpcMessage::Unknown(value)) => {
				debug!(target: "sbx.ws", frame = %value, "unknown frame (forward-compatible, ignored)");
			}
			Err(err) => {
				warn!(target: "sbx.ws", error = %err, "failed to parse frame");
			}
		}
	}

	fn fail(&self, id: u32, error: Error) {
		if let Some(callback) = self.pending.lock().remove(&id) {
			let _ = callback.send(Err(error));
		}
	}

	fn fail_pending(&self) {
		let pending = std::mem::take(&mut *self.pending.lock());
		for (_, callback) in pending {
			let _ = callback.send(Err(Error::Disconnected));
		}
	}
}

/// RAII guard removing a pending callback if the request future is dropped.
struct PendingGuard<'a> {
	id: u32,
	pending: &'a Mutex<HashMap<u32, oneshot::Sender<Result<Value>>>>,
	completed: bool,
}

impl PendingGuard<'_> {
	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for PendingGuard<'_> {
	fn drop(&mut self) {
		if !self.completed && self.pending.lock().remove(&self.id).is_some() {
			debug!(target: "sbx.ws", id = self.id, "removed orphaned callback");
		}
	}
}

/// Live client backed by a supervised WebSocket.
pub struct WebSocketClient {
	shared: Arc<Shared>,
	commands: mpsc::UnboundedSender<Command>,
	focus: Subscription,
	closed: AtomicBool,
}

impl WebSocketClient {
	fn spawn(sandbox_id: SandboxId, stream: WsStream, options: OpenOptions, transport: WebSocketTransport) -> Self {
		let shared = Arc::new(Shared::new(sandbox_id));
		let (commands, command_rx) = mpsc::unbounded_channel();

		// The notifier must not keep the command channel alive on its own.
		let weak_commands = commands.downgrade();
		let focus = (options.on_focus_change)(Arc::new(move |focused| {
			if !focused {
				return;
			}
			if let Some(commands) = weak_commands.upgrade() {
				let _ = commands.send(Command::CheckHealth);
			}
		}));

		let supervisor = Supervisor {
			shared: Arc::clone(&shared),
			options,
			policy: transport.policy,
			health_check_timeout: transport.health_check_timeout,
			connect_timeout: transport.connect_timeout,
		};
		tokio::spawn(supervisor.run(stream, command_rx));

		Self {
			shared,
			commands,
			focus,
			closed: AtomicBool::new(false),
		}
	}

	/// True while a socket is open (false during reconnects and after close).
	pub fn is_connected(&self) -> bool {
		self.shared.connected.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
	}
}

#[async_trait]
impl LiveClient for WebSocketClient {
	fn sandbox_id(&self) -> &SandboxId {
		&self.shared.sandbox_id
	}

	fn events(&self) -> broadcast::Receiver<ClientEvent> {
		self.shared.subscribe_events()
	}

	async fn request(&self, method: &str, params: Value) -> Result<Value> {
		if !self.is_connected() {
			return Err(Error::Disconnected);
		}

		let id = self.shared.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.shared.pending.lock().insert(id, tx);
		let mut guard = PendingGuard {
			id,
			pending: &self.shared.pending,
			completed: false,
		};

		let frame = serde_json::to_string(&RpcRequest {
			id,
			method: method.to_string(),
			params,
		})?;
		debug!(target: "sbx.ws", id, method, "sending request");

		if self.commands.send(Command::Send { id, frame }).is_err() {
			return Err(Error::Disconnected);
		}

		let result = rx.await;
		guard.complete();
		result.map_err(|_| Error::ChannelClosed)?
	}

	fn notifications(&self) -> broadcast::Receiver<RpcNotification> {
		self.shared.notifications.subscribe()
	}

	async fn disconnect(&self) -> Result<()> {
		if self.closed.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		self.focus.unsubscribe();

		let (ack_tx, ack_rx) = oneshot::channel();
		if self.commands.send(Command::Close(Some(ack_tx))).is_err() {
			// Supervisor already exited (gave up reconnecting).
			return Ok(());
		}
		match tokio::time::timeout(CLOSE_TIMEOUT, ack_rx).await {
			Ok(_) => Ok(()),
			Err(_) => Err(Error::Timeout("closing sandbox socket".to_string())),
		}
	}
}

impl Drop for WebSocketClient {
	fn drop(&mut self) {
		if self.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		self.focus.unsubscribe();
		let _ = self.commands.send(Command::Close(None));
	}
}

/// Why the connected phase ended.
enum Served {
	Closed(Option<oneshot::Sender<()>>),
	Dropped(String),
}

enum Reconnected {
	Stream(WsStream),
	Closed(Option<oneshot::Sender<()>>),
	GaveUp(Error),
}

struct Supervisor {
	shared: Arc<Shared>,
	options: OpenOptions,
	policy: ReconnectPolicy,
	health_check_timeout: Duration,
	connect_timeout: Duration,
}

impl Supervisor {
	async fn run(self, mut stream: WsStream, mut commands: mpsc::UnboundedReceiver<Command>) {
		let sandbox = self.shared.sandbox_id.clone();
		loop {
			let reason = match self.serve(&mut stream, &mut commands).await {
				Served::Closed(ack) => {
					if let Err(err) = stream.close(None).await {
						debug!(target: "sbx.ws", sandbox = %sandbox, error = %err, "close handshake failed");
					}
					self.finish(&mut commands, ClientEvent::Closed);
					if let Some(ack) = ack {
						let _ = ack.send(());
					}
					return;
				}
				Served::Dropped(reason) => reason,
			};

			self.shared.connected.store(false, Ordering::Release);
			self.shared.fail_pending();
			warn!(target: "sbx.ws", sandbox = %sandbox, reason = %reason, "socket dropped; reconnecting");
			let _ = self.shared.events.send(ClientEvent::Reconnecting);

			match self.reconnect(&mut commands).await {
				Reconnected::Stream(fresh) => {
					stream = fresh;
					self.shared.connected.store(true, Ordering::Release);
					let _ = self.shared.events.send(ClientEvent::Reconnected);
				}
				Reconnected::Closed(ack) => {
					self.finish(&mut commands, ClientEvent::Closed);
					if let Some(ack) = ack {
						let _ = ack.send(());
					}
					return;
				}
				Reconnected::GaveUp(err) => {
					warn!(target: "sbx.ws", sandbox = %sandbox, error = %err, "giving up reconnecting");
					let failure = ClientFailure::new(ErrorKind::Transport, err.to_string());
					self.finish(&mut commands, ClientEvent::Error(failure));
					return;
				}
			}
		}
	}

	/// Serves requests on an open socket until it closes or drops.
	async fn serve(&self, stream: &mut WsStream, commands: &mut mpsc::UnboundedReceiver<Command>) -> Served {
		let mut health_deadline: Option<Instant> = None;
		loop {
			let deadline = health_deadline;
			tokio::select! {
				frame = stream.next() => match frame {
					Some(Ok(message)) => {
						// Any inbound frame proves the socket is alive.
						health_deadline = None;
						match message {
							Message::Text(text) => self.shared.dispatch(&text),
							Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
								Ok(text) => self.shared.dispatch(text),
								Err(_) => debug!(target: "sbx.ws", len = bytes.len(), "ignoring non-UTF-8 binary frame"),
							},
							Message::Close(frame) => return Served::Dropped(format!("server closed the socket ({frame:?})")),
							Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
						}
					}
					Some(Err(err)) => return Served::Dropped(err.to_string()),
					None => return Served::Dropped("socket stream ended".to_string()),
				},
				command = commands.recv() => match command {
					Some(Command::Send { id, frame }) => {
						if let Err(err) = stream.send(Message::Text(frame)).await {
							self.shared.fail(id, Error::Disconnected);
							return Served::Dropped(err.to_string());
						}
					}
					Some(Command::CheckHealth) => {
						if health_deadline.is_some() {
							debug!(target: "sbx.ws", "health check already in flight");
							continue;
						}
						debug!(target: "sbx.ws", sandbox = %self.shared.sandbox_id, "focus regained; checking socket");
						if let Err(err) = stream.send(Message::Ping(Vec::new())).await {
							return Served::Dropped(err.to_string());
						}
						health_deadline = Some(Instant::now() + self.health_check_timeout);
					}
					Some(Command::Close(ack)) => return Served::Closed(ack),
					None => return Served::Closed(None),
				},
				_ = wait_until(deadline) => {
					return Served::Dropped("health check timed out".to_string());
				}
			}
		}
	}

	/// Replaces the socket with one opened from a fresh session.
	async fn reconnect(&self, commands: &mut mpsc::UnboundedReceiver<Command>) -> Reconnected {
		let mut last_error = Error::Disconnected;

		for attempt in 1..=self.policy.max_attempts {
			let delay = self.policy.backoff(attempt);
			let attempt_future = async {
				if !delay.is_zero() {
					tokio::time::sleep(delay).await;
				}
				self.reopen(attempt).await
			};
			tokio::pin!(attempt_future);

			loop {
				tokio::select! {
					result = &mut attempt_future => match result {
						Ok(stream) => return Reconnected::Stream(stream),
						Err(err) => {
							warn!(target: "sbx.ws", sandbox = %self.shared.sandbox_id, attempt, error = %err, "reconnect attempt failed");
							last_error = err;
							break;
						}
					},
					command = commands.recv() => match command {
						Some(Command::Send { id, .. }) => self.shared.fail(id, Error::Disconnected),
						Some(Command::CheckHealth) => {
							debug!(target: "sbx.ws", "reconnect in progress; ignoring health check");
						}
						Some(Command::Close(ack)) => return Reconnected::Closed(ack),
						None => return Reconnected::Closed(None),
					},
				}
			}
		}

		Reconnected::GaveUp(last_error)
	}

	async fn reopen(&self, attempt: u32) -> Result<WsStream> {
		debug!(target: "sbx.ws", sandbox = %self.shared.sandbox_id, attempt, "requesting fresh session");
		let session = self.options.get_session.get_session(&self.shared.sandbox_id).await?;
		self.options.report(InitProgress::Opening);
		let stream = dial(&session, self.connect_timeout).await?;
		info!(target: "sbx.ws", sandbox = %self.shared.sandbox_id, session = %session.id, attempt, "socket re-established");
		Ok(stream)
	}

	/// Stops accepting commands, fails everything outstanding and reports `event`.
	fn finish(&self, commands: &mut mpsc::UnboundedReceiver<Command>, event: ClientEvent) {
		self.shared.connected.store(false, Ordering::Release);
		commands.close();
		while let Ok(command) = commands.try_recv() {
			match command {
				Command::Send { id, .. } => self.shared.fail(id, Error::Disconnected),
				Command::Close(Some(ack)) => {
					let _ = ack.send(());
				}
				Command::Close(None) | Command::CheckHealth => {}
			}
		}
		self.shared.fail_pending();
		let _ = self.shared.events.send(event);
	}
}

async fn wait_until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}
