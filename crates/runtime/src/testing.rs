//! In-memory fakes of the platform API and transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sbx_protocol::{BootupType, RpcNotification, SandboxHandle, SandboxId, SandboxMetadata, SandboxSummary, Session};
use serde_json::{Value, json};
use tokio::sync::{Notify, broadcast};

use crate::api::{ListOptions, SandboxApi, SandboxPage};
use crate::error::{Error, ErrorKind, Result};
use crate::transport::{ClientEvent, ClientFailure, LiveClient, OpenOptions, Transport};
use crate::visibility::Subscription;

pub(crate) fn sandbox_id(id: &str) -> SandboxId {
	SandboxId::new(id).unwrap()
}

/// Records every resume and session call; failures are switchable.
#[derive(Default)]
pub(crate) struct FakeApi {
	pub resume_calls: AtomicUsize,
	pub session_calls: AtomicUsize,
	pub fail_resume: AtomicBool,
	pub fail_session: AtomicBool,
	/// When set, every session carries this id.
	pub fixed_session_id: Mutex<Option<String>>,
	/// When set, resume waits for a permit before answering.
	pub resume_gate: Mutex<Option<Arc<Notify>>>,
	pub issued: Mutex<Vec<String>>,
	pub listing: Mutex<Vec<SandboxSummary>>,
}

impl FakeApi {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn resumes(&self) -> usize {
		self.resume_calls.load(Ordering::SeqCst)
	}

	pub fn sessions(&self) -> usize {
		self.session_calls.load(Ordering::SeqCst)
	}

	pub fn gate_resume(&self) -> Arc<Notify> {
		let gate = Arc::new(Notify::new());
		*self.resume_gate.lock() = Some(Arc::clone(&gate));
		gate
	}
}

#[async_trait]
impl SandboxApi for FakeApi {
	async fn resume_sandbox(&self, id: &SandboxId) -> Result<SandboxHandle> {
		self.resume_calls.fetch_add(1, Ordering::SeqCst);
		let gate = self.resume_gate.lock().clone();
		if let Some(gate) = gate {
			gate.notified().await;
		}
		if self.fail_resume.load(Ordering::SeqCst) {
			return Err(Error::Api {
				status: 503,
				message: "sandbox is starting".to_string(),
			});
		}
		Ok(SandboxHandle {
			id: id.clone(),
			metadata: SandboxMetadata::default(),
			bootup_type: Some(BootupType::Resume),
			cluster: Some("test-cluster".to_string()),
		})
	}

	async fn create_session(&self, sandbox: &SandboxHandle) -> Result<Session> {
		let n = self.session_calls.fetch_add(1, Ordering::SeqCst) + 1;
		if self.fail_session.load(Ordering::SeqCst) {
			return Err(Error::Api {
				status: 409,
				message: "sandbox not ready".to_string(),
			});
		}
		let id = self.fixed_session_id.lock().clone().unwrap_or_else(|| format!("session-{n}"));
		self.issued.lock().push(id.clone());
		Ok(Session {
			id,
			sandbox_id: sandbox.id.clone(),
			url: format!("ws://sandbox.test/{}", sandbox.id),
			token: format!("token-{n}"),
			workspace_path: Some("/project/workspace".to_string()),
		})
	}

	async fn list_sandboxes(&self, _options: ListOptions) -> Result<SandboxPage> {
		Ok(SandboxPage {
			sandboxes: self.listing.lock().clone(),
			pagination: Default::default(),
		})
	}
}

/// Transport whose clients reconnect on focus regain when asked to.
#[derive(Default)]
pub(crate) struct FakeTransport {
	pub fail_open: AtomicBool,
	pub reconnect_on_focus: AtomicBool,
	pub fail_disconnect: AtomicBool,
	pub opened_sessions: Mutex<Vec<String>>,
	pub clients: Mutex<Vec<Arc<FakeClient>>>,
}

impl FakeTransport {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn opens(&self) -> usize {
		self.opened_sessions.lock().len()
	}

	pub fn last_client(&self) -> Arc<FakeClient> {
		self.clients.lock().last().cloned().expect("no client opened")
	}
}

#[async_trait]
impl Transport for FakeTransport {
	async fn open(&self, session: Session, options: OpenOptions) -> Result<Arc<dyn LiveClient>> {
		self.opened_sessions.lock().push(session.id.clone());

		let client = Arc::new(FakeClient::new(session, options.clone(), self.fail_disconnect.load(Ordering::SeqCst)));

		let reconnect = self.reconnect_on_focus.load(Ordering::SeqCst);
		let weak = Arc::downgrade(&client);
		let subscription = (options.on_focus_change)(Arc::new(move |focused| {
			let Some(client) = weak.upgrade() else {
				return;
			};
			client.focus_events.lock().push(focused);
			if focused && reconnect {
				tokio::spawn(async move { client.reconnect().await });
			}
		}));
		*client.focus_subscription.lock() = Some(subscription);

		// Fails after the focus listener is registered, like a handshake
		// rejected once the socket is half set up.
		if self.fail_open.load(Ordering::SeqCst) {
			return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "handshake refused")));
		}

		self.clients.lock().push(Arc::clone(&client));
		Ok(client)
	}
}

pub(crate) struct FakeClient {
	sandbox_id: SandboxId,
	options: OpenOptions,
	fail_disconnect: bool,
	pub sessions: Mutex<Vec<String>>,
	pub focus_events: Mutex<Vec<bool>>,
	pub focus_subscription: Mutex<Option<Subscription>>,
	pub disconnect_calls: AtomicUsize,
	events: broadcast::Sender<ClientEvent>,
	notifications: broadcast::Sender<RpcNotification>,
}

impl FakeClient {
	fn new(session: Session, options: OpenOptions, fail_disconnect: bool) -> Self {
		Self {
			sandbox_id: session.sandbox_id,
			options,
			fail_disconnect,
			sessions: Mutex::new(vec![session.id]),
			focus_events: Mutex::new(Vec::new()),
			focus_subscription: Mutex::new(None),
			disconnect_calls: AtomicUsize::new(0),
			events: broadcast::channel(16).0,
			notifications: broadcast::channel(16).0,
		}
	}

	/// Replaces the "socket" with one opened from a fresh session.
	pub async fn reconnect(&self) {
		let _ = self.events.send(ClientEvent::Reconnecting);
		match self.options.get_session.get_session(&self.sandbox_id).await {
			Ok(session) => {
				self.sessions.lock().push(session.id);
				let _ = self.events.send(ClientEvent::Reconnected);
			}
			Err(err) => {
				let _ = self.events.send(ClientEvent::Error(ClientFailure::new(ErrorKind::Transport, err.to_string())));
			}
		}
	}

	pub fn emit(&self, event: ClientEvent) {
		let _ = self.events.send(event);
	}

	pub fn disconnects(&self) -> usize {
		self.disconnect_calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl LiveClient for FakeClient {
	fn sandbox_id(&self) -> &SandboxId {
		&self.sandbox_id
	}

	fn events(&self) -> broadcast::Receiver<ClientEvent> {
		self.events.subscribe()
	}

	async fn request(&self, method: &str, params: Value) -> Result<Value> {
		Ok(json!({ "method": method, "params": params }))
	}

	fn notifications(&self) -> broadcast::Receiver<RpcNotification> {
		self.notifications.subscribe()
	}

	async fn disconnect(&self) -> Result<()> {
		self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
		if let Some(subscription) = self.focus_subscription.lock().take() {
			subscription.unsubscribe();
		}
		if self.fail_disconnect {
			return Err(Error::Disconnected);
		}
		let _ = self.events.send(ClientEvent::Closed);
		Ok(())
	}
}
