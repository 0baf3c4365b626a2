//! Single-connection slot owned by an application.


use std::sync::Arc;

use parking_lot::Mutex;
use sbx_protocol::SandboxId;
use tokio::sync::{Mutex as TokioMutex, watch};
use tracing::debug;

use crate::error::{ConnectionError, Error};
use crate::manager::{ConnectOptions, Connection, ConnectionManager, ConnectionState};

/// Holds at most one live [`Connection`] and its state channel.
///
/// `connect` replaces whatever the slot held. `disconnect` may be called
/// while a `connect` is still in flight: the late connection is torn down
/// as soon as it settles and the `connect` call reports a cancellation.
///
/// Each attempt publishes into its own state channel; values reach the
/// slot's channel only while that attempt is still the current generation.
pub struct ConnectionSlot {
	manager: Arc<ConnectionManager>,
	state: Arc<watch::Sender<ConnectionState>>,
	inner: Arc<Mutex<SlotInner>>,
	connect_lock: TokioMutex<()>,
}

#[derive(Default)]
struct SlotInner {
	generation: u64,
	current: Option<Connection>,
}

impl ConnectionSlot {
	pub fn new(manager: Arc<ConnectionManager>) -> Self {
		Self {
			manager,
			state: Arc::new(watch::channel(ConnectionState::Idle).0),
			inner: Arc::new(Mutex::new(SlotInner::default())),
			connect_lock: TokioMutex::new(()),
		}
	}

	/// Disconnects the current connection (if any) and connects `sandbox_id`.
	pub async fn connect(&self, sandbox_id: &SandboxId, options: ConnectOptions) -> Result<Connection, ConnectionError> {
		let _serialized = self.connect_lock.lock().await;

		let (generation, previous) = {
			let mut inner = self.inner.lock();
			inner.generation += 1;
			(inner.generation, inner.current.take())
		};
		if let Some(previous) = previous {
			previous.disconnect().await;
		}

		let (attempt_state, attempt_rx) = watch::channel(ConnectionState::Connecting);
		self.spawn_state_relay(generation, attempt_rx.clone());

		let result = self.manager.connect(sandbox_id, options.with_state_sender(attempt_state)).await;

		let superseded = {
			let mut inner = self.inner.lock();
			if inner.generation != generation {
				true
			} else {
				if let Ok(connection) = &result {
					inner.current = Some(connection.clone());
				}
				self.state.send_replace(*attempt_rx.borrow());
				false
			}
		};

		if !superseded {
			return result;
		}

		debug!(target: "sbx.connection", sandbox = %sandbox_id, "connect settled after disconnect; tearing down");
		match result {
			Ok(connection) => {
				connection.disconnect().await;
				Err(ConnectionError::unknown(Error::Cancelled(format!("connection to {sandbox_id} was disconnected while connecting"))))
			}
			Err(err) => Err(err),
		}
	}

	/// Forwards one attempt's states to the slot until it is superseded.
	fn spawn_state_relay(&self, generation: u64, mut attempt: watch::Receiver<ConnectionState>) {
		let inner = Arc::clone(&self.inner);
		let state = Arc::clone(&self.state);
		tokio::spawn(async move {
			loop {
				{
					let inner = inner.lock();
					if inner.generation != generation {
						break;
					}
					state.send_replace(*attempt.borrow_and_update());
				}
				if attempt.changed().await.is_err() {
					break;
				}
			}
		});
	}

	/// Disconnects the current connection and cancels any in-flight connect.
	pub async fn disconnect(&self) {
		let current = {
			let mut inner = self.inner.lock();
			inner.generation += 1;
			self.state.send_replace(ConnectionState::Idle);
			inner.current.take()
		};
		if let Some(connection) = current {
			connection.disconnect().await;
		}
	}

	pub fn current(&self) -> Option<Connection> {
		self.inner.lock().current.clone()
	}

	pub fn state(&self) -> ConnectionState {
		*self.state.borrow()
	}

	pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
		self.state.subscribe()
	}
}
