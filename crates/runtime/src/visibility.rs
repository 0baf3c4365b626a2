//! Host visibility signals used as reconnection triggers.
//!
//! A [`VisibilitySource`] reports when the host environment moves between
//! foreground and background (a browser tab, a suspended terminal job, a
//! minimized window). The connection manager bridges these signals to the
//! live transport so it can verify the socket after the host comes back.


use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Whether the host environment is currently in the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
	Visible,
	Hidden,
}

/// Listener invoked on every visibility change.
pub type VisibilityCallback = Arc<dyn Fn(Visibility) + Send + Sync>;

/// Source of host visibility changes.
pub trait VisibilitySource: Send + Sync {
	/// Registers `callback`; it stays registered until the returned
	/// [`Subscription`] is unsubscribed.
	fn subscribe(&self, callback: VisibilityCallback) -> Subscription;

	/// Visibility right now, used to seed listeners registered while hidden.
	fn current(&self) -> Visibility;
}

/// Handle that removes a registered listener.
///
/// Clones share state: the removal runs at most once no matter how many
/// clones call [`unsubscribe`](Self::unsubscribe). Dropping a handle does
/// not unsubscribe.
#[derive(Clone)]
pub struct Subscription {
	inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
	active: AtomicBool,
	remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
	pub fn new(remove: impl FnOnce() + Send + 'static) -> Self {
		Self {
			inner: Arc::new(SubscriptionInner {
				active: AtomicBool::new(true),
				remove: Mutex::new(Some(Box::new(remove))),
			}),
		}
	}

	/// A subscription with nothing to remove.
	pub fn noop() -> Self {
		Self::new(|| {})
	}

	/// Removes the listener. Returns true if this call performed the removal.
	pub fn unsubscribe(&self) -> bool {
		if !self.inner.active.swap(false, Ordering::AcqRel) {
			return false;
		}
		let remove = self.inner.remove.lock().take();
		if let Some(remove) = remove {
			remove();
		}
		true
	}

	pub fn is_active(&self) -> bool {
		self.inner.active.load(Ordering::Acquire)
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription").field("active", &self.is_active()).finish()
	}
}

/// Visibility source driven explicitly by its owner.
///
/// Hosts without a native signal call [`show`](Self::show) and
/// [`hide`](Self::hide) themselves; tests use it as a fireable fake.
#[derive(Clone)]
pub struct ManualVisibility {
	inner: Arc<Mutex<ManualState>>,
}

struct ManualState {
	next_id: u64,
	current: Visibility,
	listeners: BTreeMap<u64, VisibilityCallback>,
}

impl Default for ManualVisibility {
	fn default() -> Self {
		Self::new()
	}
}

impl ManualVisibility {
	/// Creates a source that starts out visible.
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Mutex::new(ManualState {
				next_id: 0,
				current: Visibility::Visible,
				listeners: BTreeMap::new(),
			})),
		}
	}

	pub fn current(&self) -> Visibility {
		self.inner.lock().current
	}

	/// Records the new state and notifies every listener.
	///
	/// Listeners run on the caller's thread, outside the internal lock.
	pub fn set_visibility(&self, visibility: Visibility) {
		let listeners: Vec<VisibilityCallback> = {
			let mut state = self.inner.lock();
			state.current = visibility;
			state.listeners.values().cloned().collect()
		};
		for listener in listeners {
			listener(visibility);
		}
	}

	pub fn show(&self) {
		self.set_visibility(Visibility::Visible);
	}

	pub fn hide(&self) {
		self.set_visibility(Visibility::Hidden);
	}

	pub fn listener_count(&self) -> usize {
		self.inner.lock().listeners.len()
	}
}

impl VisibilitySource for ManualVisibility {
	fn subscribe(&self, callback: VisibilityCallback) -> Subscription {
		let id = {
			let mut state = self.inner.lock();
			let id = state.next_id;
			state.next_id += 1;
			state.listeners.insert(id, callback);
			id
		};

		let weak = Arc::downgrade(&self.inner);
		Subscription::new(move || {
			if let Some(inner) = weak.upgrade() {
				inner.lock().listeners.remove(&id);
			}
		})
	}

	fn current(&self) -> Visibility {
		ManualVisibility::current(self)
	}
}
