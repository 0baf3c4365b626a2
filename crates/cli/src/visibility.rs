//! Host visibility binding for an interactive terminal.
//!
//! A terminal has no focus events, but a process resumed after `Ctrl-Z` (SIGCONT)
//! has been away exactly like a hidden window. Each resume is reported as
//! `Hidden` followed by `Visible`, which prompts the transport to verify its socket.

use std::sync::Arc;

use sbx_runtime::{ManualVisibility, VisibilitySource};
use tokio::task::JoinHandle;
use tracing::debug;

pub struct TerminalVisibility {
	source: ManualVisibility,
	watcher: Option<JoinHandle<()>>,
}

impl TerminalVisibility {
	/// Starts watching for SIGCONT. Must run inside a tokio runtime.
	#[cfg(unix)]
	pub fn install() -> std::io::Result<Self> {
		use tokio::signal::unix::{SignalKind, signal};

		let mut resumed = signal(SignalKind::from_raw(libc::SIGCONT))?;
		let source = ManualVisibility::new();
		let target = source.clone();
		let watcher = tokio::spawn(async move {
			while resumed.recv().await.is_some() {
				debug!(target: "sbx.cli", "resumed from suspension");
				target.hide();
				target.show();
			}
		});

		Ok(Self {
			source,
			watcher: Some(watcher),
		})
	}

	/// Non-unix terminals never report a visibility change.
	#[cfg(not(unix))]
	pub fn install() -> std::io::Result<Self> {
		Ok(Self {
			source: ManualVisibility::new(),
			watcher: None,
		})
	}

	pub fn source(&self) -> Arc<dyn VisibilitySource> {
		Arc::new(self.source.clone())
	}

	pub fn handle(&self) -> &ManualVisibility {
		&self.source
	}
}

impl Drop for TerminalVisibility {
	fn drop(&mut self) {
		if let Some(watcher) = self.watcher.take() {
			watcher.abort();
		}
	}
}
