//! Session credentials and connection progress events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sandbox::SandboxId;

/// Short-lived credential authorizing one live connection to a sandbox.
///
/// Deliberately not `Clone`: a session is handed to exactly one open step
/// and a reconnect always asks the platform for a new one.
#[derive(Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
	/// Client-chosen session identifier, unique per issue.
	pub id: String,
	pub sandbox_id: SandboxId,
	/// WebSocket endpoint of the sandbox agent.
	pub url: String,
	/// Bearer token for `url`.
	pub token: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub workspace_path: Option<String>,
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.id)
			.field("sandbox_id", &self.sandbox_id)
			.field("url", &self.url)
			.field("token", &"<redacted>")
			.field("workspace_path", &self.workspace_path)
			.finish()
	}
}

/// Coarse-grained lifecycle events reported while a connection comes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitProgress {
	/// The sandbox is being resumed (woken from hibernation if needed).
	Resuming,
	/// A fresh session was issued for the resumed sandbox.
	SessionCreated,
	/// The transport is dialing the sandbox agent.
	Opening,
	/// The live client is open.
	Connected,
}

impl InitProgress {
	pub fn as_str(self) -> &'static str {
		match self {
			InitProgress::Resuming => "resuming",
			InitProgress::SessionCreated => "session-created",
			InitProgress::Opening => "opening",
			InitProgress::Connected => "connected",
		}
	}
}

impl fmt::Display for InitProgress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
