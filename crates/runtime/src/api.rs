//! The sandbox platform API as seen by the connection manager.

use async_trait::async_trait;
use sbx_protocol::{Pagination, SandboxHandle, SandboxId, SandboxSummary, Session};

use crate::error::Result;

/// Remote calls the connection workflow depends on.
///
/// Implemented over HTTP by [`HttpSandboxApi`](crate::HttpSandboxApi); tests
/// substitute in-memory fakes.
#[async_trait]
pub trait SandboxApi: Send + Sync {
	/// Wakes the sandbox if it is hibernated. Idempotent: safe to call on a
	/// running sandbox and safe to retry.
	async fn resume_sandbox(&self, id: &SandboxId) -> Result<SandboxHandle>;

	/// Issues a brand-new session for a resumed sandbox.
	async fn create_session(&self, sandbox: &SandboxHandle) -> Result<Session>;

	/// Lists sandboxes visible to the caller.
	async fn list_sandboxes(&self, options: ListOptions) -> Result<SandboxPage>;
}

/// Paging parameters for [`SandboxApi::list_sandboxes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
	pub page: u32,
	pub page_size: u32,
}

impl Default for ListOptions {
	fn default() -> Self {
		Self { page: 1, page_size: 50 }
	}
}

/// One page of sandbox listings.
#[derive(Debug, Clone, Default)]
pub struct SandboxPage {
	pub sandboxes: Vec<SandboxSummary>,
	pub pagination: Pagination,
}

impl SandboxPage {
	pub fn find(&self, id: &SandboxId) -> Option<&SandboxSummary> {
		self.sandboxes.iter().find(|s| &s.id == id)
	}
}
