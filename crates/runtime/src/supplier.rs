//! Repeatable resume + create-session sequence handed to transports.

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sbx_protocol::{InitProgress, SandboxHandle, SandboxId, SandboxMetadata, Session};
use tracing::{debug, warn};

use crate::api::SandboxApi;
use crate::error::{Error, Result};
use crate::transport::ProgressHook;

/// Produces a fresh session for one sandbox, as many times as asked.
///
/// Every call resumes the sandbox first (it may have hibernated since the
/// last call) and then creates a new session. Nothing is cached between
/// calls, and a session id the platform already issued is rejected.
///
/// Cheap to clone; clones share counters and the latest resolved handle.
#[derive(Clone)]
pub struct SessionSupplier {
	inner: Arc<SupplierInner>,
}

struct SupplierInner {
	api: Arc<dyn SandboxApi>,
	sandbox_id: SandboxId,
	metadata: SandboxMetadata,
	progress: Option<ProgressHook>,
	latest: Mutex<Option<SandboxHandle>>,
	issued: Mutex<HashSet<String>>,
	invocations: AtomicU64,
}

impl SessionSupplier {
	/// `metadata` is the caller's listing data, re-attached after every resume.
	pub fn new(api: Arc<dyn SandboxApi>, sandbox_id: SandboxId, metadata: SandboxMetadata, progress: Option<ProgressHook>) -> Self {
		Self {
			inner: Arc::new(SupplierInner {
				api,
				sandbox_id,
				metadata,
				progress,
				latest: Mutex::new(None),
				issued: Mutex::new(HashSet::new()),
				invocations: AtomicU64::new(0),
			}),
		}
	}

	/// Resumes `id` and issues a new session for it.
	///
	/// `id` must be the sandbox this supplier was built for.
	pub async fn get_session(&self, id: &SandboxId) -> Result<Session> {
		if id != &self.inner.sandbox_id {
			return Err(Error::InvalidArgument(format!(
				"session supplier for sandbox {} cannot issue sessions for {}",
				self.inner.sandbox_id, id
			)));
		}
		let (_, session) = self.acquire().await?;
		Ok(session)
	}

	/// Runs resume then create-session, returning the resolved handle too.
	pub(crate) async fn acquire(&self) -> Result<(SandboxHandle, Session)> {
		let inner = &self.inner;
		let attempt = inner.invocations.fetch_add(1, Ordering::SeqCst) + 1;

		self.report(InitProgress::Resuming);
		debug!(target: "sbx.supplier", sandbox = %inner.sandbox_id, attempt, "resuming sandbox");
		let handle = inner
			.api
			.resume_sandbox(&inner.sandbox_id)
			.await?
			.with_metadata_overlay(&inner.metadata);
		*inner.latest.lock() = Some(handle.clone());

		let session = inner.api.create_session(&handle).await?;
		if !inner.issued.lock().insert(session.id.clone()) {
			warn!(target: "sbx.supplier", sandbox = %inner.sandbox_id, session = %session.id, "platform returned a previously issued session");
			return Err(Error::SessionReused(session.id));
		}

		debug!(
			target: "sbx.supplier",
			sandbox = %inner.sandbox_id,
			session = %session.id,
			bootup = ?handle.bootup_type,
			"session created"
		);
		self.report(InitProgress::SessionCreated);
		Ok((handle, session))
	}

	fn report(&self, progress: InitProgress) {
		if let Some(hook) = &self.inner.progress {
			hook(progress);
		}
	}

	pub fn sandbox_id(&self) -> &SandboxId {
		&self.inner.sandbox_id
	}

	/// Most recent handle returned by a successful resume, metadata overlaid.
	pub fn latest_sandbox(&self) -> Option<SandboxHandle> {
		self.inner.latest.lock().clone()
	}

	/// Number of times a session has been requested.
	pub fn invocations(&self) -> u64 {
		self.inner.invocations.load(Ordering::SeqCst)
	}
}

impl fmt::Debug for SessionSupplier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionSupplier")
			.field("sandbox_id", &self.inner.sandbox_id)
			.field("invocations", &self.invocations())
			.finish_non_exhaustive()
	}
}
