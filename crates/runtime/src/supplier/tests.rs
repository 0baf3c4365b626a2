use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use sbx_protocol::{InitProgress, SandboxMetadata};

use super::*;
use crate::testing::{FakeApi, sandbox_id};

fn supplier_for(api: &Arc<FakeApi>, metadata: SandboxMetadata) -> SessionSupplier {
	SessionSupplier::new(Arc::clone(api) as Arc<dyn SandboxApi>, sandbox_id("abc123"), metadata, None)
}

#[tokio::test]
async fn every_call_runs_resume_and_create_session() {
	let api = FakeApi::new();
	let supplier = supplier_for(&api, SandboxMetadata::default());
	let id = sandbox_id("abc123");

	let mut ids = Vec::new();
	for _ in 0..4 {
		ids.push(supplier.get_session(&id).await.unwrap().id);
	}

	assert_eq!(api.resumes(), 4);
	assert_eq!(api.sessions(), 4);
	assert_eq!(supplier.invocations(), 4);
	ids.sort();
	ids.dedup();
	assert_eq!(ids.len(), 4, "sessions must never be reused");
}

#[tokio::test]
async fn caller_metadata_is_reattached_after_resume() {
	let api = FakeApi::new();
	let supplier = supplier_for(&api, SandboxMetadata::default().with_title("Demo").with_tags(["rust"]));

	let (handle, _) = supplier.acquire().await.unwrap();
	assert_eq!(handle.title(), Some("Demo"));
	assert_eq!(handle.metadata.tags, vec!["rust".to_string()]);

	let latest = supplier.latest_sandbox().unwrap();
	assert_eq!(latest.title(), Some("Demo"));
	assert_eq!(latest.cluster.as_deref(), Some("test-cluster"));
}

#[tokio::test]
async fn rejects_foreign_sandbox_ids() {
	let api = FakeApi::new();
	let supplier = supplier_for(&api, SandboxMetadata::default());

	let err = supplier.get_session(&sandbox_id("other")).await.unwrap_err();
	assert!(matches!(err, Error::InvalidArgument(_)));
	assert_eq!(api.resumes(), 0);
}

#[tokio::test]
async fn refuses_a_session_id_it_already_issued() {
	let api = FakeApi::new();
	*api.fixed_session_id.lock() = Some("same".to_string());
	let supplier = supplier_for(&api, SandboxMetadata::default());
	let id = sandbox_id("abc123");

	supplier.get_session(&id).await.unwrap();
	let err = supplier.get_session(&id).await.unwrap_err();
	assert!(matches!(err, Error::SessionReused(ref s) if s == "same"));
}

#[tokio::test]
async fn resume_failure_skips_session_creation() {
	let api = FakeApi::new();
	api.fail_resume.store(true, Ordering::SeqCst);
	let supplier = supplier_for(&api, SandboxMetadata::default());

	let err = supplier.get_session(&sandbox_id("abc123")).await.unwrap_err();
	assert!(err.is_sandbox_starting());
	assert_eq!(api.sessions(), 0);
	assert!(supplier.latest_sandbox().is_none());
}

#[tokio::test]
async fn reports_progress_in_order() {
	let api = FakeApi::new();
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let supplier = SessionSupplier::new(
		api as Arc<dyn SandboxApi>,
		sandbox_id("abc123"),
		SandboxMetadata::default(),
		Some(Arc::new(move |p| sink.lock().push(p))),
	);

	supplier.get_session(&sandbox_id("abc123")).await.unwrap();
	assert_eq!(*seen.lock(), vec![InitProgress::Resuming, InitProgress::SessionCreated]);
}
