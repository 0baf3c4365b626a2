//! REST client against an in-process platform stub.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use sbx_protocol::{BootupType, Permission, SandboxHandle, SandboxId};
use sbx_runtime::{Error, HttpSandboxApi, ListOptions, SandboxApi};
use serde_json::{Value, json};

const TOKEN: &str = "secret-token";

#[derive(Clone, Default)]
struct Platform {
	session_requests: Arc<Mutex<Vec<Value>>>,
	list_queries: Arc<Mutex<Vec<(u32, u32)>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
	headers
		.get(AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn unauthorized() -> Response {
	(StatusCode::UNAUTHORIZED, Json(json!({"success": false, "errors": ["invalid token"]}))).into_response()
}

async fn start(Path(id): Path<String>, headers: HeaderMap) -> Response {
	if !authorized(&headers) {
		return unauthorized();
	}
	match id.as_str() {
		"booting" => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"errors": ["sandbox is starting"]}))).into_response(),
		"refused" => Json(json!({"success": false, "errors": ["quota exceeded"], "data": null})).into_response(),
		"empty" => Json(json!({"success": true})).into_response(),
		"plain" => (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response(),
		_ => Json(json!({
			"success": true,
			"errors": [],
			"data": {"id": id, "bootup_type": "RESUME", "cluster": "eu-1"}
		}))
		.into_response(),
	}
}

async fn create_session(State(platform): State<Platform>, Path(id): Path<String>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
	if !authorized(&headers) {
		return unauthorized();
	}
	let session_id = body["session_id"].as_str().unwrap_or_default().to_string();
	platform.session_requests.lock().push(body);
	Json(json!({
		"data": {
			"session_id": session_id,
			"pitcher_url": format!("wss://{id}.sandbox.test/agent"),
			"pitcher_token": "agent-token",
			"user_workspace_path": "/project/sandbox"
		}
	}))
	.into_response()
}

#[derive(serde::Deserialize)]
struct Page {
	page: u32,
	page_size: u32,
}

async fn list(State(platform): State<Platform>, Query(page): Query<Page>, headers: HeaderMap) -> Response {
	if !authorized(&headers) {
		return unauthorized();
	}
	platform.list_queries.lock().push((page.page, page.page_size));
	Json(json!({
		"data": {
			"sandboxes": [
				{"id": "abc123", "title": "Demo", "privacy": "private", "tags": ["demo"]},
				{"id": "def456"}
			],
			"pagination": {"current_page": page.page, "next_page": null, "total_records": 2}
		}
	}))
	.into_response()
}

async fn serve(platform: Platform) -> SocketAddr {
	let app = Router::new()
		.route("/api/vm/{id}/start", post(start))
		.route("/api/vm/{id}/sessions", post(create_session))
		.route("/api/sandbox", get(list))
		.with_state(platform);
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});
	addr
}

fn client(addr: SocketAddr) -> HttpSandboxApi {
	HttpSandboxApi::builder(format!("http://{addr}/api")).token(TOKEN).build().unwrap()
}

fn id(value: &str) -> SandboxId {
	SandboxId::new(value).unwrap()
}

#[tokio::test]
async fn resume_then_create_session() {
	let platform = Platform::default();
	let addr = serve(platform.clone()).await;
	let api = client(addr);

	let handle = api.resume_sandbox(&id("abc123")).await.unwrap();
	assert_eq!(handle.id.as_str(), "abc123");
	assert_eq!(handle.bootup_type, Some(BootupType::Resume));
	assert_eq!(handle.cluster.as_deref(), Some("eu-1"));
	assert!(handle.metadata.is_empty());

	let first = api.create_session(&handle).await.unwrap();
	let second = api.create_session(&handle).await.unwrap();
	assert_ne!(first.id, second.id);
	assert_eq!(first.sandbox_id.as_str(), "abc123");
	assert_eq!(first.url, "wss://abc123.sandbox.test/agent");
	assert_eq!(first.token, "agent-token");
	assert_eq!(first.workspace_path.as_deref(), Some("/project/sandbox"));

	let requests = platform.session_requests.lock();
	assert_eq!(requests.len(), 2);
	assert_eq!(requests[0]["permission"], "write");
}

#[tokio::test]
async fn read_permission_is_forwarded() {
	let platform = Platform::default();
	let addr = serve(platform.clone()).await;
	let api = HttpSandboxApi::builder(format!("http://{addr}/api"))
		.token(TOKEN)
		.permission(Permission::Read)
		.build()
		.unwrap();

	api.create_session(&SandboxHandle::new(id("abc123"))).await.unwrap();
	assert_eq!(platform.session_requests.lock()[0]["permission"], "read");
}

#[tokio::test]
async fn lists_sandboxes_with_paging() {
	let platform = Platform::default();
	let addr = serve(platform.clone()).await;
	let api = client(addr);

	let page = api.list_sandboxes(ListOptions { page: 2, page_size: 10 }).await.unwrap();
	assert_eq!(page.sandboxes.len(), 2);
	assert_eq!(page.pagination.current_page, 2);
	assert_eq!(page.pagination.total_records, 2);
	assert_eq!(page.find(&id("abc123")).and_then(|s| s.title.as_deref()), Some("Demo"));
	assert!(page.find(&id("missing")).is_none());
	assert_eq!(*platform.list_queries.lock(), vec![(2, 10)]);
}

#[tokio::test]
async fn missing_token_surfaces_api_error() {
	let addr = serve(Platform::default()).await;
	let api = HttpSandboxApi::builder(format!("http://{addr}/api")).build().unwrap();

	match api.resume_sandbox(&id("abc123")).await {
		Err(Error::Api { status, message }) => {
			assert_eq!(status, 401);
			assert_eq!(message, "invalid token");
		}
		other => panic!("unexpected result: {other:?}"),
	}
}

#[tokio::test]
async fn starting_sandbox_is_recognised() {
	let addr = serve(Platform::default()).await;
	let err = client(addr).resume_sandbox(&id("booting")).await.unwrap_err();
	assert!(err.is_sandbox_starting());
	assert_eq!(err.to_string(), "API error (503): sandbox is starting");
}

#[tokio::test]
async fn unsuccessful_envelope_is_an_error() {
	let addr = serve(Platform::default()).await;
	let api = client(addr);

	match api.resume_sandbox(&id("refused")).await {
		Err(Error::Api { status, message }) => {
			assert_eq!(status, 200);
			assert_eq!(message, "quota exceeded");
		}
		other => panic!("unexpected result: {other:?}"),
	}

	match api.resume_sandbox(&id("empty")).await {
		Err(Error::Api { message, .. }) => assert_eq!(message, "response carried no data"),
		other => panic!("unexpected result: {other:?}"),
	}
}

#[tokio::test]
async fn non_json_error_body_is_kept_verbatim() {
	let addr = serve(Platform::default()).await;
	match client(addr).resume_sandbox(&id("plain")).await {
		Err(Error::Api { status, message }) => {
			assert_eq!(status, 502);
			assert_eq!(message, "upstream unavailable");
		}
		other => panic!("unexpected result: {other:?}"),
	}
}
