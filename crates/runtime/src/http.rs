//! HTTP client for the sandbox platform REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Url};
use sbx_protocol::{
	ApiEnvelope, CreateSessionRequest, Permission, SandboxHandle, SandboxId, SandboxListData, SandboxMetadata, Session, SessionData,
	StartSandboxData,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::api::{ListOptions, SandboxApi, SandboxPage};
use crate::error::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`SandboxApi`] over the platform's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpSandboxApi {
	client: reqwest::Client,
	base_url: Url,
	token: Option<String>,
	permission: Permission,
}

/// Builder for [`HttpSandboxApi`].
#[derive(Debug, Clone)]
pub struct HttpSandboxApiBuilder {
	base_url: String,
	token: Option<String>,
	timeout: Duration,
	permission: Permission,
}

impl HttpSandboxApiBuilder {
	/// Bearer token sent with every request.
	pub fn token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());
		self
	}

	/// Per-request timeout (default 30s).
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	/// Permission requested for new sessions (default write).
	pub fn permission(mut self, permission: Permission) -> Self {
		self.permission = permission;
		self
	}

	pub fn build(self) -> Result<HttpSandboxApi> {
		let base_url = Url::parse(&self.base_url).map_err(|e| Error::InvalidArgument(format!("invalid API base URL '{}': {}", self.base_url, e)))?;
		if base_url.cannot_be_a_base() {
			return Err(Error::InvalidArgument(format!("API base URL '{}' cannot be a base", self.base_url)));
		}

		let client = reqwest::Client::builder()
			.timeout(self.timeout)
			.user_agent(concat!("sbx/", env!("CARGO_PKG_VERSION")))
			.build()?;

		Ok(HttpSandboxApi {
			client,
			base_url,
			token: self.token,
			permission: self.permission,
		})
	}
}

impl HttpSandboxApi {
	pub fn builder(base_url: impl Into<String>) -> HttpSandboxApiBuilder {
		HttpSandboxApiBuilder {
			base_url: base_url.into(),
			token: None,
			timeout: DEFAULT_TIMEOUT,
			permission: Permission::default(),
		}
	}

	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	fn endpoint(&self, segments: &[&str]) -> Result<Url> {
		let mut url = self.base_url.clone();
		url.path_segments_mut()
			.map_err(|_| Error::InvalidArgument(format!("API base URL '{}' cannot be a base", self.base_url)))?
			.pop_if_empty()
			.extend(segments);
		Ok(url)
	}

	async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
		let request = match &self.token {
			Some(token) => request.bearer_auth(token),
			None => request,
		};

		let response = request.send().await?;
		let status = response.status();
		let body = response.text().await?;

		if !status.is_success() {
			return Err(Error::Api {
				status: status.as_u16(),
				message: error_message_from_body(&body, status.canonical_reason()),
			});
		}

		let envelope: ApiEnvelope<T> = serde_json::from_str(&body)?;
		if !envelope.success {
			return Err(Error::Api {
				status: status.as_u16(),
				message: envelope.error_message().unwrap_or_else(|| "request was not successful".to_string()),
			});
		}

		envelope.data.ok_or_else(|| Error::Api {
			status: status.as_u16(),
			message: "response carried no data".to_string(),
		})
	}
}

fn error_message_from_body(body: &str, reason: Option<&str>) -> String {
	if let Some(message) = serde_json::from_str::<ApiEnvelope<Value>>(body).ok().and_then(|e| e.error_message()) {
		return message;
	}
	let trimmed = body.trim();
	if trimmed.is_empty() {
		reason.unwrap_or("empty response").to_string()
	} else {
		trimmed.to_string()
	}
}

#[async_trait]
impl SandboxApi for HttpSandboxApi {
	async fn resume_sandbox(&self, id: &SandboxId) -> Result<SandboxHandle> {
		let url = self.endpoint(&["vm", id.as_str(), "start"])?;
		debug!(target: "sbx.api", sandbox = %id, "resuming sandbox");

		let data: StartSandboxData = self.send(self.client.post(url).json(&serde_json::json!({}))).await?;

		Ok(SandboxHandle {
			id: data.id,
			metadata: SandboxMetadata::default(),
			bootup_type: data.bootup_type,
			cluster: data.cluster,
		})
	}

	async fn create_session(&self, sandbox: &SandboxHandle) -> Result<Session> {
		let url = self.endpoint(&["vm", sandbox.id.as_str(), "sessions"])?;
		let body = CreateSessionRequest {
			session_id: uuid::Uuid::new_v4().to_string(),
			permission: self.permission,
		};
		debug!(target: "sbx.api", sandbox = %sandbox.id, session = %body.session_id, "creating session");

		let data: SessionData = self.send(self.client.post(url).json(&body)).await?;

		Ok(Session {
			id: data.session_id,
			sandbox_id: sandbox.id.clone(),
			url: data.pitcher_url,
			token: data.pitcher_token,
			workspace_path: data.user_workspace_path,
		})
	}

	async fn list_sandboxes(&self, options: ListOptions) -> Result<SandboxPage> {
		let url = self.endpoint(&["sandbox"])?;
		let request = self
			.client
			.get(url)
			.query(&[("page", options.page), ("page_size", options.page_size)]);

		let data: SandboxListData = self.send(request).await?;
		Ok(SandboxPage {
			sandboxes: data.sandboxes,
			pagination: data.pagination,
		})
	}
}
