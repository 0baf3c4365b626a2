//! REST request and response bodies for the sandbox platform API.

use serde::{Deserialize, Serialize};

use crate::sandbox::{BootupType, Privacy, SandboxId, SandboxMetadata};

/// Standard response envelope wrapping every API payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
	#[serde(default = "default_success")]
	pub success: bool,
	#[serde(default)]
	pub errors: Vec<String>,
	pub data: Option<T>,
}

fn default_success() -> bool {
	true
}

impl<T> ApiEnvelope<T> {
	/// Joined error messages, or `None` when the envelope reports none.
	pub fn error_message(&self) -> Option<String> {
		if self.errors.is_empty() {
			None
		} else {
			Some(self.errors.join("; "))
		}
	}
}

/// Payload of `POST /vm/{id}/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSandboxData {
	pub id: SandboxId,
	#[serde(default)]
	pub bootup_type: Option<BootupType>,
	#[serde(default)]
	pub cluster: Option<String>,
}

/// Access level requested for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
	Read,
	#[default]
	Write,
}

/// Body of `POST /vm/{id}/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
	pub session_id: String,
	pub permission: Permission,
}

/// Payload of `POST /vm/{id}/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
	pub session_id: String,
	pub pitcher_url: String,
	pub pitcher_token: String,
	#[serde(default)]
	pub user_workspace_path: Option<String>,
}

/// One entry of `GET /sandbox`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSummary {
	pub id: SandboxId,
	#[serde(default)]
	pub title: Option<String>,
	#[serde(default)]
	pub privacy: Option<Privacy>,
	#[serde(default)]
	pub created_at: Option<String>,
	#[serde(default)]
	pub updated_at: Option<String>,
	#[serde(default)]
	pub tags: Vec<String>,
}

impl SandboxSummary {
	/// Listing fields as caller-side metadata.
	pub fn metadata(&self) -> SandboxMetadata {
		SandboxMetadata {
			title: self.title.clone(),
			privacy: self.privacy,
			created_at: self.created_at.clone(),
			updated_at: self.updated_at.clone(),
			tags: self.tags.clone(),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
	#[serde(default)]
	pub current_page: u32,
	#[serde(default)]
	pub next_page: Option<u32>,
	#[serde(default)]
	pub total_records: u64,
}

/// Payload of `GET /sandbox`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxListData {
	#[serde(default)]
	pub sandboxes: Vec<SandboxSummary>,
	#[serde(default)]
	pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn envelope_defaults_to_success() {
		let env: ApiEnvelope<StartSandboxData> = serde_json::from_str(r#"{"data": {"id": "abc123"}}"#).unwrap();
		assert!(env.success);
		assert!(env.error_message().is_none());
		assert_eq!(env.data.unwrap().id.as_str(), "abc123");
	}

	#[test]
	fn envelope_joins_errors() {
		let env: ApiEnvelope<StartSandboxData> =
			serde_json::from_str(r#"{"success": false, "errors": ["sandbox is starting", "try again"], "data": null}"#).unwrap();
		assert!(!env.success);
		assert_eq!(env.error_message().as_deref(), Some("sandbox is starting; try again"));
	}

	#[test]
	fn summary_converts_to_metadata() {
		let json = r#"{"id": "abc123", "title": "Demo", "privacy": "unlisted", "tags": ["a", "b"]}"#;
		let summary: SandboxSummary = serde_json::from_str(json).unwrap();
		let meta = summary.metadata();
		assert_eq!(meta.title.as_deref(), Some("Demo"));
		assert_eq!(meta.privacy, Some(Privacy::Unlisted));
		assert_eq!(meta.tags, vec!["a", "b"]);
	}
}
