//! JSON frames exchanged with the sandbox agent over a live client socket.
//!
//! Requests carry a sequential `id` and are answered by exactly one response
//! with the same `id`. Notifications carry no `id` and are pushed by the
//! agent at any time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request sent to the sandbox agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
	pub id: u32,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Response correlated to an [`RpcRequest`] by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
	pub id: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<RpcError>,
}

/// Error payload of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
	#[serde(default)]
	pub code: i64,
	pub message: String,
}

/// Unsolicited message pushed by the sandbox agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcNotification {
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Discriminated union of inbound frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcMessage {
	/// Response message (has `id` field)
	Response(RpcResponse),
	/// Notification message (no `id` field)
	Notification(RpcNotification),
	/// Unknown frame (forward-compatible catch-all)
	Unknown(Value),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn response_frames_parse_as_responses() {
		let message: RpcMessage = serde_json::from_str(r#"{"id": 7, "result": {"ok": true}}"#).unwrap();
		match message {
			RpcMessage::Response(response) => {
				assert_eq!(response.id, 7);
				assert_eq!(response.result.unwrap()["ok"], true);
				assert!(response.error.is_none());
			}
			other => panic!("Expected Response, got {other:?}"),
		}
	}

	#[test]
	fn notification_frames_parse_as_notifications() {
		let message: RpcMessage = serde_json::from_str(r#"{"method": "shell/out", "params": {"data": "hi"}}"#).unwrap();
		match message {
			RpcMessage::Notification(note) => {
				assert_eq!(note.method, "shell/out");
				assert_eq!(note.params["data"], "hi");
			}
			other => panic!("Expected Notification, got {other:?}"),
		}
	}

	#[test]
	fn unrecognized_frames_are_kept() {
		let message: RpcMessage = serde_json::from_str(r#"{"hello": "world"}"#).unwrap();
		assert!(matches!(message, RpcMessage::Unknown(_)));
	}
}
