//! Error types for the sandbox runtime.

use std::fmt;

use sbx_protocol::InvalidSandboxId;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur talking to the sandbox platform.
#[derive(Debug, Error)]
pub enum Error {
	/// The platform API answered with an error status or a failed envelope.
	#[error("API error ({status}): {message}")]
	Api { status: u16, message: String },

	/// HTTP-level failure reaching the platform API.
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	/// WebSocket handshake or framing failure.
	#[error("WebSocket error: {0}")]
	WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Invalid argument provided to a method.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	#[error(transparent)]
	InvalidSandboxId(#[from] InvalidSandboxId),

	/// The platform handed out a session id that was already issued.
	#[error("Session {0} was already issued; refusing to reuse it")]
	SessionReused(String),

	/// The live socket is gone (dropped, reconnecting, or closed).
	#[error("Disconnected from sandbox")]
	Disconnected,

	/// Channel closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Timeout waiting for an operation.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// Error frame returned by the sandbox agent.
	#[error("Remote error {code}: {message}")]
	Remote { code: i64, message: String },

	/// The operation was superseded before it settled.
	#[error("Cancelled: {0}")]
	Cancelled(String),

	#[error("{0}")]
	Other(String),
}

impl Error {
	/// Coarse classification used when nothing more specific is known.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::Api { .. } | Error::Http(_) | Error::SessionReused(_) | Error::InvalidSandboxId(_) => ErrorKind::Session,
			Error::WebSocket(_) | Error::Io(_) | Error::Disconnected | Error::ChannelClosed | Error::Timeout(_) => ErrorKind::Transport,
			Error::Json(_) | Error::InvalidArgument(_) | Error::Remote { .. } | Error::Cancelled(_) | Error::Other(_) => ErrorKind::Unknown,
		}
	}

	/// Returns true for API errors the platform reports while a sandbox is still booting.
	pub fn is_sandbox_starting(&self) -> bool {
		matches!(self, Error::Api { status: 409 | 503, .. })
	}
}

/// Coarse failure classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Resume or session creation failed, typically because the sandbox is still starting.
	Session,
	/// Network or WebSocket-level failure.
	Transport,
	Unknown,
}

impl ErrorKind {
	pub fn as_str(self) -> &'static str {
		match self {
			ErrorKind::Session => "session",
			ErrorKind::Transport => "transport",
			ErrorKind::Unknown => "unknown",
		}
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Failure of [`ConnectionManager::connect`](crate::ConnectionManager::connect).
///
/// The kind reflects the step that failed, not the underlying error type:
/// anything going wrong during resume or session creation is a session
/// error, anything during the transport open is a transport error.
#[derive(Debug, Error)]
#[error("{kind} error: {source}")]
pub struct ConnectionError {
	kind: ErrorKind,
	#[source]
	source: Error,
}

impl ConnectionError {
	pub fn new(kind: ErrorKind, source: Error) -> Self {
		Self { kind, source }
	}

	pub fn session(source: Error) -> Self {
		Self::new(ErrorKind::Session, source)
	}

	pub fn transport(source: Error) -> Self {
		Self::new(ErrorKind::Transport, source)
	}

	pub fn unknown(source: Error) -> Self {
		Self::new(ErrorKind::Unknown, source)
	}

	pub fn kind(&self) -> ErrorKind {
		self.kind
	}

	pub fn source_error(&self) -> &Error {
		&self.source
	}

	pub fn into_source(self) -> Error {
		self.source
	}
}

impl From<Error> for ConnectionError {
	fn from(source: Error) -> Self {
		Self::new(source.kind(), source)
	}
}
