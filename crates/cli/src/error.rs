use std::path::PathBuf;

use sbx_runtime::{ConnectionError, ErrorKind};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("failed to read config {}: {source}", .path.display())]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config {}: {source}", .path.display())]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("--params is not valid JSON: {0}")]
	InvalidParams(#[source] serde_json::Error),

	#[error("connection failed ({}): {}", .0.kind(), .0.source_error())]
	Connection(#[from] ConnectionError),

	#[error("connection lost ({0}); connect again to continue")]
	ConnectionLost(ErrorKind),

	#[error(transparent)]
	Runtime(#[from] sbx_runtime::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}
