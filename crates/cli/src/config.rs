//! Persistent CLI configuration and flag/env/file precedence.
//!
//! Resolution order: CLI flags > environment > config file > defaults.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sbx_runtime::ReconnectPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

pub const DEFAULT_API_URL: &str = "https://api.codesandbox.io";
pub const API_URL_ENV: &str = "SBX_API_URL";
pub const API_TOKEN_ENV: &str = "SBX_API_TOKEN";

const DEFAULT_HEALTH_CHECK_TIMEOUT_MS: u64 = 5_000;

/// Contents of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub api_url: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub api_token: Option<String>,
	pub reconnect: ReconnectConfig,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub health_check_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
	pub max_attempts: u32,
	pub initial_backoff_ms: u64,
	pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
	fn default() -> Self {
		let policy = ReconnectPolicy::default();
		Self {
			max_attempts: policy.max_attempts,
			initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
			max_backoff_ms: policy.max_backoff.as_millis() as u64,
		}
	}
}

impl ReconnectConfig {
	pub fn policy(&self) -> ReconnectPolicy {
		ReconnectPolicy {
			max_attempts: self.max_attempts,
			initial_backoff: Duration::from_millis(self.initial_backoff_ms),
			max_backoff: Duration::from_millis(self.max_backoff_ms),
		}
	}
}

/// `$XDG_CONFIG_HOME/sbx/config.json`, falling back to `~/.config/sbx/config.json`.
pub fn default_config_path() -> PathBuf {
	let config_home = std::env::var_os("XDG_CONFIG_HOME")
		.filter(|v| !v.is_empty())
		.map(PathBuf::from)
		.or_else(|| dirs::home_dir().map(|h| h.join(".config")))
		.unwrap_or_else(|| PathBuf::from("."));
	config_home.join("sbx").join("config.json")
}

impl Config {
	/// Loads `path`; a missing file yields defaults, a malformed one is an error.
	pub fn load(path: &Path) -> Result<Self> {
		let content = match fs::read_to_string(path) {
			Ok(content) => content,
			Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
			Err(source) => {
				return Err(CliError::ConfigRead {
					path: path.to_path_buf(),
					source,
				});
			}
		};
		serde_json::from_str(&content).map_err(|source| CliError::ConfigParse {
			path: path.to_path_buf(),
			source,
		})
	}
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
	pub api_url: Option<String>,
	pub api_token: Option<String>,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
	pub api_url: String,
	pub api_token: Option<String>,
	pub reconnect: ReconnectPolicy,
	pub health_check_timeout: Duration,
}

impl Settings {
	/// Merges flags, environment (looked up through `env`) and file config.
	pub fn resolve(config: Config, overrides: Overrides, env: impl Fn(&str) -> Option<String>) -> Self {
		let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

		let api_url = overrides
			.api_url
			.or_else(|| env(API_URL_ENV))
			.or(config.api_url)
			.unwrap_or_else(|| DEFAULT_API_URL.to_string());
		let api_token = overrides.api_token.or_else(|| env(API_TOKEN_ENV)).or(config.api_token);

		Self {
			api_url,
			api_token,
			reconnect: config.reconnect.policy(),
			health_check_timeout: Duration::from_millis(config.health_check_timeout_ms.unwrap_or(DEFAULT_HEALTH_CHECK_TIMEOUT_MS)),
		}
	}
}
