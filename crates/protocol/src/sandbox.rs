//! Sandbox identity and descriptive metadata.


use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a remote sandbox.
///
/// Always non-empty and free of surrounding whitespace. Construction goes
/// through [`SandboxId::new`], and deserialization applies the same check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SandboxId(String);

impl SandboxId {
	/// Validates and wraps a sandbox identifier.
	pub fn new(id: impl Into<String>) -> Result<Self, InvalidSandboxId> {
		let id = id.into();
		let trimmed = id.trim();
		if trimmed.is_empty() {
			return Err(InvalidSandboxId);
		}
		if trimmed.len() == id.len() {
			Ok(Self(id))
		} else {
			Ok(Self(trimmed.to_string()))
		}
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SandboxId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl AsRef<str> for SandboxId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl TryFrom<String> for SandboxId {
	type Error = InvalidSandboxId;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl TryFrom<&str> for SandboxId {
	type Error = InvalidSandboxId;

	fn try_from(value: &str) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl std::str::FromStr for SandboxId {
	type Err = InvalidSandboxId;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}

impl From<SandboxId> for String {
	fn from(id: SandboxId) -> Self {
		id.0
	}
}

/// Returned when a sandbox identifier is empty or whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidSandboxId;

impl fmt::Display for InvalidSandboxId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("sandbox id must not be empty")
	}
}

impl std::error::Error for InvalidSandboxId {}

/// Who can see a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
	Public,
	Unlisted,
	Private,
}

/// How the platform brought a sandbox up when it was resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BootupType {
	/// Already running; nothing was restored.
	Running,
	/// Booted from scratch.
	Clean,
	/// Restored from a hibernation snapshot.
	Resume,
	/// Forked from another sandbox.
	Fork,
}

/// Descriptive fields a caller usually gets from a sandbox listing.
///
/// The resume endpoint does not echo these back, so they are carried on the
/// caller side and re-attached with [`SandboxMetadata::overlay_missing`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxMetadata {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub privacy: Option<Privacy>,
	/// RFC 3339 creation timestamp.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<String>,
	/// RFC 3339 last-update timestamp.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tags: Vec<String>,
}

impl SandboxMetadata {
	pub fn with_title(mut self, title: impl Into<String>) -> Self {
		self.title = Some(title.into());
		self
	}

	pub fn with_tags<I, S>(mut self, tags: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.tags = tags.into_iter().map(Into::into).collect();
		self
	}

	/// Fills every field missing on `self` from `caller`.
	///
	/// Values already present (i.e. returned by the platform) are kept.
	pub fn overlay_missing(&mut self, caller: &SandboxMetadata) {
		if self.title.is_none() {
			self.title.clone_from(&caller.title);
		}
		if self.privacy.is_none() {
			self.privacy = caller.privacy;
		}
		if self.created_at.is_none() {
			self.created_at.clone_from(&caller.created_at);
		}
		if self.updated_at.is_none() {
			self.updated_at.clone_from(&caller.updated_at);
		}
		if self.tags.is_empty() {
			self.tags.clone_from(&caller.tags);
		}
	}

	pub fn is_empty(&self) -> bool {
		self == &SandboxMetadata::default()
	}
}

/// A resolved sandbox: its identifier plus the metadata known about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle {
	pub id: SandboxId,
	#[serde(flatten)]
	pub metadata: SandboxMetadata,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bootup_type: Option<BootupType>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cluster: Option<String>,
}

impl SandboxHandle {
	pub fn new(id: SandboxId) -> Self {
		Self {
			id,
			metadata: SandboxMetadata::default(),
			bootup_type: None,
			cluster: None,
		}
	}

	/// Returns the handle with caller-side metadata re-attached.
	pub fn with_metadata_overlay(mut self, caller: &SandboxMetadata) -> Self {
		self.metadata.overlay_missing(caller);
		self
	}

	pub fn title(&self) -> Option<&str> {
		self.metadata.title.as_deref()
	}
}
