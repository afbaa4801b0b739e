//! Opaque session identifier used across the API boundary.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Longest identifier accepted from callers.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Reasons an inbound identifier is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
	#[error("identifier is missing")]
	Missing,

	#[error("identifier must be a string, got {0}")]
	WrongShape(&'static str),

	#[error("identifier is empty")]
	Empty,

	#[error("identifier exceeds {MAX_IDENTIFIER_LEN} characters")]
	TooLong,

	#[error("identifier contains invalid character {0:?}")]
	InvalidCharacter(char),
}

/// Opaque, globally unique session token.
///
/// Issued when a credential submission needs a second factor. Callers hand it
/// back verbatim; the only accepted wire shape is a JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
	/// Generates a fresh random identifier.
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().simple().to_string())
	}

	/// Validates a caller-supplied identifier string.
	pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
		let raw = raw.trim();
		if raw.is_empty() {
			return Err(IdentifierError::Empty);
		}
		if raw.len() > MAX_IDENTIFIER_LEN {
			return Err(IdentifierError::TooLong);
		}
		if let Some(bad) = raw.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_')) {
			return Err(IdentifierError::InvalidCharacter(bad));
		}
		Ok(Self(raw.to_string()))
	}

	/// Normalizes a raw JSON value into an identifier.
	///
	/// Only strings are accepted. Objects wrapping an identifier, numbers,
	/// arrays and `null` are rejected with [`IdentifierError::WrongShape`].
	pub fn from_value(value: &Value) -> Result<Self, IdentifierError> {
		match value {
			Value::String(s) => Self::parse(s),
			Value::Null => Err(IdentifierError::Missing),
			Value::Bool(_) => Err(IdentifierError::WrongShape("boolean")),
			Value::Number(_) => Err(IdentifierError::WrongShape("number")),
			Value::Array(_) => Err(IdentifierError::WrongShape("array")),
			Value::Object(_) => Err(IdentifierError::WrongShape("object")),
		}
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for SessionId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;
		SessionId::parse(&raw).map_err(serde::de::Error::custom)
	}
}
