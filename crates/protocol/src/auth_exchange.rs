//! Request and reply shapes for the two-phase login exchange.
//!
//! The exchange is:
//!
//! 1. Caller posts [`CredentialsRequest`]; the reply is an [`AuthReply`] in
//!    state `NEED_OTP` (with an identifier), `SUCCESS` (with a result), or
//!    `FAILED`.
//! 2. While `NEED_OTP`, the caller may post [`IdentifierRequest`] to resend the
//!    code ([`ResendReply`]) and [`OtpRequest`] to verify it ([`OtpReply`]).
//! 3. Once `VERIFIED`, the caller posts [`IdentifierRequest`] to consume the
//!    session exactly once and receives [`AccountDetails`].
//!
//! Identifiers arrive as raw [`Value`]s so the server can reject any shape
//! other than a plain string with a typed error (see
//! [`SessionId::from_value`]).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::account::AccountDetails;
use crate::identifier::SessionId;

/// First-phase login payload.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialsRequest {
	pub id: String,
	#[serde(alias = "pin", alias = "password")]
	pub secret: String,
}

impl fmt::Debug for CredentialsRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CredentialsRequest")
			.field("id", &self.id)
			.field("secret", &"<redacted>")
			.finish()
	}
}

/// Payload carrying only an identifier (resend and consume).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierRequest {
	#[serde(default)]
	pub identifier: Value,
}

/// Second-phase verification payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpRequest {
	#[serde(default)]
	pub identifier: Value,
	#[serde(alias = "otp")]
	pub code: String,
}

/// Outcome of a credential submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialState {
	NeedOtp,
	Failed,
	Success,
}

/// Reply to [`CredentialsRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthReply {
	pub state: CredentialState,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub identifier: Option<SessionId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<AccountDetails>,
	/// Machine-readable failure code when `state` is `FAILED`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

impl AuthReply {
	pub fn need_otp(identifier: SessionId) -> Self {
		Self {
			state: CredentialState::NeedOtp,
			identifier: Some(identifier),
			result: None,
			reason: None,
		}
	}

	pub fn success(result: AccountDetails) -> Self {
		Self {
			state: CredentialState::Success,
			identifier: None,
			result: Some(result),
			reason: None,
		}
	}

	pub fn failed(reason: impl Into<String>) -> Self {
		Self {
			state: CredentialState::Failed,
			identifier: None,
			result: None,
			reason: Some(reason.into()),
		}
	}
}

/// Reply to a resend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResendReply {
	pub ok: bool,
}

/// Outcome of an OTP submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtpState {
	Verified,
	Retry,
	Failed,
	Invalid,
}

/// Reply to [`OtpRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpReply {
	pub state: OtpState,
	/// Attempts left before the session fails; present on `RETRY`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub attempts_remaining: Option<u32>,
}

/// Point-in-time occupancy of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateStatus {
	pub capacity: usize,
	pub occupied: usize,
	pub waiting: usize,
	pub sessions: usize,
}

/// Error envelope returned with non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
	pub code: String,
	pub message: String,
}
