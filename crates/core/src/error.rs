//! Error taxonomy for the gate and its collaborators.

use std::time::Duration;

use otpgate_protocol::IdentifierError;
use thiserror::Error;

/// Result type alias for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;

/// Outcomes that leave the broker as errors.
///
/// Most variants also appear as a `reason` inside a `FAILED` reply; `code()`
/// is the stable string used for both.
#[derive(Debug, Error)]
pub enum GateError {
	/// Launch or connect failed after the bounded retry window.
	#[error("could not acquire a browser for slot {slot}: {source}")]
	ResourceAcquisition {
		slot: usize,
		#[source]
		source: BackendError,
	},

	#[error("credentials were rejected by the site")]
	CredentialRejected,

	#[error("verification code was incorrect")]
	VerificationIncorrect,

	/// The verification input could not be located on the page.
	#[error("verification input is missing from the page")]
	VerificationInputMissing,

	#[error("session expired")]
	SessionExpired,

	#[error("session not found")]
	SessionNotFound,

	#[error("session is not verified")]
	SessionNotVerified,

	#[error("invalid identifier: {0}")]
	InvalidIdentifier(#[from] IdentifierError),

	/// The wait queue is at its configured limit.
	#[error("all {capacity} slots are busy and {waiting} callers are already waiting")]
	PoolSaturated { capacity: usize, waiting: usize },

	#[error("{step} did not finish within {}ms", .timeout.as_millis())]
	StepTimeout { step: &'static str, timeout: Duration },

	/// A site-script or browser step failed.
	#[error("{step} failed: {source}")]
	Script {
		step: &'static str,
		#[source]
		source: BackendError,
	},

	#[error("gate is shutting down")]
	ShuttingDown,
}

impl GateError {
	/// Stable machine-readable code.
	pub fn code(&self) -> &'static str {
		match self {
			GateError::ResourceAcquisition { .. } => "resource_acquisition",
			GateError::CredentialRejected => "credential_rejected",
			GateError::VerificationIncorrect => "verification_incorrect",
			GateError::VerificationInputMissing => "verification_input_missing",
			GateError::SessionExpired => "session_expired",
			GateError::SessionNotFound => "not_found",
			GateError::SessionNotVerified => "not_verified",
			GateError::InvalidIdentifier(_) => "invalid_identifier",
			GateError::PoolSaturated { .. } => "pool_saturated",
			GateError::StepTimeout { .. } => "step_timeout",
			GateError::Script { .. } => "script_error",
			GateError::ShuttingDown => "shutting_down",
		}
	}

	/// Wraps a collaborator error raised during `step`, keeping timeouts distinct.
	pub(crate) fn from_backend(step: &'static str, source: BackendError) -> Self {
		match source {
			BackendError::Timeout { timeout, .. } => GateError::StepTimeout { step, timeout },
			source => GateError::Script { step, source },
		}
	}
}

/// Errors raised by the backing-resource and site-script collaborators.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
	#[error("launch failed: {0}")]
	Launch(String),

	#[error("connect failed: {0}")]
	Connect(String),

	#[error("timed out after {}ms waiting for {condition}", .timeout.as_millis())]
	Timeout { condition: String, timeout: Duration },

	#[error("element not found: {0}")]
	ElementNotFound(String),

	#[error("page error: {0}")]
	Page(String),

	/// The resource was already torn down or its channel closed.
	#[error("resource is gone")]
	TornDown,
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

impl From<otpgate_runtime::Error> for BackendError {
	fn from(err: otpgate_runtime::Error) -> Self {
		use otpgate_runtime::Error as E;
		match err {
			E::ExecutableNotFound | E::LaunchFailed(_) => BackendError::Launch(err.to_string()),
			E::ConnectionFailed(_) => BackendError::Connect(err.to_string()),
			E::Timeout { ms, condition } => BackendError::Timeout {
				condition,
				timeout: Duration::from_millis(ms),
			},
			E::ElementNotFound(selector) => BackendError::ElementNotFound(selector),
			E::ChannelClosed | E::TransportError(_) => BackendError::TornDown,
			other => BackendError::Page(other.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn timeouts_become_step_timeouts() {
		let err = GateError::from_backend(
			"login",
			BackendError::Timeout {
				condition: "selector '#x'".into(),
				timeout: Duration::from_secs(5),
			},
		);
		assert_eq!(err.code(), "step_timeout");
		assert_eq!(err.to_string(), "login did not finish within 5000ms");
	}

	#[test]
	fn runtime_errors_map_to_backend_kinds() {
		let closed: BackendError = otpgate_runtime::Error::ChannelClosed.into();
		assert!(matches!(closed, BackendError::TornDown));

		let missing: BackendError = otpgate_runtime::Error::ElementNotFound("#otp".into()).into();
		assert!(matches!(missing, BackendError::ElementNotFound(ref s) if s == "#otp"));

		let timeout: BackendError = otpgate_runtime::Error::Timeout {
			ms: 250,
			condition: "load".into(),
		}
		.into();
		assert!(matches!(timeout, BackendError::Timeout { timeout, .. } if timeout == Duration::from_millis(250)));
	}

	#[test]
	fn codes_are_stable() {
		assert_eq!(GateError::SessionNotFound.code(), "not_found");
		assert_eq!(GateError::SessionNotVerified.code(), "not_verified");
		assert_eq!(GateError::PoolSaturated { capacity: 3, waiting: 8 }.code(), "pool_saturated");
		assert_eq!(GateError::InvalidIdentifier(IdentifierError::Empty).code(), "invalid_identifier");
	}
}
