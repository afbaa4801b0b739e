//! Per-session authentication state.

use std::fmt;

/// Where a login session is in the two-phase protocol.
///
/// Only `NeedOtp` and `Verified` are ever stored; the others describe
/// in-flight or terminal outcomes and mark an entry for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthState {
	PendingCredentials,
	NeedOtp,
	Verified,
	Consumed,
	Failed,
	Expired,
}

impl AuthState {
	pub fn is_terminal(self) -> bool {
		matches!(self, AuthState::Consumed | AuthState::Failed | AuthState::Expired)
	}

	/// Whether moving from `self` to `next` is a legal step.
	pub fn can_transition_to(self, next: AuthState) -> bool {
		use AuthState::*;
		match (self, next) {
			(_, Expired) => !self.is_terminal(),
			(PendingCredentials, NeedOtp | Failed) => true,
			(NeedOtp, NeedOtp | Verified | Failed) => true,
			(Verified, Consumed) => true,
			_ => false,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			AuthState::PendingCredentials => "PENDING_CREDENTIALS",
			AuthState::NeedOtp => "NEED_OTP",
			AuthState::Verified => "VERIFIED",
			AuthState::Consumed => "CONSUMED",
			AuthState::Failed => "FAILED",
			AuthState::Expired => "EXPIRED",
		}
	}
}

impl fmt::Display for AuthState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
