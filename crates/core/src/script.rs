//! Site-script contract: how a login page is driven.

use std::fmt;

use async_trait::async_trait;
use otpgate_protocol::{AccountDetails, CredentialsRequest};

use crate::error::BackendResult;
use crate::resource::PageDriver;

/// First-factor credentials.
#[derive(Clone)]
pub struct Credentials {
	pub id: String,
	pub secret: String,
}

impl Credentials {
	pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			secret: secret.into(),
		}
	}
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials")
			.field("id", &self.id)
			.field("secret", &"<redacted>")
			.finish()
	}
}

impl From<CredentialsRequest> for Credentials {
	fn from(req: CredentialsRequest) -> Self {
		Self {
			id: req.id,
			secret: req.secret,
		}
	}
}

/// Result of submitting credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
	/// The site said the credentials are wrong.
	Rejected,
	/// The site is asking for a one-time code.
	NeedOtp,
	/// Logged in without a second factor.
	Authenticated,
}

/// Result of submitting a one-time code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
	Verified,
	Incorrect,
	/// The code input is not on the page; the site changed under the script.
	InputMissing,
}

/// Drives one site's login and account pages.
///
/// Implementations are stateless with respect to sessions: everything they
/// need is on the page they are handed. The broker bounds each call with its
/// own step timeout.
#[async_trait]
pub trait SiteScript: Send + Sync {
	async fn login(&self, page: &dyn PageDriver, credentials: &Credentials) -> BackendResult<LoginOutcome>;

	/// Asks the site to send a new code.
	async fn resend(&self, page: &dyn PageDriver) -> BackendResult<()>;

	async fn verify(&self, page: &dyn PageDriver, code: &str) -> BackendResult<VerifyOutcome>;

	/// Reads account fields from a logged-in page.
	async fn extract(&self, page: &dyn PageDriver) -> BackendResult<AccountDetails>;
}
