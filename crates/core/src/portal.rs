//! Member-portal login script.
//!
//! Drives a two-step username/password form, detects the verification
//! prompt or the credentials error, completes the one-time-code form
//! (dismissing the feedback dialog and the optional trust-device prompts), and
//! reads member number, name and balance from the logged-in pages. Every
//! selector, URL and timeout lives in [`PortalSelectors`].

use std::time::Duration;

use async_trait::async_trait;
use otpgate_protocol::{AccountDetails, parse_amount};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::resource::PageDriver;
use crate::script::{Credentials, LoginOutcome, SiteScript, VerifyOutcome};

/// Selectors, URLs and timeouts for [`PortalScript`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortalSelectors {
	pub login_url: String,
	pub username_input: String,
	pub next_button: String,
	pub password_input: String,
	pub login_button: String,
	/// Visible once the site asks for a one-time code.
	pub verify_marker: String,
	/// Visible when the credentials are wrong.
	pub credentials_error: String,
	pub feedback_dismiss: String,
	pub otp_input: String,
	pub verify_button: String,
	/// Visible when the submitted code was wrong.
	pub otp_error: String,
	pub resend_button: String,
	pub trust_device_button: String,
	pub replace_device_button: String,
	pub dashboard_url: String,
	pub name_heading: String,
	pub member_number: String,
	pub transactions_button: String,
	pub contributions_link: String,
	pub view_all_contributions_link: String,
	pub transactions_url: String,
	pub balance: String,
	pub currency: String,
	pub element_timeout_ms: u64,
	pub navigation_timeout_ms: u64,
	/// How long to wait for the site to react to a submitted form.
	pub outcome_timeout_ms: u64,
	pub poll_interval_ms: u64,
}

impl Default for PortalSelectors {
	fn default() -> Self {
		Self {
			login_url: "https://portal.australiansuper.com/login".into(),
			username_input: r"#login-form\.login-fieldset\.username".into(),
			next_button: r#"button[data-target-id="login--form--login-proceed-cta"]"#.into(),
			password_input: r"#login-form\.password".into(),
			login_button: r#"button[data-target-id="login--form--login-cta"]"#.into(),
			verify_marker: "text=Verify your login".into(),
			credentials_error: "text=Sorry, these details aren't right".into(),
			feedback_dismiss: r#"button:has-text("No Thanks")"#.into(),
			otp_input: r#"input[id="login-otp-validation-form-config.verificationCode"]"#.into(),
			verify_button: r#"button[data-target-id="login-otp-validation-form--continue-button"]"#.into(),
			otp_error: "text=code you entered is incorrect".into(),
			resend_button: r#"button:has-text("Resend")"#.into(),
			trust_device_button: r#"button:has-text("Trust device")"#.into(),
			replace_device_button: r#"button:has-text("Replace")"#.into(),
			dashboard_url: "https://portal.australiansuper.com/".into(),
			name_heading: "h1".into(),
			member_number: r#"p:has-text("Member number") + p"#.into(),
			transactions_button: r#"button:has-text("Transactions")"#.into(),
			contributions_link: r#"div[aria-hidden="false"] a:has-text("Contributions")"#.into(),
			view_all_contributions_link: r#"a:has-text("View all contributions")"#.into(),
			transactions_url: "https://portal.australiansuper.com/transactions/transaction-history".into(),
			balance: r#"p[class*="SummaryBalance"]"#.into(),
			currency: "AUD".into(),
			element_timeout_ms: 6_000,
			navigation_timeout_ms: 30_000,
			outcome_timeout_ms: 50_000,
			poll_interval_ms: 250,
		}
	}
}

impl PortalSelectors {
	fn element_timeout(&self) -> Duration {
		Duration::from_millis(self.element_timeout_ms)
	}

	fn navigation_timeout(&self) -> Duration {
		Duration::from_millis(self.navigation_timeout_ms)
	}

	fn outcome_timeout(&self) -> Duration {
		Duration::from_millis(self.outcome_timeout_ms)
	}

	fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms.max(1))
	}
}

/// [`SiteScript`] for the member portal.
#[derive(Debug, Clone, Default)]
pub struct PortalScript {
	selectors: PortalSelectors,
}

impl PortalScript {
	pub fn new(selectors: PortalSelectors) -> Self {
		Self { selectors }
	}

	pub fn selectors(&self) -> &PortalSelectors {
		&self.selectors
	}

	async fn on_url(&self, page: &dyn PageDriver, url: &str) -> BackendResult<bool> {
		Ok(same_page(&page.url().await?, url))
	}

	/// Clicks `selector` if it is showing; reports whether it did.
	async fn click_if_visible(&self, page: &dyn PageDriver, selector: &str) -> BackendResult<bool> {
		if !page.is_visible(selector).await? {
			return Ok(false);
		}
		page.click(selector, self.selectors.element_timeout()).await?;
		debug!(target = "otpgate.portal", selector, "dismissed prompt");
		Ok(true)
	}

	fn timed_out(&self, condition: &str) -> BackendError {
		BackendError::Timeout {
			condition: condition.to_string(),
			timeout: self.selectors.outcome_timeout(),
		}
	}
}

#[async_trait]
impl SiteScript for PortalScript {
	async fn login(&self, page: &dyn PageDriver, credentials: &Credentials) -> BackendResult<LoginOutcome> {
		let s = &self.selectors;
		let wait = s.element_timeout();

		page.goto(&s.login_url, s.navigation_timeout()).await?;
		page.fill(&s.username_input, &credentials.id, wait).await?;
		page.click(&s.next_button, wait).await?;
		page.fill(&s.password_input, &credentials.secret, wait).await?;
		page.click(&s.login_button, wait).await?;

		let deadline = Instant::now() + s.outcome_timeout();
		loop {
			if page.is_visible(&s.verify_marker).await? {
				self.click_if_visible(page, &s.feedback_dismiss).await?;
				return Ok(LoginOutcome::NeedOtp);
			}
			if page.is_visible(&s.credentials_error).await? {
				return Ok(LoginOutcome::Rejected);
			}
			if self.on_url(page, &s.dashboard_url).await? {
				return Ok(LoginOutcome::Authenticated);
			}
			if Instant::now() >= deadline {
				return Err(self.timed_out("verification prompt or login result"));
			}
			tokio::time::sleep(s.poll_interval()).await;
		}
	}

	async fn resend(&self, page: &dyn PageDriver) -> BackendResult<()> {
		let s = &self.selectors;
		self.click_if_visible(page, &s.feedback_dismiss).await?;
		page.click(&s.resend_button, s.element_timeout()).await
	}

	async fn verify(&self, page: &dyn PageDriver, code: &str) -> BackendResult<VerifyOutcome> {
		let s = &self.selectors;
		let wait = s.element_timeout();

		self.click_if_visible(page, &s.feedback_dismiss).await?;
		match page.wait_for(&s.otp_input, wait).await {
			Ok(()) => {}
			Err(BackendError::Timeout { .. } | BackendError::ElementNotFound(_)) => return Ok(VerifyOutcome::InputMissing),
			Err(err) => return Err(err),
		}
		page.fill(&s.otp_input, code, wait).await?;
		page.click(&s.verify_button, wait).await?;

		let deadline = Instant::now() + s.outcome_timeout();
		loop {
			if self.on_url(page, &s.dashboard_url).await? {
				return Ok(VerifyOutcome::Verified);
			}
			if page.is_visible(&s.otp_error).await? {
				return Ok(VerifyOutcome::Incorrect);
			}
			self.click_if_visible(page, &s.trust_device_button).await?;
			self.click_if_visible(page, &s.replace_device_button).await?;

			if Instant::now() >= deadline {
				// Still on the code form without an explicit error: the code was not accepted.
				if page.is_visible(&s.otp_input).await? {
					return Ok(VerifyOutcome::Incorrect);
				}
				return Err(self.timed_out("dashboard after verification"));
			}
			tokio::time::sleep(s.poll_interval()).await;
		}
	}

	async fn extract(&self, page: &dyn PageDriver) -> BackendResult<AccountDetails> {
		let s = &self.selectors;
		let wait = s.element_timeout();

		if !self.on_url(page, &s.dashboard_url).await? {
			page.goto(&s.dashboard_url, s.navigation_timeout()).await?;
		}

		let name = page
			.text(&s.name_heading)
			.await?
			.map(|heading| welcome_name(&heading))
			.unwrap_or_default();
		let id = page.text(&s.member_number).await?.unwrap_or_default();

		page.click(&s.transactions_button, wait).await?;
		page.click(&s.contributions_link, wait).await?;
		page.click(&s.view_all_contributions_link, wait).await?;
		page.wait_for_url(&s.transactions_url, s.navigation_timeout()).await?;

		page.wait_for(&s.balance, wait).await?;
		let balance = page.text(&s.balance).await?.as_deref().and_then(parse_amount);

		debug!(target = "otpgate.portal", member = %id, has_balance = balance.is_some(), "account extracted");
		Ok(AccountDetails {
			id,
			name,
			balance,
			currency: s.currency.clone(),
		})
	}
}

/// `"Welcome  Jo Citizen"` → `"Jo Citizen"`; other headings are returned trimmed.
fn welcome_name(heading: &str) -> String {
	let collapsed = heading.split_whitespace().collect::<Vec<_>>().join(" ");
	match collapsed.get(..8) {
		Some(prefix) if prefix.eq_ignore_ascii_case("welcome ") => collapsed[8..].trim().to_string(),
		_ => collapsed,
	}
}

fn same_page(current: &str, target: &str) -> bool {
	let strip = |u: &str| {
		let u = u.split(['?', '#']).next().unwrap_or(u);
		u.trim_end_matches('/').to_string()
	};
	strip(current) == strip(target)
}
