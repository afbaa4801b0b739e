//! Two-phase login broker.
//!
//! Owns the slot pool, the session store and the resource lifecycle, and
//! moves sessions through `NEED_OTP → VERIFIED → CONSUMED`. Every path that
//! acquires a slot ends in exactly one of: the slot stored in a session
//! entry, or teardown followed by release.
//!
//! Public operations run in detached tasks so that a caller that goes away
//! mid-request (for example an HTTP client disconnecting) cannot drop a
//! future that is holding a slot or a half-torn-down browser.

use std::future::Future;
use std::sync::Arc;

use otpgate_protocol::{AccountDetails, AuthReply, GateStatus, OtpReply, OtpState, ResendReply, SessionId};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GateSettings;
use crate::error::{BackendError, BackendResult, GateError, Result};
use crate::pool::{Slot, SlotPool};
use crate::resource::{Launcher, ResourceHandle, ResourceLifecycle};
use crate::script::{Credentials, LoginOutcome, SiteScript, VerifyOutcome};
use crate::state::AuthState;
use crate::store::{DetachedSession, SessionEntry, SessionStore};
use crate::sweeper;

/// Read-only view of a stored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
	pub state: AuthState,
	pub otp_required: bool,
	pub otp_attempts: u32,
	pub slot: Option<usize>,
}

/// The gate: pool, store, lifecycle and site script behind one handle.
pub struct Broker {
	settings: GateSettings,
	pool: SlotPool,
	store: SessionStore,
	lifecycle: ResourceLifecycle,
	script: Arc<dyn SiteScript>,
	shutdown: watch::Sender<bool>,
	sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Broker {
	/// Builds a broker and starts its reclaim sweeper.
	///
	/// Must be called from within a Tokio runtime.
	pub fn new(settings: GateSettings, launcher: Arc<dyn Launcher>, script: Arc<dyn SiteScript>) -> Arc<Self> {
		let (shutdown, _) = watch::channel(false);
		let broker = Arc::new(Self {
			pool: SlotPool::new(settings.capacity, settings.queue_limit),
			store: SessionStore::new(),
			lifecycle: ResourceLifecycle::new(launcher, settings.clone()),
			script,
			shutdown,
			sweeper: Mutex::new(None),
			settings,
		});

		let handle = sweeper::spawn(Arc::downgrade(&broker), broker.settings.sweep_interval(), broker.shutdown.subscribe());
		*broker.sweeper.lock() = Some(handle);

		info!(
			target = "otpgate.broker",
			capacity = broker.settings.capacity,
			ttl_ms = broker.settings.session_ttl_ms,
			attempt_limit = broker.settings.otp_attempt_limit,
			"broker started"
		);
		broker
	}

	pub fn settings(&self) -> &GateSettings {
		&self.settings
	}

	/// First phase: log in with credentials.
	///
	/// Waits for a free slot when all are busy. Only `PoolSaturated` and
	/// `ShuttingDown` are returned as errors; every other failure is a
	/// `FAILED` reply carrying the error code as its reason.
	pub async fn submit_credentials(self: &Arc<Self>, credentials: Credentials) -> Result<AuthReply> {
		if self.is_shutting_down() {
			return Err(GateError::ShuttingDown);
		}
		let this = Arc::clone(self);
		run_detached(async move { this.login(credentials).await }).await
	}

	/// Asks the site for a new code. Never changes state or attempts.
	pub async fn resend_otp(self: &Arc<Self>, identifier: SessionId) -> Result<ResendReply> {
		let this = Arc::clone(self);
		run_detached(async move { this.resend(identifier).await }).await
	}

	/// Second phase: submit a one-time code.
	pub async fn submit_otp(self: &Arc<Self>, identifier: SessionId, code: String) -> Result<OtpReply> {
		let this = Arc::clone(self);
		run_detached(async move { this.verify(identifier, code).await }).await
	}

	/// Uses a verified session exactly once, then tears it down.
	pub async fn consume(self: &Arc<Self>, identifier: SessionId) -> Result<AccountDetails> {
		let this = Arc::clone(self);
		run_detached(async move { this.take(identifier).await }).await
	}

	async fn login(&self, credentials: Credentials) -> Result<AuthReply> {
		let slot = self.pool.acquire().await?;
		debug!(target = "otpgate.broker", slot = slot.index(), user = %credentials.id, "slot acquired for login");

		let resource = match self.lifecycle.acquire_resource(&slot).await {
			Ok(resource) => resource,
			Err(err) => {
				warn!(target = "otpgate.broker", slot = slot.index(), error = %err, "resource acquisition failed");
				self.pool.release(slot);
				return Ok(AuthReply::failed(err.code()));
			}
		};

		let outcome = self.step("login", self.script.login(resource.page(), &credentials)).await;
		match outcome {
			Ok(LoginOutcome::NeedOtp) => {
				let identifier = SessionId::generate();
				let slot_index = slot.index();
				self.store.insert(SessionEntry::awaiting_otp(identifier.clone(), slot, resource));
				// Checked after the insert: either `shutdown` sees this entry when it
				// drains, or this sees the flag and takes the entry back out.
				if self.is_shutting_down() {
					if let Some(lease) = self.store.lease(&identifier).await {
						let detached = lease.remove(AuthState::Failed);
						self.dispose(detached).await;
					}
					return Err(GateError::ShuttingDown);
				}
				info!(target = "otpgate.broker", id = %identifier, slot = slot_index, "verification code required");
				Ok(AuthReply::need_otp(identifier))
			}
			Ok(LoginOutcome::Authenticated) => {
				let extracted = self.step("extract", self.script.extract(resource.page())).await;
				self.release_parts(slot, resource).await;
				match extracted {
					Ok(details) => {
						info!(target = "otpgate.broker", user = %credentials.id, "logged in without verification");
						Ok(AuthReply::success(details))
					}
					Err(err) => {
						warn!(target = "otpgate.broker", user = %credentials.id, error = %err, "extraction after login failed");
						Ok(AuthReply::failed(err.code()))
					}
				}
			}
			Ok(LoginOutcome::Rejected) => {
				info!(target = "otpgate.broker", user = %credentials.id, "credentials rejected");
				self.release_parts(slot, resource).await;
				Ok(AuthReply::failed(GateError::CredentialRejected.code()))
			}
			Err(err) => {
				warn!(target = "otpgate.broker", user = %credentials.id, error = %err, "login failed");
				self.release_parts(slot, resource).await;
				Ok(AuthReply::failed(err.code()))
			}
		}
	}

	async fn resend(&self, identifier: SessionId) -> Result<ResendReply> {
		let lease = self.store.lease(&identifier).await.ok_or(GateError::SessionNotFound)?;
		if lease.state() != AuthState::NeedOtp {
			debug!(target = "otpgate.broker", id = %identifier, state = %lease.state(), "resend outside NEED_OTP ignored");
			return Ok(ResendReply { ok: false });
		}

		let result = match lease.page() {
			Some(page) => self.step("resend", self.script.resend(page)).await,
			None => Err(GateError::from_backend("resend", BackendError::TornDown)),
		};
		match result {
			Ok(()) => {
				debug!(target = "otpgate.broker", id = %identifier, "verification code resent");
				Ok(ResendReply { ok: true })
			}
			Err(err) => {
				warn!(target = "otpgate.broker", id = %identifier, error = %err, "resend failed");
				Ok(ResendReply { ok: false })
			}
		}
	}

	async fn verify(&self, identifier: SessionId, code: String) -> Result<OtpReply> {
		let invalid = OtpReply {
			state: OtpState::Invalid,
			attempts_remaining: None,
		};
		let Some(mut lease) = self.store.lease(&identifier).await else {
			debug!(target = "otpgate.broker", id = %identifier, "code for unknown session");
			return Ok(invalid);
		};
		if lease.state() != AuthState::NeedOtp {
			debug!(target = "otpgate.broker", id = %identifier, state = %lease.state(), "code outside NEED_OTP");
			return Ok(invalid);
		}

		let outcome = match lease.page() {
			Some(page) => self.step("verify", self.script.verify(page, &code)).await,
			None => Err(GateError::from_backend("verify", BackendError::TornDown)),
		};

		let failure = match outcome {
			Ok(VerifyOutcome::Verified) => {
				if !lease.transition(AuthState::Verified) {
					return Ok(invalid);
				}
				lease.otp_attempts = 0;
				info!(target = "otpgate.broker", id = %identifier, "session verified");
				return Ok(OtpReply {
					state: OtpState::Verified,
					attempts_remaining: None,
				});
			}
			Ok(VerifyOutcome::Incorrect) => {
				lease.otp_attempts += 1;
				let limit = self.settings.otp_attempt_limit;
				if lease.otp_attempts < limit {
					info!(target = "otpgate.broker", id = %identifier, attempts = lease.otp_attempts, "incorrect code");
					return Ok(OtpReply {
						state: OtpState::Retry,
						attempts_remaining: Some(limit - lease.otp_attempts),
					});
				}
				GateError::VerificationIncorrect
			}
			Ok(VerifyOutcome::InputMissing) => GateError::VerificationInputMissing,
			Err(err) => err,
		};

		warn!(
			target = "otpgate.broker",
			id = %identifier,
			attempts = lease.otp_attempts,
			code = failure.code(),
			error = %failure,
			"verification failed, closing session"
		);
		let detached = lease.remove(AuthState::Failed);
		self.dispose(detached).await;
		Ok(OtpReply {
			state: OtpState::Failed,
			attempts_remaining: None,
		})
	}

	async fn take(&self, identifier: SessionId) -> Result<AccountDetails> {
		let lease = self.store.lease(&identifier).await.ok_or(GateError::SessionNotFound)?;
		if lease.state() != AuthState::Verified {
			return Err(GateError::SessionNotVerified);
		}
		let detached = lease.remove(AuthState::Consumed);

		let result = match detached.resource.as_ref() {
			Some(resource) => self.step("extract", self.script.extract(resource.page())).await,
			None => Err(GateError::from_backend("extract", BackendError::TornDown)),
		};
		match &result {
			Ok(_) => info!(target = "otpgate.broker", id = %identifier, "session consumed"),
			Err(err) => warn!(target = "otpgate.broker", id = %identifier, error = %err, "extraction failed on consume"),
		}
		self.dispose(detached).await;
		result
	}

	/// Removes every session older than the TTL whose lease is free, tearing
	/// down its resource and releasing its slot. Returns how many were reclaimed.
	pub async fn reclaim_expired(&self) -> usize {
		let ttl = self.settings.session_ttl();
		let report = self.store.sweep(ttl);
		if report.busy > 0 {
			debug!(target = "otpgate.sweeper", busy = report.busy, "expired sessions busy, retrying next tick");
		}
		let reclaimed = report.reclaimed.len();
		for detached in report.reclaimed {
			warn!(
				target = "otpgate.sweeper",
				id = %detached.identifier,
				age_ms = detached.age.as_millis() as u64,
				ttl_ms = ttl.as_millis() as u64,
				code = GateError::SessionExpired.code(),
				"session expired, reclaiming"
			);
			self.dispose(detached).await;
		}
		reclaimed
	}

	pub fn status(&self) -> GateStatus {
		GateStatus {
			capacity: self.pool.capacity(),
			occupied: self.pool.occupied(),
			waiting: self.pool.waiting(),
			sessions: self.store.len(),
		}
	}

	/// State, attempts and slot of a live session.
	pub async fn inspect(&self, identifier: &SessionId) -> Option<SessionInfo> {
		let lease = self.store.lease(identifier).await?;
		Some(SessionInfo {
			state: lease.state(),
			otp_required: lease.otp_required(),
			otp_attempts: lease.otp_attempts,
			slot: lease.slot_index(),
		})
	}

	pub fn is_shutting_down(&self) -> bool {
		*self.shutdown.borrow()
	}

	/// Stops the sweeper, rejects queued and new logins, and tears down every
	/// stored session. Safe to call more than once.
	pub async fn shutdown(&self) {
		if self.shutdown.send_replace(true) {
			return;
		}
		self.pool.close();

		let sweeper = self.sweeper.lock().take();
		if let Some(handle) = sweeper {
			let _ = handle.await;
		}

		let drained = self.store.drain().await;
		let count = drained.len();
		for detached in drained {
			self.dispose(detached).await;
		}
		info!(target = "otpgate.broker", sessions = count, "broker shut down");
	}

	async fn step<T, F>(&self, name: &'static str, fut: F) -> Result<T>
	where
		F: Future<Output = BackendResult<T>>,
	{
		let limit = self.settings.step_timeout();
		match tokio::time::timeout(limit, fut).await {
			Ok(result) => result.map_err(|err| GateError::from_backend(name, err)),
			Err(_) => Err(GateError::StepTimeout { step: name, timeout: limit }),
		}
	}

	async fn release_parts(&self, slot: Slot, mut resource: ResourceHandle) {
		self.lifecycle.teardown(&mut resource).await;
		self.pool.release(slot);
	}

	async fn dispose(&self, detached: DetachedSession) {
		let DetachedSession {
			identifier,
			state,
			slot,
			resource,
			..
		} = detached;
		if let Some(mut resource) = resource {
			self.lifecycle.teardown(&mut resource).await;
		}
		match slot {
			Some(slot) => {
				debug!(target = "otpgate.broker", id = %identifier, state = %state, slot = slot.index(), "slot released");
				self.pool.release(slot);
			}
			None => warn!(target = "otpgate.broker", id = %identifier, "detached session had no slot"),
		}
	}
}

/// Awaits `fut` on its own task so the work finishes even if the caller is dropped.
async fn run_detached<T, F>(fut: F) -> Result<T>
where
	F: Future<Output = Result<T>> + Send + 'static,
	T: Send + 'static,
{
	match tokio::spawn(fut).await {
		Ok(result) => result,
		Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
		Err(_) => Err(GateError::ShuttingDown),
	}
}

#[cfg(test)]
mod tests;
