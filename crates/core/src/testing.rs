//! In-memory fakes for the backing resource and the site script.
//!
//! [`FakeLauncher`] hands out [`FakePage`]s and records every launch,
//! teardown step and termination so tests can assert that resources are
//! released exactly once. [`FakeScript`] logs in against a table of
//! [`FakeAccount`]s.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use otpgate_protocol::AccountDetails;
use parking_lot::Mutex;

use crate::error::{BackendError, BackendResult};
use crate::resource::{BrowsingContext, ControlChannel, Launcher, PageDriver};
use crate::script::{Credentials, LoginOutcome, SiteScript, VerifyOutcome};

type ClickHook = Box<dyn Fn(&mut PageState) + Send + Sync>;

/// Mutable DOM stand-in behind a [`FakePage`].
#[derive(Default)]
pub struct PageState {
	pub url: String,
	pub visible: HashSet<String>,
	pub texts: HashMap<String, String>,
	pub filled: HashMap<String, String>,
	pub actions: Vec<String>,
}

impl PageState {
	pub fn show(&mut self, selector: &str) {
		self.visible.insert(selector.to_string());
	}

	pub fn hide(&mut self, selector: &str) {
		self.visible.remove(selector);
	}
}

/// A page whose elements are whatever the test says is visible.
///
/// Waits never block: an invisible selector fails at once with a timeout.
#[derive(Default)]
pub struct FakePage {
	state: Mutex<PageState>,
	on_click: Mutex<HashMap<String, ClickHook>>,
	on_goto: Mutex<HashMap<String, ClickHook>>,
}

impl FakePage {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Runs `f` against the page state.
	pub fn with<R>(&self, f: impl FnOnce(&mut PageState) -> R) -> R {
		f(&mut self.state.lock())
	}

	/// Registers a state change applied whenever `selector` is clicked.
	pub fn on_click(&self, selector: &str, hook: impl Fn(&mut PageState) + Send + Sync + 'static) {
		self.on_click.lock().insert(selector.to_string(), Box::new(hook));
	}

	/// Registers a state change applied after navigating to `url`.
	pub fn on_goto(&self, url: &str, hook: impl Fn(&mut PageState) + Send + Sync + 'static) {
		self.on_goto.lock().insert(url.to_string(), Box::new(hook));
	}

	pub fn actions(&self) -> Vec<String> {
		self.state.lock().actions.clone()
	}

	fn require_visible(&self, selector: &str, timeout: Duration) -> BackendResult<()> {
		if self.state.lock().visible.contains(selector) {
			Ok(())
		} else {
			Err(BackendError::Timeout {
				condition: format!("selector '{}' to be visible", selector),
				timeout,
			})
		}
	}
}

#[async_trait]
impl PageDriver for FakePage {
	async fn goto(&self, url: &str, _timeout: Duration) -> BackendResult<()> {
		{
			let mut state = self.state.lock();
			state.url = url.to_string();
			state.actions.push(format!("goto {}", url));
		}
		if let Some(hook) = self.on_goto.lock().get(url) {
			hook(&mut self.state.lock());
		}
		Ok(())
	}

	async fn wait_for(&self, selector: &str, timeout: Duration) -> BackendResult<()> {
		self.require_visible(selector, timeout)
	}

	async fn is_visible(&self, selector: &str) -> BackendResult<bool> {
		Ok(self.state.lock().visible.contains(selector))
	}

	async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> BackendResult<()> {
		self.require_visible(selector, timeout)?;
		let mut state = self.state.lock();
		state.filled.insert(selector.to_string(), value.to_string());
		state.actions.push(format!("fill {}", selector));
		Ok(())
	}

	async fn click(&self, selector: &str, timeout: Duration) -> BackendResult<()> {
		self.require_visible(selector, timeout)?;
		self.state.lock().actions.push(format!("click {}", selector));
		if let Some(hook) = self.on_click.lock().get(selector) {
			hook(&mut self.state.lock());
		}
		Ok(())
	}

	async fn text(&self, selector: &str) -> BackendResult<Option<String>> {
		Ok(self.state.lock().texts.get(selector).cloned())
	}

	async fn url(&self) -> BackendResult<String> {
		Ok(self.state.lock().url.clone())
	}

	async fn wait_for_url(&self, url: &str, timeout: Duration) -> BackendResult<()> {
		let current = self.state.lock().url.clone();
		if current.trim_end_matches('/') == url.trim_end_matches('/') {
			Ok(())
		} else {
			Err(BackendError::Timeout {
				condition: format!("URL {}", url),
				timeout,
			})
		}
	}
}

/// Knobs and counters shared by a [`FakeLauncher`] and everything it opens.
#[derive(Default)]
pub struct FakeBackendState {
	next_pid: AtomicU32,
	connect_failures: AtomicU32,
	hang_connects: AtomicBool,
	launch_failure: Mutex<Option<String>>,
	context_failure: Mutex<Option<String>>,
	failing_teardown_step: Mutex<Option<&'static str>>,
	launches: Mutex<Vec<(PathBuf, u16, u32)>>,
	live: Mutex<HashSet<u32>>,
	terminated: Mutex<Vec<u32>>,
	connects: AtomicUsize,
	cleared: AtomicUsize,
	contexts_closed: AtomicUsize,
	channels_closed: AtomicUsize,
	pages: Mutex<Vec<Arc<FakePage>>>,
	page_setup: Mutex<Option<Arc<dyn Fn(&FakePage) + Send + Sync>>>,
}

/// Launcher that spawns nothing.
#[derive(Clone, Default)]
pub struct FakeLauncher {
	state: Arc<FakeBackendState>,
}

impl FakeLauncher {
	pub fn new() -> Self {
		let launcher = Self::default();
		launcher.state.next_pid.store(1000, Ordering::SeqCst);
		launcher
	}

	/// Makes every launch fail with `message`.
	pub fn fail_launch(&self, message: &str) {
		*self.state.launch_failure.lock() = Some(message.to_string());
	}

	/// Makes the next `n` connection attempts fail.
	pub fn fail_connects(&self, n: u32) {
		self.state.connect_failures.store(n, Ordering::SeqCst);
	}

	/// Makes every connection attempt stall forever.
	pub fn hang_connects(&self) {
		self.state.hang_connects.store(true, Ordering::SeqCst);
	}

	pub fn fail_context(&self, message: &str) {
		*self.state.context_failure.lock() = Some(message.to_string());
	}

	/// Makes the named teardown step (`clear`, `close_context`, `close_channel`,
	/// `terminate`) fail.
	pub fn fail_teardown_step(&self, step: &'static str) {
		*self.state.failing_teardown_step.lock() = Some(step);
	}

	/// Applies `setup` to every page handed out from now on.
	pub fn setup_pages(&self, setup: impl Fn(&FakePage) + Send + Sync + 'static) {
		*self.state.page_setup.lock() = Some(Arc::new(setup));
	}

	/// `(profile_dir, port, pid)` for every launch, in order.
	pub fn launches(&self) -> Vec<(PathBuf, u16, u32)> {
		self.state.launches.lock().clone()
	}

	pub fn terminated(&self) -> Vec<u32> {
		self.state.terminated.lock().clone()
	}

	/// Processes launched and not yet terminated.
	pub fn live_processes(&self) -> usize {
		self.state.live.lock().len()
	}

	pub fn connect_attempts(&self) -> usize {
		self.state.connects.load(Ordering::SeqCst)
	}

	pub fn cleared(&self) -> usize {
		self.state.cleared.load(Ordering::SeqCst)
	}

	pub fn contexts_closed(&self) -> usize {
		self.state.contexts_closed.load(Ordering::SeqCst)
	}

	pub fn channels_closed(&self) -> usize {
		self.state.channels_closed.load(Ordering::SeqCst)
	}

	pub fn pages(&self) -> Vec<Arc<FakePage>> {
		self.state.pages.lock().clone()
	}

	fn teardown_fails(&self, step: &str) -> BackendResult<()> {
		if self.state.failing_teardown_step.lock().is_some_and(|failing| failing == step) {
			Err(BackendError::Page(format!("{} failed", step)))
		} else {
			Ok(())
		}
	}
}

#[async_trait]
impl Launcher for FakeLauncher {
	async fn launch(&self, profile_dir: &Path, port: u16) -> BackendResult<u32> {
		if let Some(message) = self.state.launch_failure.lock().clone() {
			return Err(BackendError::Launch(message));
		}
		let pid = self.state.next_pid.fetch_add(1, Ordering::SeqCst);
		self.state.launches.lock().push((profile_dir.to_path_buf(), port, pid));
		self.state.live.lock().insert(pid);
		Ok(pid)
	}

	async fn connect(&self, port: u16) -> BackendResult<Box<dyn ControlChannel>> {
		self.state.connects.fetch_add(1, Ordering::SeqCst);
		if self.state.hang_connects.load(Ordering::SeqCst) {
			std::future::pending::<()>().await;
		}
		let remaining = self.state.connect_failures.load(Ordering::SeqCst);
		if remaining > 0 {
			self.state.connect_failures.store(remaining - 1, Ordering::SeqCst);
			return Err(BackendError::Connect(format!("connection refused on port {}", port)));
		}
		Ok(Box::new(FakeChannel { launcher: self.clone() }))
	}

	async fn terminate(&self, pid: u32) -> BackendResult<()> {
		self.state.terminated.lock().push(pid);
		self.state.live.lock().remove(&pid);
		self.teardown_fails("terminate")
	}
}

struct FakeChannel {
	launcher: FakeLauncher,
}

#[async_trait]
impl ControlChannel for FakeChannel {
	async fn context(&self) -> BackendResult<Box<dyn BrowsingContext>> {
		if let Some(message) = self.launcher.state.context_failure.lock().clone() {
			return Err(BackendError::Page(message));
		}
		Ok(Box::new(FakeContext {
			launcher: self.launcher.clone(),
		}))
	}

	async fn close(&self) -> BackendResult<()> {
		self.launcher.state.channels_closed.fetch_add(1, Ordering::SeqCst);
		self.launcher.teardown_fails("close_channel")
	}
}

struct FakeContext {
	launcher: FakeLauncher,
}

#[async_trait]
impl BrowsingContext for FakeContext {
	async fn page(&self) -> BackendResult<Arc<dyn PageDriver>> {
		let page = FakePage::new();
		let setup = self.launcher.state.page_setup.lock().clone();
		if let Some(setup) = setup {
			setup(&page);
		}
		self.launcher.state.pages.lock().push(Arc::clone(&page));
		Ok(page)
	}

	async fn clear_state(&self) -> BackendResult<()> {
		self.launcher.state.cleared.fetch_add(1, Ordering::SeqCst);
		self.launcher.teardown_fails("clear")
	}

	async fn close(&self) -> BackendResult<()> {
		self.launcher.state.contexts_closed.fetch_add(1, Ordering::SeqCst);
		self.launcher.teardown_fails("close_context")
	}
}

/// One login known to [`FakeScript`].
#[derive(Debug, Clone)]
pub struct FakeAccount {
	pub secret: String,
	/// Expected code; `None` logs straight in without a second factor.
	pub otp: Option<String>,
	/// Simulates a page without the verification input.
	pub otp_input_missing: bool,
	pub details: AccountDetails,
}

impl FakeAccount {
	pub fn new(id: &str, secret: &str, otp: Option<&str>) -> Self {
		Self {
			secret: secret.to_string(),
			otp: otp.map(str::to_string),
			otp_input_missing: false,
			details: AccountDetails {
				id: id.to_string(),
				name: format!("Member {}", id),
				balance: Some(1234.5),
				currency: "AUD".into(),
			},
		}
	}
}

const FAKE_ORIGIN: &str = "fake://account/";

/// Site script backed by an in-memory account table.
///
/// The logged-in account is remembered on the page itself (its URL), so the
/// same script instance serves every session.
#[derive(Default)]
pub struct FakeScript {
	accounts: Mutex<HashMap<String, FakeAccount>>,
	hang: Mutex<HashSet<&'static str>>,
	delays: Mutex<HashMap<&'static str, Duration>>,
	failing: Mutex<HashSet<&'static str>>,
	resends: AtomicUsize,
	verifies: AtomicUsize,
	extracts: AtomicUsize,
}

impl FakeScript {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn with_account(self: Arc<Self>, id: &str, account: FakeAccount) -> Arc<Self> {
		self.accounts.lock().insert(id.to_string(), account);
		self
	}

	/// Makes `step` (`login`, `resend`, `verify`, `extract`) never complete.
	pub fn hang(&self, step: &'static str) {
		self.hang.lock().insert(step);
	}

	/// Makes `step` take `delay` before doing anything.
	pub fn delay(&self, step: &'static str, delay: Duration) {
		self.delays.lock().insert(step, delay);
	}

	/// Makes `step` fail with a page error.
	pub fn fail(&self, step: &'static str) {
		self.failing.lock().insert(step);
	}

	pub fn resends(&self) -> usize {
		self.resends.load(Ordering::SeqCst)
	}

	pub fn verifies(&self) -> usize {
		self.verifies.load(Ordering::SeqCst)
	}

	pub fn extracts(&self) -> usize {
		self.extracts.load(Ordering::SeqCst)
	}

	async fn enter(&self, step: &'static str) -> BackendResult<()> {
		let delay = self.delays.lock().get(step).copied();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		if self.hang.lock().contains(step) {
			std::future::pending::<()>().await;
		}
		if self.failing.lock().contains(step) {
			return Err(BackendError::Page(format!("{} blew up", step)));
		}
		Ok(())
	}

	async fn account_on(&self, page: &dyn PageDriver) -> BackendResult<FakeAccount> {
		let url = page.url().await?;
		let id = url
			.strip_prefix(FAKE_ORIGIN)
			.ok_or_else(|| BackendError::Page(format!("not logged in (at {:?})", url)))?;
		self.accounts
			.lock()
			.get(id)
			.cloned()
			.ok_or_else(|| BackendError::Page(format!("unknown account {}", id)))
	}
}

#[async_trait]
impl SiteScript for FakeScript {
	async fn login(&self, page: &dyn PageDriver, credentials: &Credentials) -> BackendResult<LoginOutcome> {
		self.enter("login").await?;
		let Some(account) = self.accounts.lock().get(&credentials.id).cloned() else {
			return Ok(LoginOutcome::Rejected);
		};
		if account.secret != credentials.secret {
			return Ok(LoginOutcome::Rejected);
		}
		page.goto(&format!("{}{}", FAKE_ORIGIN, credentials.id), Duration::from_secs(1))
			.await?;
		Ok(if account.otp.is_some() {
			LoginOutcome::NeedOtp
		} else {
			LoginOutcome::Authenticated
		})
	}

	async fn resend(&self, page: &dyn PageDriver) -> BackendResult<()> {
		self.enter("resend").await?;
		self.account_on(page).await?;
		self.resends.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn verify(&self, page: &dyn PageDriver, code: &str) -> BackendResult<VerifyOutcome> {
		self.enter("verify").await?;
		self.verifies.fetch_add(1, Ordering::SeqCst);
		let account = self.account_on(page).await?;
		if account.otp_input_missing {
			return Ok(VerifyOutcome::InputMissing);
		}
		Ok(if account.otp.as_deref() == Some(code) {
			VerifyOutcome::Verified
		} else {
			VerifyOutcome::Incorrect
		})
	}

	async fn extract(&self, page: &dyn PageDriver) -> BackendResult<AccountDetails> {
		self.enter("extract").await?;
		self.extracts.fetch_add(1, Ordering::SeqCst);
		Ok(self.account_on(page).await?.details)
	}
}
