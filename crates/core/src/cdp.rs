//! DevTools-backed implementation of the resource traits.
//!
//! [`CdpLauncher`] spawns Chromium through `otpgate-runtime`, keeps the child
//! handles so exited processes can be reaped, and connects over the browser's
//! remote-debugging socket.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use otpgate_runtime::{BrowserContext, BrowserProcess, CdpBrowser, CdpPage, LaunchProfile};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};
use crate::resource::{BrowsingContext, ControlChannel, Launcher, PageDriver};

/// Default per-call timeout on the DevTools connection.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Launches real browsers.
pub struct CdpLauncher {
	profile: LaunchProfile,
	call_timeout: Duration,
	processes: Mutex<HashMap<u32, BrowserProcess>>,
}

impl CdpLauncher {
	/// `profile` supplies the executable, headless flag and extra arguments;
	/// its profile directory is replaced per slot.
	pub fn new(profile: LaunchProfile, call_timeout: Duration) -> Self {
		Self {
			profile,
			call_timeout,
			processes: Mutex::new(HashMap::new()),
		}
	}
}

#[async_trait]
impl Launcher for CdpLauncher {
	async fn launch(&self, profile_dir: &Path, port: u16) -> BackendResult<u32> {
		let profile = self.profile.with_user_data_dir(profile_dir);
		let process = otpgate_runtime::launch(&profile, port).map_err(|err| BackendError::Launch(err.to_string()))?;
		let pid = process.pid();
		self.processes.lock().insert(pid, process);
		Ok(pid)
	}

	async fn connect(&self, port: u16) -> BackendResult<Box<dyn ControlChannel>> {
		let info = otpgate_runtime::fetch_cdp_endpoint(port)
			.await
			.map_err(|err| BackendError::Connect(err.to_string()))?;
		debug!(
			target = "otpgate.cdp",
			port,
			browser = info.browser.as_deref().unwrap_or("unknown"),
			"devtools endpoint found"
		);
		let browser = CdpBrowser::connect(&info.web_socket_debugger_url, self.call_timeout)
			.await
			.map_err(|err| BackendError::Connect(err.to_string()))?;
		Ok(Box::new(CdpChannel { browser }))
	}

	async fn terminate(&self, pid: u32) -> BackendResult<()> {
		let process = self.processes.lock().remove(&pid);
		let Some(mut process) = process else {
			warn!(target = "otpgate.cdp", pid, "terminating a process this launcher did not start");
			return blocking_terminate(pid).await;
		};
		if let Some(status) = process.try_exit_status() {
			debug!(target = "otpgate.cdp", pid, %status, "browser already exited");
			return Ok(());
		}
		let result = blocking_terminate(pid).await;
		process.reap_in_background();
		result
	}
}

async fn blocking_terminate(pid: u32) -> BackendResult<()> {
	match tokio::task::spawn_blocking(move || otpgate_runtime::terminate(pid)).await {
		Ok(result) => result.map_err(BackendError::from),
		Err(err) => Err(BackendError::Page(format!("terminate task failed: {}", err))),
	}
}

struct CdpChannel {
	browser: CdpBrowser,
}

#[async_trait]
impl ControlChannel for CdpChannel {
	async fn context(&self) -> BackendResult<Box<dyn BrowsingContext>> {
		Ok(Box::new(CdpContext {
			context: self.browser.context(),
			page: Mutex::new(None),
		}))
	}

	async fn close(&self) -> BackendResult<()> {
		Ok(self.browser.close().await?)
	}
}

struct CdpContext {
	context: BrowserContext,
	page: Mutex<Option<CdpPage>>,
}

impl CdpContext {
	fn current_page(&self) -> Option<CdpPage> {
		self.page.lock().clone()
	}
}

#[async_trait]
impl BrowsingContext for CdpContext {
	async fn page(&self) -> BackendResult<Arc<dyn PageDriver>> {
		if let Some(page) = self.current_page() {
			return Ok(Arc::new(page));
		}
		let page = self.context.page().await?;
		*self.page.lock() = Some(page.clone());
		Ok(Arc::new(page))
	}

	async fn clear_state(&self) -> BackendResult<()> {
		let page = self.current_page();
		Ok(self.context.clear_state(page.as_ref()).await?)
	}

	async fn close(&self) -> BackendResult<()> {
		let page = self.page.lock().take();
		match page {
			Some(page) => Ok(page.close().await?),
			None => Ok(()),
		}
	}
}

#[async_trait]
impl PageDriver for CdpPage {
	async fn goto(&self, url: &str, timeout: Duration) -> BackendResult<()> {
		Ok(CdpPage::goto(self, url, timeout).await?)
	}

	async fn wait_for(&self, selector: &str, timeout: Duration) -> BackendResult<()> {
		Ok(CdpPage::wait_for(self, selector, timeout).await?)
	}

	async fn is_visible(&self, selector: &str) -> BackendResult<bool> {
		Ok(CdpPage::is_visible(self, selector).await?)
	}

	async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> BackendResult<()> {
		Ok(CdpPage::fill(self, selector, value, timeout).await?)
	}

	async fn click(&self, selector: &str, timeout: Duration) -> BackendResult<()> {
		Ok(CdpPage::click(self, selector, timeout).await?)
	}

	async fn text(&self, selector: &str) -> BackendResult<Option<String>> {
		Ok(CdpPage::text(self, selector).await?)
	}

	async fn url(&self) -> BackendResult<String> {
		Ok(CdpPage::url(self).await?)
	}

	async fn wait_for_url(&self, url: &str, timeout: Duration) -> BackendResult<()> {
		Ok(CdpPage::wait_for_url(self, url, timeout).await?)
	}
}
