//! Backing-resource contract and lifecycle.
//!
//! One resource is a browser process bound to a slot's dedicated port and
//! profile directory, the control channel connected to it, and the browsing
//! context/page used by the site script. The traits here are the seam between
//! the broker and a concrete automation backend (see [`crate::cdp`]).

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::GateSettings;
use crate::error::{BackendError, BackendResult, GateError, Result};
use crate::pool::Slot;

/// Element-level page primitives used by site scripts.
#[async_trait]
pub trait PageDriver: Send + Sync {
	async fn goto(&self, url: &str, timeout: Duration) -> BackendResult<()>;

	/// Waits until `selector` resolves to a visible element.
	async fn wait_for(&self, selector: &str, timeout: Duration) -> BackendResult<()>;

	/// Single visibility probe; never waits.
	async fn is_visible(&self, selector: &str) -> BackendResult<bool>;

	async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> BackendResult<()>;

	async fn click(&self, selector: &str, timeout: Duration) -> BackendResult<()>;

	/// Rendered text of the first match, `None` when nothing matches.
	async fn text(&self, selector: &str) -> BackendResult<Option<String>>;

	async fn url(&self) -> BackendResult<String>;

	async fn wait_for_url(&self, url: &str, timeout: Duration) -> BackendResult<()>;
}

/// A browsing context inside a connected browser.
#[async_trait]
pub trait BrowsingContext: Send + Sync {
	/// Returns the context's page, reusing an open one when present.
	async fn page(&self) -> BackendResult<Arc<dyn PageDriver>>;

	/// Clears cookies and web storage.
	async fn clear_state(&self) -> BackendResult<()>;

	async fn close(&self) -> BackendResult<()>;
}

/// Remote-control channel to one browser process.
#[async_trait]
pub trait ControlChannel: Send + Sync {
	/// Returns the default context, creating one if the browser has none.
	async fn context(&self) -> BackendResult<Box<dyn BrowsingContext>>;

	async fn close(&self) -> BackendResult<()>;
}

/// Starts, reaches and stops browser processes.
#[async_trait]
pub trait Launcher: Send + Sync {
	/// Spawns a browser listening on `port` with `profile_dir`; returns its process id.
	async fn launch(&self, profile_dir: &Path, port: u16) -> BackendResult<u32>;

	/// One connection attempt; [`ResourceLifecycle`] handles retries.
	async fn connect(&self, port: u16) -> BackendResult<Box<dyn ControlChannel>>;

	async fn terminate(&self, pid: u32) -> BackendResult<()>;
}

/// Everything opened for one session.
pub struct ResourceHandle {
	slot: usize,
	port: u16,
	pid: u32,
	channel: Box<dyn ControlChannel>,
	context: Box<dyn BrowsingContext>,
	page: Arc<dyn PageDriver>,
	torn_down: bool,
}

impl ResourceHandle {
	pub fn slot(&self) -> usize {
		self.slot
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn pid(&self) -> u32 {
		self.pid
	}

	pub fn page(&self) -> &dyn PageDriver {
		self.page.as_ref()
	}

	pub fn is_torn_down(&self) -> bool {
		self.torn_down
	}
}

impl std::fmt::Debug for ResourceHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResourceHandle")
			.field("slot", &self.slot)
			.field("port", &self.port)
			.field("pid", &self.pid)
			.field("torn_down", &self.torn_down)
			.finish_non_exhaustive()
	}
}

impl Drop for ResourceHandle {
	fn drop(&mut self) {
		if !self.torn_down {
			warn!(target = "otpgate.resource", slot = self.slot, pid = self.pid, "resource dropped without teardown");
		}
	}
}

/// Acquires and tears down [`ResourceHandle`]s.
pub struct ResourceLifecycle {
	launcher: Arc<dyn Launcher>,
	settings: GateSettings,
}

impl ResourceLifecycle {
	pub fn new(launcher: Arc<dyn Launcher>, settings: GateSettings) -> Self {
		Self { launcher, settings }
	}

	/// Launches and connects a browser for `slot`.
	///
	/// On failure everything opened so far is closed before returning
	/// [`GateError::ResourceAcquisition`].
	pub async fn acquire_resource(&self, slot: &Slot) -> Result<ResourceHandle> {
		let index = slot.index();
		let port = self.settings.port_for(index);
		let profile_dir = self.settings.profile_dir_for(index);
		let fail = |source: BackendError| GateError::ResourceAcquisition { slot: index, source };

		let pid = self.launcher.launch(&profile_dir, port).await.map_err(fail)?;
		debug!(target = "otpgate.resource", slot = index, port, pid, "browser launched");

		let channel = match self.connect_with_retry(port).await {
			Ok(channel) => channel,
			Err(err) => {
				self.terminate_quietly(index, pid).await;
				return Err(fail(err));
			}
		};

		let step = self.settings.step_timeout();
		let opened = async {
			let context = bounded(step, "browsing context", channel.context()).await?;
			match bounded(step, "page", context.page()).await {
				Ok(page) => Ok((context, page)),
				Err(err) => {
					let _ = bounded(self.settings.teardown_step_timeout(), "close context", context.close()).await;
					Err(err)
				}
			}
		}
		.await;

		match opened {
			Ok((context, page)) => {
				info!(target = "otpgate.resource", slot = index, port, pid, "resource ready");
				Ok(ResourceHandle {
					slot: index,
					port,
					pid,
					channel,
					context,
					page,
					torn_down: false,
				})
			}
			Err(err) => {
				let _ = bounded(self.settings.teardown_step_timeout(), "close channel", channel.close()).await;
				self.terminate_quietly(index, pid).await;
				Err(fail(err))
			}
		}
	}

	async fn connect_with_retry(&self, port: u16) -> BackendResult<Box<dyn ControlChannel>> {
		let window = self.settings.connect_window();
		let interval = self.settings.connect_interval();
		let deadline = Instant::now() + window;
		let mut attempts = 0u32;

		loop {
			attempts += 1;
			// An attempt that stalls (for example a handshake that never completes)
			// may only use what is left of the window.
			let remaining = deadline.saturating_duration_since(Instant::now());
			let last = match bounded(remaining, "connect", self.launcher.connect(port)).await {
				Ok(channel) => {
					debug!(target = "otpgate.resource", port, attempts, "control channel connected");
					return Ok(channel);
				}
				Err(err) => err,
			};
			if Instant::now() + interval > deadline {
				return Err(BackendError::Connect(format!(
					"port {} unreachable after {} attempts over {}ms: {}",
					port,
					attempts,
					window.as_millis(),
					last
				)));
			}
			tokio::time::sleep(interval).await;
		}
	}

	/// Best-effort teardown; every step runs even if an earlier one fails.
	///
	/// Calling this again on the same handle is a no-op.
	pub async fn teardown(&self, handle: &mut ResourceHandle) {
		if handle.torn_down {
			return;
		}
		handle.torn_down = true;

		let limit = self.settings.teardown_step_timeout();
		let slot = handle.slot;

		report(slot, "clear state", bounded(limit, "clear state", handle.context.clear_state()).await);
		report(slot, "close context", bounded(limit, "close context", handle.context.close()).await);
		report(slot, "close channel", bounded(limit, "close channel", handle.channel.close()).await);
		report(slot, "terminate", bounded(limit, "terminate", self.launcher.terminate(handle.pid)).await);

		debug!(target = "otpgate.resource", slot, pid = handle.pid, "resource torn down");
	}

	async fn terminate_quietly(&self, slot: usize, pid: u32) {
		let limit = self.settings.teardown_step_timeout();
		report(slot, "terminate", bounded(limit, "terminate", self.launcher.terminate(pid)).await);
	}
}

fn report(slot: usize, step: &str, result: BackendResult<()>) {
	if let Err(err) = result {
		warn!(target = "otpgate.resource", slot, step, error = %err, "teardown step failed");
	}
}

/// Runs `fut` with a deadline, mapping expiry to [`BackendError::Timeout`].
pub(crate) async fn bounded<T, F>(limit: Duration, condition: &str, fut: F) -> BackendResult<T>
where
	F: Future<Output = BackendResult<T>>,
{
	match tokio::time::timeout(limit, fut).await {
		Ok(result) => result,
		Err(_) => Err(BackendError::Timeout {
			condition: condition.to_string(),
			timeout: limit,
		}),
	}
}

#[cfg(test)]
mod tests;
