//! Broker and resource settings.

use std::path::PathBuf;
use std::time::Duration;

use otpgate_runtime::LaunchProfile;
use serde::{Deserialize, Serialize};

/// Tunables for the pool, store, sweeper and resource lifecycle.
///
/// Durations are stored in milliseconds so the JSON config stays flat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateSettings {
	/// Number of concurrent browser sessions.
	pub capacity: usize,
	/// Maximum queued acquirers; `None` queues without bound.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub queue_limit: Option<usize>,
	/// Incorrect codes allowed before a session fails.
	pub otp_attempt_limit: u32,
	pub session_ttl_ms: u64,
	pub sweep_interval_ms: u64,
	/// How long to keep retrying the DevTools endpoint after launch.
	pub connect_window_ms: u64,
	pub connect_interval_ms: u64,
	/// Bound on one login, verify or extract step.
	pub step_timeout_ms: u64,
	/// Bound on each individual teardown step.
	pub teardown_step_timeout_ms: u64,
	/// Slot `n` uses port `base_port + n`.
	pub base_port: u16,
	/// Slot `n` uses `<profile_root>/slot-<n>`.
	pub profile_root: PathBuf,
	pub browser: LaunchProfile,
}

impl Default for GateSettings {
	fn default() -> Self {
		let browser = LaunchProfile::default();
		Self {
			capacity: 3,
			queue_limit: None,
			otp_attempt_limit: 2,
			session_ttl_ms: 30_000,
			sweep_interval_ms: 10_000,
			connect_window_ms: 10_000,
			connect_interval_ms: 250,
			step_timeout_ms: 60_000,
			teardown_step_timeout_ms: 5_000,
			base_port: 9222,
			profile_root: browser.user_data_dir.clone(),
			browser,
		}
	}
}

impl GateSettings {
	pub fn session_ttl(&self) -> Duration {
		Duration::from_millis(self.session_ttl_ms)
	}

	pub fn sweep_interval(&self) -> Duration {
		Duration::from_millis(self.sweep_interval_ms)
	}

	pub fn connect_window(&self) -> Duration {
		Duration::from_millis(self.connect_window_ms)
	}

	pub fn connect_interval(&self) -> Duration {
		Duration::from_millis(self.connect_interval_ms)
	}

	pub fn step_timeout(&self) -> Duration {
		Duration::from_millis(self.step_timeout_ms)
	}

	pub fn teardown_step_timeout(&self) -> Duration {
		Duration::from_millis(self.teardown_step_timeout_ms)
	}

	/// Remote-debugging port reserved for `slot`.
	pub fn port_for(&self, slot: usize) -> u16 {
		self.base_port.saturating_add(slot as u16)
	}

	/// Profile directory reserved for `slot`.
	pub fn profile_dir_for(&self, slot: usize) -> PathBuf {
		self.profile_root.join(format!("slot-{}", slot))
	}

	/// Rejects settings the pool cannot run with.
	pub fn validate(&self) -> Result<(), String> {
		if self.capacity == 0 {
			return Err("capacity must be at least 1".into());
		}
		if self.otp_attempt_limit == 0 {
			return Err("otpAttemptLimit must be at least 1".into());
		}
		if self.sweep_interval_ms == 0 {
			return Err("sweepIntervalMs must be greater than 0".into());
		}
		if usize::from(self.base_port) + self.capacity > usize::from(u16::MAX) {
			return Err(format!("basePort {} leaves no room for {} slots", self.base_port, self.capacity));
		}
		Ok(())
	}
}
