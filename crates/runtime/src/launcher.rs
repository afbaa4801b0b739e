//! Browser process launch and termination.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How a browser process is launched for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchProfile {
	/// Explicit executable; platform candidates are searched when unset.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub executable: Option<PathBuf>,
	/// Profile directory passed as `--user-data-dir`.
	pub user_data_dir: PathBuf,
	pub headless: bool,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub extra_args: Vec<String>,
}

impl Default for LaunchProfile {
	fn default() -> Self {
		Self {
			executable: None,
			user_data_dir: std::env::temp_dir().join("otpgate-profiles"),
			headless: true,
			extra_args: Vec::new(),
		}
	}
}

impl LaunchProfile {
	/// Returns a copy rooted at `dir` instead of the configured profile directory.
	pub fn with_user_data_dir(&self, dir: impl Into<PathBuf>) -> Self {
		Self {
			user_data_dir: dir.into(),
			..self.clone()
		}
	}
}

/// A spawned browser process.
#[derive(Debug)]
pub struct BrowserProcess {
	pid: u32,
	child: Child,
}

impl BrowserProcess {
	pub fn pid(&self) -> u32 {
		self.pid
	}

	/// Returns the exit status if the process already exited.
	pub fn try_exit_status(&mut self) -> Option<std::process::ExitStatus> {
		self.child.try_wait().ok().flatten()
	}

	/// Hands the child to a blocking task that reaps it once it exits.
	pub fn reap_in_background(self) {
		let pid = self.pid;
		let mut child = self.child;
		tokio::task::spawn_blocking(move || match child.wait() {
			Ok(status) => debug!(target = "otpgate.runtime", pid, %status, "browser process exited"),
			Err(err) => debug!(target = "otpgate.runtime", pid, error = %err, "failed waiting on browser process"),
		});
	}
}

/// Builds the command-line arguments for a debugging-enabled browser.
pub fn launch_args(profile: &LaunchProfile, port: u16) -> Vec<String> {
	let mut args = vec![
		format!("--remote-debugging-port={}", port),
		format!("--user-data-dir={}", profile.user_data_dir.display()),
		"--no-first-run".to_string(),
		"--no-default-browser-check".to_string(),
	];
	if profile.headless {
		args.push("--headless=new".to_string());
	}
	args.extend(profile.extra_args.iter().cloned());
	args
}

/// Spawns a browser bound to `port` using `profile`.
///
/// The process runs in its own process group so terminal signals aimed at the
/// gate do not reach it; it is stopped explicitly through [`terminate`].
pub fn launch(profile: &LaunchProfile, port: u16) -> Result<BrowserProcess> {
	let executable = match &profile.executable {
		Some(path) => path.clone(),
		None => find_chrome_executable().map(PathBuf::from).ok_or(Error::ExecutableNotFound)?,
	};

	std::fs::create_dir_all(&profile.user_data_dir)?;

	let args = launch_args(profile, port);
	let mut cmd = Command::new(&executable);
	cmd.args(&args).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

	#[cfg(unix)]
	std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

	let child = cmd
		.spawn()
		.map_err(|e| Error::LaunchFailed(format!("{}: {}", executable.display(), e)))?;
	let pid = child.id();

	debug!(
		target = "otpgate.runtime",
		pid,
		port,
		executable = %executable.display(),
		profile = %profile.user_data_dir.display(),
		"launched browser"
	);

	Ok(BrowserProcess { pid, child })
}

/// Sends a termination signal to the browser process `pid`.
pub fn terminate(pid: u32) -> Result<()> {
	#[cfg(unix)]
	let status = Command::new("kill").args(["-TERM", &pid.to_string()]).status();

	#[cfg(windows)]
	let status = Command::new("taskkill").args(["/PID", &pid.to_string(), "/F"]).status();

	match status {
		Ok(status) if status.success() => {
			debug!(target = "otpgate.runtime", pid, "terminated browser process");
			Ok(())
		}
		Ok(status) => Err(Error::TerminateFailed {
			pid,
			message: format!("exit status {}", status),
		}),
		Err(err) => Err(Error::TerminateFailed {
			pid,
			message: err.to_string(),
		}),
	}
}

/// Locates a Chromium-family executable for the current platform.
pub fn find_chrome_executable() -> Option<String> {
	let candidates: Vec<String> = if cfg!(target_os = "macos") {
		vec![
			"/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
			"/Applications/Chromium.app/Contents/MacOS/Chromium",
			"/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
		]
		.into_iter()
		.map(str::to_string)
		.collect()
	} else if cfg!(target_os = "windows") {
		windows_browser_candidates()
	} else {
		vec![
			"google-chrome-stable",
			"google-chrome",
			"chromium-browser",
			"chromium",
			"/usr/bin/google-chrome-stable",
			"/usr/bin/google-chrome",
			"/usr/bin/chromium-browser",
			"/usr/bin/chromium",
			"/snap/bin/chromium",
		]
		.into_iter()
		.map(str::to_string)
		.collect()
	};

	for candidate in candidates {
		if is_path_like(&candidate) {
			if Path::new(&candidate).exists() {
				return Some(candidate);
			}
		} else if which::which(&candidate).is_ok() {
			return Some(candidate);
		}
	}

	warn!(target = "otpgate.runtime", "no Chrome/Chromium executable found");
	None
}

fn is_path_like(candidate: &str) -> bool {
	candidate.starts_with('/') || candidate.contains('\\') || candidate.contains(':')
}

fn windows_browser_candidates() -> Vec<String> {
	let mut roots = Vec::new();
	for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
		if let Ok(value) = std::env::var(key) {
			roots.push(PathBuf::from(value));
		}
	}
	if roots.is_empty() {
		roots.push(PathBuf::from(r"C:\Program Files"));
		roots.push(PathBuf::from(r"C:\Program Files (x86)"));
	}

	let suffixes: &[&[&str]] = &[
		&["Google", "Chrome", "Application", "chrome.exe"],
		&["Microsoft", "Edge", "Application", "msedge.exe"],
		&["Chromium", "Application", "chrome.exe"],
	];

	let mut candidates = Vec::new();
	for root in roots {
		for suffix in suffixes {
			let mut path = root.clone();
			for component in *suffix {
				path.push(component);
			}
			candidates.push(path.to_string_lossy().to_string());
		}
	}
	candidates.extend(["chrome.exe".to_string(), "msedge.exe".to_string()]);
	candidates
}
