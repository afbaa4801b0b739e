//! Configuration file for `otpgate serve`.
//!
//! A camelCase JSON document, looked up at `--config` or
//! `$XDG_CONFIG_HOME/otpgate/config.json`. Every field is optional.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use otpgate::{GateSettings, PortalSelectors};
use serde::{Deserialize, Serialize};

use crate::cli::ServeArgs;
use crate::error::{CliError, Result};

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
	SCHEMA_VERSION
}

fn default_listen() -> SocketAddr {
	SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_call_timeout_ms() -> u64 {
	30_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
	#[serde(default = "default_schema_version")]
	pub schema_version: u32,
	/// Address the HTTP API listens on.
	#[serde(default = "default_listen")]
	pub listen: SocketAddr,
	/// Per-call timeout on the DevTools connection.
	#[serde(default = "default_call_timeout_ms")]
	pub call_timeout_ms: u64,
	#[serde(default)]
	pub gate: GateSettings,
	#[serde(default)]
	pub portal: PortalSelectors,
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			schema_version: SCHEMA_VERSION,
			listen: default_listen(),
			call_timeout_ms: default_call_timeout_ms(),
			gate: GateSettings::default(),
			portal: PortalSelectors::default(),
		}
	}
}

impl AppConfig {
	/// Loads `explicit`, or the default location when `None`.
	///
	/// A missing file at the default location yields defaults; a missing
	/// explicit file is an error.
	pub fn load(explicit: Option<&Path>) -> Result<Self> {
		match explicit {
			Some(path) => Self::read(path),
			None => match default_path() {
				Some(path) if path.exists() => Self::read(&path),
				_ => Ok(Self::default()),
			},
		}
	}

	fn read(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
			path: path.to_path_buf(),
			source,
		})?;
		Self::parse(path, &content)
	}

	fn parse(path: &Path, content: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(content).map_err(|source| CliError::ConfigParse {
			path: path.to_path_buf(),
			source,
		})?;
		if config.schema_version > SCHEMA_VERSION {
			return Err(CliError::UnsupportedSchema {
				path: path.to_path_buf(),
				found: config.schema_version,
				supported: SCHEMA_VERSION,
			});
		}
		Ok(config)
	}

	/// Applies command-line overrides on top of file values.
	pub fn apply(&mut self, args: &ServeArgs) {
		if let Some(listen) = args.listen {
			self.listen = listen;
		}
		if let Some(capacity) = args.capacity {
			self.gate.capacity = capacity;
		}
		if let Some(limit) = args.queue_limit {
			self.gate.queue_limit = Some(limit);
		}
		if let Some(ttl) = args.session_ttl_ms {
			self.gate.session_ttl_ms = ttl;
		}
		if let Some(limit) = args.otp_attempt_limit {
			self.gate.otp_attempt_limit = limit;
		}
		if let Some(port) = args.base_port {
			self.gate.base_port = port;
		}
		if let Some(ref dir) = args.profile_root {
			self.gate.profile_root = dir.clone();
		}
		if let Some(ref chrome) = args.chrome {
			self.gate.browser.executable = Some(chrome.clone());
		}
		if args.headed {
			self.gate.browser.headless = false;
		}
	}

	pub fn validate(&self) -> Result<()> {
		self.gate.validate().map_err(CliError::InvalidSettings)?;
		if self.call_timeout_ms == 0 {
			return Err(CliError::InvalidSettings("callTimeoutMs must be greater than 0".into()));
		}
		Ok(())
	}
}

/// `$XDG_CONFIG_HOME/otpgate/config.json` or the platform equivalent.
pub fn default_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("otpgate").join("config.json"))
}

/// Writes `config` as pretty JSON, creating parent directories.
pub fn save(path: &Path, config: &AppConfig) -> Result<()> {
	let write_err = |source| CliError::ConfigWrite {
		path: path.to_path_buf(),
		source,
	};
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).map_err(write_err)?;
	}
	fs::write(path, serde_json::to_string_pretty(config)?).map_err(write_err)
}

#[cfg(test)]
mod tests {
	use clap::Parser;
	use tempfile::TempDir;

	use super::*;
	use crate::cli::{Cli, Commands};

	#[test]
	fn missing_fields_take_defaults() {
		let config = AppConfig::parse(Path::new("inline"), r#"{ "gate": { "capacity": 5 } }"#).unwrap();
		assert_eq!(config.schema_version, SCHEMA_VERSION);
		assert_eq!(config.listen, default_listen());
		assert_eq!(config.gate.capacity, 5);
		assert_eq!(config.gate.otp_attempt_limit, 2);
		assert_eq!(config.portal, PortalSelectors::default());
	}

	#[test]
	fn newer_schema_is_rejected() {
		let err = AppConfig::parse(Path::new("inline"), r#"{ "schemaVersion": 99 }"#).unwrap_err();
		assert!(matches!(err, CliError::UnsupportedSchema { found: 99, .. }), "got {err:?}");
	}

	#[test]
	fn malformed_file_names_the_path() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("config.json");
		fs::write(&path, "{ not json").unwrap();

		let err = AppConfig::load(Some(&path)).unwrap_err();
		assert!(err.to_string().contains("config.json"), "got {err}");
	}

	#[test]
	fn explicit_missing_file_is_an_error() {
		let tmp = TempDir::new().unwrap();
		let err = AppConfig::load(Some(&tmp.path().join("absent.json"))).unwrap_err();
		assert!(matches!(err, CliError::ConfigRead { .. }));
	}

	#[test]
	fn save_then_load_keeps_overrides() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("nested").join("config.json");
		let mut config = AppConfig::default();
		config.gate.session_ttl_ms = 45_000;
		config.portal.currency = "NZD".into();

		save(&path, &config).unwrap();
		assert_eq!(AppConfig::load(Some(&path)).unwrap(), config);
	}

	#[test]
	fn flags_override_file_values() {
		let cli = Cli::try_parse_from([
			"otpgate",
			"serve",
			"--listen",
			"0.0.0.0:9000",
			"--capacity",
			"6",
			"--queue-limit",
			"12",
			"--headed",
		])
		.unwrap();
		let Commands::Serve(args) = cli.command else {
			panic!("expected serve");
		};

		let mut config = AppConfig::default();
		config.gate.capacity = 2;
		config.apply(&args);
		assert_eq!(config.listen, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
		assert_eq!(config.gate.capacity, 6);
		assert_eq!(config.gate.queue_limit, Some(12));
		assert!(!config.gate.browser.headless);
		assert_eq!(config.gate.session_ttl_ms, 30_000);
	}

	#[test]
	fn zero_capacity_fails_validation() {
		let mut config = AppConfig::default();
		config.gate.capacity = 0;
		assert!(matches!(config.validate(), Err(CliError::InvalidSettings(_))));
	}
}
