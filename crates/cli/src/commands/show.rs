use std::path::Path;

use crate::config::{self, AppConfig};
use crate::error::{CliError, Result};

/// Prints the effective configuration, optionally persisting it.
pub fn execute(effective: &AppConfig, path: Option<&Path>, write: bool) -> Result<()> {
	effective.validate()?;
	println!("{}", serde_json::to_string_pretty(effective)?);

	if write {
		let target = match path {
			Some(path) => path.to_path_buf(),
			None => config::default_path()
				.ok_or_else(|| CliError::InvalidSettings("no config directory on this platform; pass --config".into()))?,
		};
		config::save(&target, effective)?;
		eprintln!("wrote {}", target.display());
	}
	Ok(())
}
