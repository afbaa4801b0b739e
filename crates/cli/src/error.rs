use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("could not read config {path}")]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("could not write config {path}")]
	ConfigWrite {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("config {path} is not valid: {source}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("config {path} has schema version {found}; this build understands up to {supported}")]
	UnsupportedSchema { path: PathBuf, found: u32, supported: u32 },

	#[error("invalid settings: {0}")]
	InvalidSettings(String),

	#[error("failed to bind {addr}")]
	Bind {
		addr: SocketAddr,
		#[source]
		source: std::io::Error,
	},

	#[error("server error: {0}")]
	Serve(#[source] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}
