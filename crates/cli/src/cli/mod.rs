#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Root CLI.
#[derive(Parser, Debug)]
#[command(name = "otpgate")]
#[command(about = "Pooled browser logins with a two-phase one-time-code handshake")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v debug, -vv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Config file (default: $XDG_CONFIG_HOME/otpgate/config.json)
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the HTTP API until interrupted.
	Serve(ServeArgs),
	/// Print the effective configuration as JSON.
	Config(ConfigArgs),
}

/// Overrides applied on top of the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
	/// Address to listen on.
	#[arg(long, value_name = "ADDR")]
	pub listen: Option<SocketAddr>,

	/// Concurrent browser sessions.
	#[arg(long, value_name = "N")]
	pub capacity: Option<usize>,

	/// Callers allowed to wait for a slot before logins are turned away.
	#[arg(long, value_name = "N")]
	pub queue_limit: Option<usize>,

	/// Lifetime of a session waiting on its code, in milliseconds.
	#[arg(long, value_name = "MS")]
	pub session_ttl_ms: Option<u64>,

	/// Incorrect codes allowed per session.
	#[arg(long, value_name = "N")]
	pub otp_attempt_limit: Option<u32>,

	/// Remote-debugging port of slot 0.
	#[arg(long, value_name = "PORT")]
	pub base_port: Option<u16>,

	/// Directory holding the per-slot browser profiles.
	#[arg(long, value_name = "DIR")]
	pub profile_root: Option<PathBuf>,

	/// Browser executable.
	#[arg(long, value_name = "PATH")]
	pub chrome: Option<PathBuf>,

	/// Show browser windows.
	#[arg(long)]
	pub headed: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
	/// Apply the same overrides `serve` would.
	#[command(flatten)]
	pub overrides: ServeArgs,

	/// Write the effective configuration to the config path.
	#[arg(long)]
	pub write: bool,
}
