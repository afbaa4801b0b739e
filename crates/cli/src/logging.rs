use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Filter directive for a `-v` count; `RUST_LOG` overrides it.
pub fn default_filter(verbosity: u8) -> &'static str {
	// 0 = warnings, plus lifecycle info from the gate itself
	// 1 (-v) = gate debug (slot hand-off, teardown steps)
	// 2+ (-vv) = trace, including DevTools traffic
	match verbosity {
		0 => "warn,otpgate=info",
		1 => "info,otpgate=debug",
		_ => "debug,otpgate=trace",
	}
}

pub fn init_logging(verbosity: u8) {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_level_parses() {
		for verbosity in 0..4 {
			EnvFilter::try_new(default_filter(verbosity)).unwrap();
		}
	}
}
