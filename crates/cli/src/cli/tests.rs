use std::path::PathBuf;

use clap::Parser;

use super::*;

#[test]
fn parse_serve_with_overrides() {
	let cli = Cli::try_parse_from([
		"otpgate",
		"-vv",
		"--config",
		"/etc/otpgate.json",
		"serve",
		"--capacity",
		"4",
		"--chrome",
		"/usr/bin/chromium",
	])
	.unwrap();

	assert_eq!(cli.verbose, 2);
	assert_eq!(cli.config, Some(PathBuf::from("/etc/otpgate.json")));
	match cli.command {
		Commands::Serve(args) => {
			assert_eq!(args.capacity, Some(4));
			assert_eq!(args.chrome, Some(PathBuf::from("/usr/bin/chromium")));
			assert_eq!(args.listen, None);
			assert!(!args.headed);
		}
		_ => panic!("Expected Serve command"),
	}
}

#[test]
fn global_flags_after_subcommand() {
	let cli = Cli::try_parse_from(["otpgate", "config", "-v", "--config", "x.json"]).unwrap();
	assert_eq!(cli.verbose, 1);
	assert_eq!(cli.config, Some(PathBuf::from("x.json")));
	match cli.command {
		Commands::Config(args) => assert!(!args.write),
		_ => panic!("Expected Config command"),
	}
}

#[test]
fn config_accepts_serve_overrides() {
	let cli = Cli::try_parse_from(["otpgate", "config", "--queue-limit", "5", "--write"]).unwrap();
	match cli.command {
		Commands::Config(args) => {
			assert_eq!(args.overrides.queue_limit, Some(5));
			assert!(args.write);
		}
		_ => panic!("Expected Config command"),
	}
}

#[test]
fn bad_listen_address_is_rejected() {
	assert!(Cli::try_parse_from(["otpgate", "serve", "--listen", "not-an-addr"]).is_err());
}
