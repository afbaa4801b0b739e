mod serve;
mod show;

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::Result;

pub use serve::serve;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let mut config = AppConfig::load(cli.config.as_deref())?;

	match cli.command {
		Commands::Serve(args) => {
			config.apply(&args);
			serve(config).await
		}
		Commands::Config(args) => {
			config.apply(&args.overrides);
			show::execute(&config, cli.config.as_deref(), args.write)
		}
	}
}
