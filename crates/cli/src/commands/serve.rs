use std::sync::Arc;
use std::time::Duration;

use otpgate::cdp::CdpLauncher;
use otpgate::{Broker, PortalScript};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api;
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Runs the API until Ctrl-C, then shuts the broker down.
pub async fn serve(config: AppConfig) -> Result<()> {
	config.validate()?;

	let launcher = CdpLauncher::new(config.gate.browser.clone(), Duration::from_millis(config.call_timeout_ms));
	let script = PortalScript::new(config.portal.clone());
	let broker = Broker::new(config.gate.clone(), Arc::new(launcher), Arc::new(script));

	let listener = TcpListener::bind(config.listen).await.map_err(|source| CliError::Bind {
		addr: config.listen,
		source,
	})?;
	info!(target = "otpgate.api", addr = %config.listen, capacity = config.gate.capacity, "listening");

	let served = axum::serve(listener, api::router(Arc::clone(&broker)))
		.with_graceful_shutdown(interrupted())
		.await;

	broker.shutdown().await;
	served.map_err(CliError::Serve)
}

async fn interrupted() {
	match tokio::signal::ctrl_c().await {
		Ok(()) => info!(target = "otpgate.api", "interrupt received, shutting down"),
		Err(err) => warn!(target = "otpgate.api", error = %err, "cannot listen for interrupt; shutting down"),
	}
}
