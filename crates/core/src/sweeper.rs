//! Periodic reclamation of expired sessions.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::broker::Broker;

/// Spawns the sweeper loop. It ends when `shutdown` flips to `true`, its
/// sender is dropped, or the broker itself is gone.
pub(crate) fn spawn(broker: Weak<Broker>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		// The first tick completes immediately; nothing can be expired yet.
		ticker.tick().await;

		loop {
			tokio::select! {
				_ = ticker.tick() => {
					let Some(broker) = broker.upgrade() else { break };
					let reclaimed = broker.reclaim_expired().await;
					trace!(target = "otpgate.sweeper", reclaimed, "sweep finished");
				}
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						break;
					}
				}
			}
		}
		debug!(target = "otpgate.sweeper", "sweeper stopped");
	})
}
