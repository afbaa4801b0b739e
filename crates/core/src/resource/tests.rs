use std::path::PathBuf;

use super::*;
use crate::pool::SlotPool;
use crate::testing::FakeLauncher;

fn settings() -> GateSettings {
	GateSettings {
		base_port: 9400,
		profile_root: PathBuf::from("/tmp/otpgate-test"),
		connect_window_ms: 1_000,
		connect_interval_ms: 250,
		..Default::default()
	}
}

fn lifecycle(launcher: &FakeLauncher) -> ResourceLifecycle {
	ResourceLifecycle::new(Arc::new(launcher.clone()), settings())
}

#[tokio::test]
async fn binds_port_and_profile_to_slot() {
	let launcher = FakeLauncher::new();
	let lifecycle = lifecycle(&launcher);
	let pool = SlotPool::new(3, None);
	let first = pool.acquire().await.unwrap();
	let second = pool.acquire().await.unwrap();

	let mut handle = lifecycle.acquire_resource(&second).await.unwrap();
	assert_eq!(handle.slot(), 1);
	assert_eq!(handle.port(), 9401);
	let launches = launcher.launches();
	assert_eq!(launches[0].0, PathBuf::from("/tmp/otpgate-test/slot-1"));
	assert_eq!(launches[0].1, 9401);

	lifecycle.teardown(&mut handle).await;
	pool.release(first);
	pool.release(second);
}

#[tokio::test(start_paused = true)]
async fn connect_is_retried_within_window() {
	let launcher = FakeLauncher::new();
	launcher.fail_connects(3);
	let lifecycle = lifecycle(&launcher);
	let pool = SlotPool::new(1, None);
	let slot = pool.acquire().await.unwrap();

	let mut handle = lifecycle.acquire_resource(&slot).await.unwrap();
	assert_eq!(launcher.connect_attempts(), 4);

	lifecycle.teardown(&mut handle).await;
	pool.release(slot);
}

#[tokio::test(start_paused = true)]
async fn connect_window_exhaustion_terminates_process() {
	let launcher = FakeLauncher::new();
	launcher.fail_connects(u32::MAX);
	let lifecycle = lifecycle(&launcher);
	let pool = SlotPool::new(1, None);
	let slot = pool.acquire().await.unwrap();

	let err = lifecycle.acquire_resource(&slot).await.unwrap_err();
	assert!(matches!(err, GateError::ResourceAcquisition { slot: 0, .. }), "got {err:?}");
	// 0, 250, 500, 750 and 1000ms; a sixth attempt would fall past the deadline.
	assert_eq!(launcher.connect_attempts(), 5);
	assert_eq!(launcher.live_processes(), 0);
	assert_eq!(launcher.terminated().len(), 1);
	pool.release(slot);
}

#[tokio::test(start_paused = true)]
async fn stalled_connect_is_cut_off_at_the_window() {
	let launcher = FakeLauncher::new();
	launcher.hang_connects();
	let lifecycle = lifecycle(&launcher);
	let pool = SlotPool::new(1, None);
	let slot = pool.acquire().await.unwrap();

	let started = Instant::now();
	let err = tokio::time::timeout(Duration::from_secs(600), lifecycle.acquire_resource(&slot))
		.await
		.expect("acquisition outlived its connect window")
		.unwrap_err();
	assert!(matches!(err, GateError::ResourceAcquisition { slot: 0, .. }), "got {err:?}");
	assert!(started.elapsed() <= Duration::from_millis(1_000) + settings().teardown_step_timeout());
	assert_eq!(launcher.connect_attempts(), 1);
	assert_eq!(launcher.live_processes(), 0);
	pool.release(slot);
}

#[tokio::test]
async fn launch_failure_opens_nothing() {
	let launcher = FakeLauncher::new();
	launcher.fail_launch("no chrome here");
	let lifecycle = lifecycle(&launcher);
	let pool = SlotPool::new(1, None);
	let slot = pool.acquire().await.unwrap();

	let err = lifecycle.acquire_resource(&slot).await.unwrap_err();
	assert_eq!(err.code(), "resource_acquisition");
	assert_eq!(launcher.connect_attempts(), 0);
	assert!(launcher.terminated().is_empty());
	pool.release(slot);
}

#[tokio::test]
async fn context_failure_closes_channel_and_process() {
	let launcher = FakeLauncher::new();
	launcher.fail_context("target crashed");
	let lifecycle = lifecycle(&launcher);
	let pool = SlotPool::new(1, None);
	let slot = pool.acquire().await.unwrap();

	assert!(lifecycle.acquire_resource(&slot).await.is_err());
	assert_eq!(launcher.channels_closed(), 1);
	assert_eq!(launcher.live_processes(), 0);
	pool.release(slot);
}

#[tokio::test]
async fn teardown_runs_every_step_and_is_idempotent() {
	let launcher = FakeLauncher::new();
	launcher.fail_teardown_step("clear");
	let lifecycle = lifecycle(&launcher);
	let pool = SlotPool::new(1, None);
	let slot = pool.acquire().await.unwrap();

	let mut handle = lifecycle.acquire_resource(&slot).await.unwrap();
	lifecycle.teardown(&mut handle).await;
	lifecycle.teardown(&mut handle).await;

	assert!(handle.is_torn_down());
	assert_eq!(launcher.cleared(), 1);
	assert_eq!(launcher.contexts_closed(), 1);
	assert_eq!(launcher.channels_closed(), 1);
	assert_eq!(launcher.terminated(), vec![handle.pid()]);
	pool.release(slot);
}
