use std::path::PathBuf;
use std::time::Duration;

use otpgate_protocol::CredentialState;

use super::*;
use crate::testing::{FakeAccount, FakeLauncher, FakeScript};

fn settings(capacity: usize) -> GateSettings {
	GateSettings {
		capacity,
		profile_root: PathBuf::from("/tmp/otpgate-broker-test"),
		session_ttl_ms: 30_000,
		sweep_interval_ms: 10_000,
		step_timeout_ms: 5_000,
		..Default::default()
	}
}

fn script() -> Arc<FakeScript> {
	FakeScript::new()
		.with_account("alice", FakeAccount::new("alice", "pw", Some("111111")))
		.with_account("bob", FakeAccount::new("bob", "pw", Some("222222")))
		.with_account("carol", FakeAccount::new("carol", "pw", Some("333333")))
		.with_account("dave", FakeAccount::new("dave", "pw", Some("444444")))
		.with_account("erin", FakeAccount::new("erin", "pw", None))
}

fn broker(capacity: usize, launcher: &FakeLauncher, script: &Arc<FakeScript>) -> Arc<Broker> {
	Broker::new(settings(capacity), Arc::new(launcher.clone()), script.clone())
}

async fn need_otp(broker: &Arc<Broker>, user: &str) -> SessionId {
	let reply = broker.submit_credentials(Credentials::new(user, "pw")).await.unwrap();
	assert_eq!(reply.state, CredentialState::NeedOtp, "{reply:?}");
	reply.identifier.unwrap()
}

#[tokio::test(start_paused = true)]
async fn verified_session_is_consumed_exactly_once() {
	let launcher = FakeLauncher::new();
	let script = script();
	let broker = broker(3, &launcher, &script);

	let id = need_otp(&broker, "alice").await;
	let info = broker.inspect(&id).await.unwrap();
	assert_eq!(info.state, AuthState::NeedOtp);
	assert_eq!(info.otp_attempts, 0);
	assert!(info.otp_required);
	assert!(info.slot.is_some());

	let reply = broker.submit_otp(id.clone(), "111111".into()).await.unwrap();
	assert_eq!(reply.state, OtpState::Verified);
	assert_eq!(broker.inspect(&id).await.unwrap().state, AuthState::Verified);

	let details = broker.consume(id.clone()).await.unwrap();
	assert_eq!(details.id, "alice");
	assert_eq!(details.name, "Member alice");

	let again = broker.consume(id.clone()).await.unwrap_err();
	assert!(matches!(again, GateError::SessionNotFound), "got {again:?}");
	assert_eq!(again.code(), "not_found");

	let status = broker.status();
	assert_eq!((status.occupied, status.sessions), (0, 0));
	assert_eq!(launcher.live_processes(), 0);
	assert_eq!(launcher.cleared(), 1);
}

#[tokio::test(start_paused = true)]
async fn fourth_login_waits_for_a_released_slot() {
	let launcher = FakeLauncher::new();
	let script = script();
	let broker = broker(3, &launcher, &script);

	let mut handles = Vec::new();
	for user in ["alice", "bob", "carol", "dave"] {
		let broker = Arc::clone(&broker);
		handles.push((
			user,
			tokio::spawn(async move { broker.submit_credentials(Credentials::new(user, "pw")).await }),
		));
	}
	tokio::time::sleep(Duration::from_millis(100)).await;

	let status = broker.status();
	assert_eq!((status.occupied, status.waiting, status.sessions), (3, 1, 3));

	let mut finished = Vec::new();
	let mut blocked = None;
	for (user, handle) in handles {
		if handle.is_finished() {
			let reply = handle.await.unwrap().unwrap();
			assert_eq!(reply.state, CredentialState::NeedOtp);
			finished.push((user, reply.identifier.unwrap()));
		} else {
			blocked = Some((user, handle));
		}
	}
	assert_eq!(finished.len(), 3);
	let (_, blocked) = blocked.expect("one login should still be queued");

	// Drive one session to a terminal state; its slot goes to the queued login.
	let (user, id) = &finished[0];
	let code = match *user {
		"alice" => "111111",
		"bob" => "222222",
		"carol" => "333333",
		_ => "444444",
	};
	assert_eq!(broker.submit_otp(id.clone(), code.into()).await.unwrap().state, OtpState::Verified);
	broker.consume(id.clone()).await.unwrap();

	let reply = tokio::time::timeout(Duration::from_secs(1), blocked).await.unwrap().unwrap().unwrap();
	assert_eq!(reply.state, CredentialState::NeedOtp);
	let status = broker.status();
	assert_eq!((status.occupied, status.waiting, status.sessions), (3, 0, 3));
	assert_eq!(launcher.launches().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn rejected_credentials_release_everything() {
	let launcher = FakeLauncher::new();
	let script = script();
	let broker = broker(1, &launcher, &script);

	let reply = broker.submit_credentials(Credentials::new("alice", "wrong")).await.unwrap();
	assert_eq!(reply.state, CredentialState::Failed);
	assert_eq!(reply.reason.as_deref(), Some("credential_rejected"));
	assert!(reply.identifier.is_none());

	let status = broker.status();
	assert_eq!((status.occupied, status.sessions), (0, 0));
	assert_eq!(launcher.live_processes(), 0);

	// The single slot is free again.
	need_otp(&broker, "alice").await;
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_reclaimed_by_sweeper() {
	let launcher = FakeLauncher::new();
	let script = script();
	let broker = broker(1, &launcher, &script);

	let id = need_otp(&broker, "alice").await;
	assert_eq!(broker.status().occupied, 1);

	tokio::time::sleep(Duration::from_secs(41)).await;

	let status = broker.status();
	assert_eq!((status.occupied, status.sessions), (0, 0));
	assert_eq!(launcher.live_processes(), 0);

	let reply = broker.submit_otp(id, "111111".into()).await.unwrap();
	assert_eq!(reply.state, OtpState::Invalid);
	assert_eq!(script.verifies(), 0);
}

#[tokio::test(start_paused = true)]
async fn young_sessions_survive_the_sweep() {
	let launcher = FakeLauncher::new();
	let script = script();
	let broker = broker(1, &launcher, &script);

	let id = need_otp(&broker, "alice").await;
	tokio::time::sleep(Duration::from_secs(25)).await;
	assert_eq!(broker.reclaim_expired().await, 0);
	assert!(broker.inspect(&id).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn wrong_codes_retry_then_fail() {
	let launcher = FakeLauncher::new();
	let script = script();
	let broker = broker(1, &launcher, &script);
	let id = need_otp(&broker, "alice").await;

	let first = broker.submit_otp(id.clone(), "000000".into()).await.unwrap();
	assert_eq!(first.state, OtpState::Retry);
	assert_eq!(first.attempts_remaining, Some(1));
	let info = broker.inspect(&id).await.unwrap();
	assert_eq!((info.state, info.otp_attempts), (AuthState::NeedOtp, 1));
	assert_eq!(broker.status().occupied, 1);

	let second = broker.submit_otp(id.clone(), "000000".into()).await.unwrap();
	assert_eq!(second.state, OtpState::Failed);
	assert!(broker.inspect(&id).await.is_none());
	assert_eq!(broker.status().occupied, 0);
	assert_eq!(launcher.live_processes(), 0);

	let third = broker.submit_otp(id, "111111".into()).await.unwrap();
	assert_eq!(third.state, OtpState::Invalid);
}

#[tokio::test(start_paused = true)]
async fn correct_code_after_a_miss_verifies() {
	let launcher = FakeLauncher::new();
	let script = script();
	let broker = broker(1, &launcher, &script);
	let id = need_otp(&broker, "bob").await;

	broker.submit_otp(id.clone(), "999999".into()).await.unwrap();
	let reply = broker.submit_otp(id.clone(), "222222".into()).await.unwrap();
	assert_eq!(reply.state, OtpState::Verified);
	assert_eq!(broker.inspect(&id).await.unwrap().otp_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn resend_leaves_state_untouched() {
	let launcher = FakeLauncher::new();
	let script = script();
	let broker = broker(1, &launcher, &script);
	let id = need_otp(&broker, "alice").await;
	broker.submit_otp(id.clone(), "000000".into()).await.unwrap();

	let before = broker.inspect(&id).await.unwrap();
	assert!(broker.resend_otp(id.clone()).await.unwrap().ok);
	assert_eq!(broker.inspect(&id).await.unwrap(), before);
	assert_eq!(script.resends(), 1);

	broker.submit_otp(id.clone(), "111111".into()).await.unwrap();
	assert!(!broker.resend_otp(id.clone()).await.unwrap().ok);
	assert_eq!(script.resends(), 1);

	let missing = broker.resend_otp(SessionId::generate()).await.unwrap_err();
	assert!(matches!(missing, GateError::SessionNotFound));
}

#[tokio::test(start_paused = true)]
async fn failed_resend_keeps_the_session() {
	let launcher = FakeLauncher::new();
	let script = script();
	script.fail("resend");
	let broker = broker(1, &launcher, &script);
	let id = need_otp(&broker, "alice").await;

	assert!(!broker.resend_otp(id.clone()).await.unwrap().ok);
	assert_eq!(broker.inspect(&id).await.unwrap().state, AuthState::NeedOtp);
}

#[tokio::test(start_paused = true)]
async fn consume_requires_verification() {
	let launcher = FakeLauncher::new();
	let script = script();
	let broker = broker(1, &launcher, &script);
	let id = need_otp(&broker, "alice").await;

	let err = broker.consume(id.clone()).await.unwrap_err();
	assert!(matches!(err, GateError::SessionNotVerified), "got {err:?}");
	assert_eq!(broker.inspect(&id).await.unwrap().state, AuthState::NeedOtp);
	assert_eq!(script.extracts(), 0);
}

#[tokio::test(start_paused = true)]
async fn login_without_second_factor_bypasses_the_store() {
	let launcher = FakeLauncher::new();
	let script = script();
	let broker = broker(1, &launcher, &script);

	let reply = broker.submit_credentials(Credentials::new("erin", "pw")).await.unwrap();
	assert_eq!(reply.state, CredentialState::Success);
	assert!(reply.identifier.is_none());
	assert_eq!(reply.result.unwrap().id, "erin");

	let status = broker.status();
	assert_eq!((status.occupied, status.sessions), (0, 0));
	assert_eq!(launcher.live_processes(), 0);
}

#[tokio::test(start_paused = true)]
async fn resource_failure_is_reported_and_slot_freed() {
	let launcher = FakeLauncher::new();
	launcher.fail_launch("no browser");
	let script = script();
	let broker = broker(1, &launcher, &script);

	let reply = broker.submit_credentials(Credentials::new("alice", "pw")).await.unwrap();
	assert_eq!(reply.state, CredentialState::Failed);
	assert_eq!(reply.reason.as_deref(), Some("resource_acquisition"));
	assert_eq!(broker.status().occupied, 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_connect_fails_the_login_and_frees_the_slot() {
	let launcher = FakeLauncher::new();
	launcher.hang_connects();
	let script = script();
	let broker = broker(1, &launcher, &script);

	let reply = tokio::time::timeout(
		Duration::from_secs(600),
		broker.submit_credentials(Credentials::new("alice", "pw")),
	)
	.await
	.expect("login hung on connect")
	.unwrap();
	assert_eq!(reply.state, CredentialState::Failed);
	assert_eq!(reply.reason.as_deref(), Some("resource_acquisition"));
	assert_eq!(broker.status().occupied, 0);
	assert_eq!(launcher.live_processes(), 0);
}

#[tokio::test(start_paused = true)]
async fn hung_login_times_out_and_tears_down() {
	let launcher = FakeLauncher::new();
	let script = script();
	script.hang("login");
	let broker = broker(1, &launcher, &script);

	let reply = broker.submit_credentials(Credentials::new("alice", "pw")).await.unwrap();
	assert_eq!(reply.state, CredentialState::Failed);
	assert_eq!(reply.reason.as_deref(), Some("step_timeout"));
	assert_eq!(broker.status().occupied, 0);
	assert_eq!(launcher.live_processes(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_code_input_fails_the_session() {
	let launcher = FakeLauncher::new();
	let mut account = FakeAccount::new("alice", "pw", Some("111111"));
	account.otp_input_missing = true;
	let script = FakeScript::new().with_account("alice", account);
	let broker = broker(1, &launcher, &script);
	let id = need_otp(&broker, "alice").await;

	let reply = broker.submit_otp(id.clone(), "111111".into()).await.unwrap();
	assert_eq!(reply.state, OtpState::Failed);
	assert!(broker.inspect(&id).await.is_none());
	assert_eq!(broker.status().occupied, 0);
}

#[tokio::test(start_paused = true)]
async fn extraction_failure_still_consumes() {
	let launcher = FakeLauncher::new();
	let script = script();
	let broker = broker(1, &launcher, &script);
	let id = need_otp(&broker, "alice").await;
	broker.submit_otp(id.clone(), "111111".into()).await.unwrap();
	script.fail("extract");

	let err = broker.consume(id.clone()).await.unwrap_err();
	assert_eq!(err.code(), "script_error");
	assert!(matches!(broker.consume(id).await, Err(GateError::SessionNotFound)));
	assert_eq!(broker.status().occupied, 0);
	assert_eq!(launcher.live_processes(), 0);
}

#[tokio::test(start_paused = true)]
async fn sweeper_skips_sessions_with_an_operation_in_flight() {
	let launcher = FakeLauncher::new();
	let script = script();
	let mut settings = settings(1);
	settings.step_timeout_ms = 60_000;
	let broker = Broker::new(settings, Arc::new(launcher.clone()), script.clone());
	let id = need_otp(&broker, "alice").await;

	script.hang("verify");
	let pending = {
		let broker = Arc::clone(&broker);
		let id = id.clone();
		tokio::spawn(async move { broker.submit_otp(id, "111111".into()).await })
	};

	// Past the TTL, but the verify call holds the lease.
	tokio::time::sleep(Duration::from_secs(45)).await;
	assert_eq!(broker.status().sessions, 1);
	assert!(!pending.is_finished());

	let reply = pending.await.unwrap().unwrap();
	assert_eq!(reply.state, OtpState::Failed);
	let status = broker.status();
	assert_eq!((status.occupied, status.sessions), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn abandoned_caller_does_not_leak_the_slot() {
	let launcher = FakeLauncher::new();
	let script = script();
	let broker = broker(1, &launcher, &script);

	let caller = {
		let broker = Arc::clone(&broker);
		tokio::spawn(async move { broker.submit_credentials(Credentials::new("alice", "pw")).await })
	};
	while broker.status().occupied == 0 {
		tokio::task::yield_now().await;
	}
	caller.abort();

	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(broker.status().sessions, 1);

	tokio::time::sleep(Duration::from_secs(41)).await;
	let status = broker.status();
	assert_eq!((status.occupied, status.sessions), (0, 0));
	assert_eq!(launcher.live_processes(), 0);
}

#[tokio::test(start_paused = true)]
async fn queue_limit_turns_excess_logins_away() {
	let launcher = FakeLauncher::new();
	let script = script();
	let mut settings = settings(1);
	settings.queue_limit = Some(0);
	let broker = Broker::new(settings, Arc::new(launcher.clone()), script.clone());
	need_otp(&broker, "alice").await;

	let err = broker.submit_credentials(Credentials::new("bob", "pw")).await.unwrap_err();
	assert!(matches!(err, GateError::PoolSaturated { capacity: 1, waiting: 0 }), "got {err:?}");
	assert_eq!(launcher.launches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_sessions_and_rejects_waiters() {
	let launcher = FakeLauncher::new();
	let script = script();
	let broker = broker(1, &launcher, &script);
	need_otp(&broker, "alice").await;

	let queued = {
		let broker = Arc::clone(&broker);
		tokio::spawn(async move { broker.submit_credentials(Credentials::new("bob", "pw")).await })
	};
	tokio::time::sleep(Duration::from_millis(10)).await;
	assert_eq!(broker.status().waiting, 1);

	broker.shutdown().await;
	assert!(matches!(queued.await.unwrap(), Err(GateError::ShuttingDown)));

	let status = broker.status();
	assert_eq!((status.occupied, status.sessions), (0, 0));
	assert_eq!(launcher.live_processes(), 0);
	assert!(broker.is_shutting_down());
	assert!(matches!(
		broker.submit_credentials(Credentials::new("carol", "pw")).await,
		Err(GateError::ShuttingDown)
	));

	broker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn login_finishing_during_shutdown_is_torn_down() {
	let launcher = FakeLauncher::new();
	let script = script();
	script.delay("login", Duration::from_secs(1));
	let broker = broker(1, &launcher, &script);

	let login = {
		let broker = Arc::clone(&broker);
		tokio::spawn(async move { broker.submit_credentials(Credentials::new("alice", "pw")).await })
	};
	tokio::time::sleep(Duration::from_millis(10)).await;
	assert_eq!(broker.status().occupied, 1);

	broker.shutdown().await;
	assert!(matches!(login.await.unwrap(), Err(GateError::ShuttingDown)));

	let status = broker.status();
	assert_eq!((status.occupied, status.sessions), (0, 0));
	assert_eq!(launcher.live_processes(), 0);
	assert_eq!(launcher.terminated().len(), 1);
}
