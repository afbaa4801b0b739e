//! Session table and per-entry leases.
//!
//! The table itself sits behind a short `parking_lot` lock that is never held
//! across an `.await`. Each entry has its own async lock; holding it is a
//! *lease*. Removal only happens through a lease, so an operation that holds
//! one can never see its entry vanish, and one that acquires a lease after
//! removal sees `removed` and backs off.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use otpgate_protocol::SessionId;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::pool::Slot;
use crate::resource::{PageDriver, ResourceHandle};
use crate::state::AuthState;

/// One stored login session.
#[derive(Debug)]
pub struct SessionEntry {
	identifier: SessionId,
	state: AuthState,
	otp_required: bool,
	pub otp_attempts: u32,
	slot: Option<Slot>,
	resource: Option<ResourceHandle>,
	created_at: Instant,
	removed: bool,
}

impl SessionEntry {
	/// A session waiting for its one-time code.
	pub fn awaiting_otp(identifier: SessionId, slot: Slot, resource: ResourceHandle) -> Self {
		Self {
			identifier,
			state: AuthState::NeedOtp,
			otp_required: true,
			otp_attempts: 0,
			slot: Some(slot),
			resource: Some(resource),
			created_at: Instant::now(),
			removed: false,
		}
	}

	pub fn identifier(&self) -> &SessionId {
		&self.identifier
	}

	pub fn state(&self) -> AuthState {
		self.state
	}

	/// Whether the site asked for a second factor. Sessions that logged in
	/// without one are never stored, so stored entries always carry `true`.
	pub fn otp_required(&self) -> bool {
		self.otp_required
	}

	pub fn created_at(&self) -> Instant {
		self.created_at
	}

	pub fn slot_index(&self) -> Option<usize> {
		self.slot.as_ref().map(Slot::index)
	}

	pub fn page(&self) -> Option<&dyn PageDriver> {
		self.resource.as_ref().map(ResourceHandle::page)
	}
}

/// What is left of an entry after removal: the slot and resource that must
/// still be torn down and released.
#[derive(Debug)]
pub struct DetachedSession {
	pub identifier: SessionId,
	/// State the entry was removed in.
	pub state: AuthState,
	pub otp_attempts: u32,
	pub age: Duration,
	pub slot: Option<Slot>,
	pub resource: Option<ResourceHandle>,
}

struct StoredEntry {
	created_at: Instant,
	entry: Arc<AsyncMutex<SessionEntry>>,
}

/// Exclusive access to a live entry.
pub struct SessionLease<'a> {
	store: &'a SessionStore,
	guard: OwnedMutexGuard<SessionEntry>,
}

impl SessionLease<'_> {
	/// Moves the entry to `next` if [`AuthState::can_transition_to`] allows it.
	/// Returns `false` and leaves the state alone otherwise.
	pub fn transition(&mut self, next: AuthState) -> bool {
		let entry = &mut *self.guard;
		if !entry.state.can_transition_to(next) {
			warn!(target = "otpgate.store", id = %entry.identifier, from = %entry.state, to = %next, "illegal state transition refused");
			return false;
		}
		trace!(target = "otpgate.store", id = %entry.identifier, from = %entry.state, to = %next, "state transition");
		entry.state = next;
		true
	}

	/// Deletes the entry from the table, recording `final_state`.
	///
	/// Removal always happens so the slot and resource can be reclaimed; an
	/// illegal `final_state` is logged and recorded as `Failed` instead.
	pub fn remove(mut self, final_state: AuthState) -> DetachedSession {
		let entry = &mut *self.guard;
		let final_state = if entry.state.can_transition_to(final_state) {
			final_state
		} else {
			warn!(target = "otpgate.store", id = %entry.identifier, from = %entry.state, to = %final_state, "illegal final state, recording FAILED");
			AuthState::Failed
		};
		entry.removed = true;
		entry.state = final_state;
		self.store.entries.lock().remove(&entry.identifier);
		trace!(target = "otpgate.store", id = %entry.identifier, state = %final_state, "entry removed");
		DetachedSession {
			identifier: entry.identifier.clone(),
			state: final_state,
			otp_attempts: entry.otp_attempts,
			age: entry.created_at.elapsed(),
			slot: entry.slot.take(),
			resource: entry.resource.take(),
		}
	}
}

impl Deref for SessionLease<'_> {
	type Target = SessionEntry;

	fn deref(&self) -> &SessionEntry {
		&self.guard
	}
}

impl DerefMut for SessionLease<'_> {
	fn deref_mut(&mut self) -> &mut SessionEntry {
		&mut self.guard
	}
}

/// Result of one expiry pass.
#[derive(Debug, Default)]
pub struct SweepReport {
	pub reclaimed: Vec<DetachedSession>,
	/// Expired entries skipped because an operation held their lease.
	pub busy: usize,
}

/// Table of live sessions keyed by identifier.
#[derive(Default)]
pub struct SessionStore {
	entries: Mutex<HashMap<SessionId, StoredEntry>>,
}

impl SessionStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, entry: SessionEntry) {
		let id = entry.identifier.clone();
		let stored = StoredEntry {
			created_at: entry.created_at,
			entry: Arc::new(AsyncMutex::new(entry)),
		};
		self.entries.lock().insert(id, stored);
	}

	/// Waits for exclusive access to `id`; `None` if it does not exist or
	/// was removed while waiting.
	pub async fn lease(&self, id: &SessionId) -> Option<SessionLease<'_>> {
		let entry = Arc::clone(&self.entries.lock().get(id)?.entry);
		let guard = entry.lock_owned().await;
		if guard.removed {
			return None;
		}
		Some(SessionLease { store: self, guard })
	}

	/// Removes every entry older than `ttl` whose lease is free.
	pub fn sweep(&self, ttl: Duration) -> SweepReport {
		let now = Instant::now();
		let candidates: Vec<Arc<AsyncMutex<SessionEntry>>> = self
			.entries
			.lock()
			.values()
			.filter(|stored| now.saturating_duration_since(stored.created_at) > ttl)
			.map(|stored| Arc::clone(&stored.entry))
			.collect();

		let mut report = SweepReport::default();
		for entry in candidates {
			match entry.try_lock_owned() {
				Ok(guard) if guard.removed => {}
				Ok(guard) => report.reclaimed.push(SessionLease { store: self, guard }.remove(AuthState::Expired)),
				Err(_) => report.busy += 1,
			}
		}
		report
	}

	/// Removes every entry, waiting for in-flight operations to finish.
	pub async fn drain(&self) -> Vec<DetachedSession> {
		let ids: Vec<SessionId> = self.entries.lock().keys().cloned().collect();
		let mut drained = Vec::with_capacity(ids.len());
		for id in ids {
			if let Some(lease) = self.lease(&id).await {
				drained.push(lease.remove(AuthState::Expired));
			}
		}
		drained
	}

	pub fn contains(&self, id: &SessionId) -> bool {
		self.entries.lock().contains_key(id)
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}
