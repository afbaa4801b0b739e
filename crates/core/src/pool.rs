//! Bounded slot pool with FIFO handoff.
//!
//! A [`Slot`] is a move-only token: `acquire` mints it, `release` consumes it.
//! On release the index is handed straight to the oldest waiter when one
//! exists, so the occupied count only drops when nobody is queued.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{GateError, Result};

/// Exclusive right to one slot index.
#[derive(Debug)]
#[must_use = "a slot must be released back to its pool"]
pub struct Slot {
	index: usize,
}

impl Slot {
	pub fn index(&self) -> usize {
		self.index
	}
}

struct Waiter {
	id: u64,
	tx: oneshot::Sender<usize>,
}

struct PoolState {
	occupied: Vec<bool>,
	waiters: VecDeque<Waiter>,
	next_waiter: u64,
	closed: bool,
}

/// Fixed-capacity pool of slot indices `0..capacity`.
pub struct SlotPool {
	capacity: usize,
	queue_limit: Option<usize>,
	state: Mutex<PoolState>,
}

impl SlotPool {
	pub fn new(capacity: usize, queue_limit: Option<usize>) -> Self {
		Self {
			capacity,
			queue_limit,
			state: Mutex::new(PoolState {
				occupied: vec![false; capacity],
				waiters: VecDeque::new(),
				next_waiter: 0,
				closed: false,
			}),
		}
	}

	/// Takes a free slot, or queues until a release hands one over.
	pub async fn acquire(&self) -> Result<Slot> {
		let (id, rx) = {
			let mut state = self.state.lock();
			if state.closed {
				return Err(GateError::ShuttingDown);
			}
			if let Some(index) = state.occupied.iter().position(|busy| !*busy) {
				state.occupied[index] = true;
				trace!(target = "otpgate.pool", slot = index, "slot acquired");
				return Ok(Slot { index });
			}
			if let Some(limit) = self.queue_limit {
				if state.waiters.len() >= limit {
					return Err(GateError::PoolSaturated {
						capacity: self.capacity,
						waiting: state.waiters.len(),
					});
				}
			}
			let id = state.next_waiter;
			state.next_waiter += 1;
			let (tx, rx) = oneshot::channel();
			state.waiters.push_back(Waiter { id, tx });
			debug!(target = "otpgate.pool", waiter = id, waiting = state.waiters.len(), "all slots busy, queued");
			(id, rx)
		};

		let mut guard = WaitGuard {
			pool: self,
			id,
			rx: Some(rx),
		};
		let result = match guard.rx.as_mut() {
			Some(rx) => rx.await,
			None => return Err(GateError::ShuttingDown),
		};
		guard.rx = None;
		match result {
			Ok(index) => {
				trace!(target = "otpgate.pool", slot = index, waiter = id, "slot handed to waiter");
				Ok(Slot { index })
			}
			Err(_) => Err(GateError::ShuttingDown),
		}
	}

	/// Returns `slot` to the pool.
	pub fn release(&self, slot: Slot) {
		self.release_index(slot.index);
	}

	fn release_index(&self, index: usize) {
		let mut state = self.state.lock();
		if index >= self.capacity || !state.occupied[index] {
			warn!(target = "otpgate.pool", slot = index, "release of a slot that is not occupied");
			return;
		}

		while let Some(waiter) = state.waiters.pop_front() {
			match waiter.tx.send(index) {
				Ok(()) => return,
				Err(_) => trace!(target = "otpgate.pool", waiter = waiter.id, "skipping abandoned waiter"),
			}
		}

		state.occupied[index] = false;
		trace!(target = "otpgate.pool", slot = index, "slot freed");
	}

	/// Rejects new acquirers and wakes every queued one with `ShuttingDown`.
	pub fn close(&self) {
		let mut state = self.state.lock();
		state.closed = true;
		let dropped = state.waiters.len();
		state.waiters.clear();
		if dropped > 0 {
			debug!(target = "otpgate.pool", dropped, "pool closed with queued waiters");
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn occupied(&self) -> usize {
		self.state.lock().occupied.iter().filter(|busy| **busy).count()
	}

	pub fn waiting(&self) -> usize {
		self.state.lock().waiters.len()
	}
}

/// Unlinks a waiter whose `acquire` future is dropped, passing on any index it
/// was handed in the meantime.
struct WaitGuard<'a> {
	pool: &'a SlotPool,
	id: u64,
	rx: Option<oneshot::Receiver<usize>>,
}

impl Drop for WaitGuard<'_> {
	fn drop(&mut self) {
		let Some(mut rx) = self.rx.take() else { return };
		let unlinked = {
			let mut state = self.pool.state.lock();
			let before = state.waiters.len();
			state.waiters.retain(|w| w.id != self.id);
			state.waiters.len() != before
		};
		if unlinked {
			return;
		}
		if let Ok(index) = rx.try_recv() {
			debug!(target = "otpgate.pool", slot = index, waiter = self.id, "abandoned waiter passes slot on");
			self.pool.release_index(index);
		}
	}
}
