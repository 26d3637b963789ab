//! Log conduit: a bounded, thread-safe append buffer per operation.
//!
//! The engine writes timestamped lines to its own `LogHandle`; the
//! dispatcher periodically drains every live operation's handle into the
//! configured logger callback. Draining is an atomic swap-and-clear so the
//! writer and reader never race on individual entries.

use std::sync::{Arc, Mutex};

use chrono::Local;

/// Caps memory use if a logger callback is slow or absent; oldest entries
/// are dropped first, matching the spec's "bounded append buffer."
const MAX_BUFFERED_MESSAGES: usize = 256;

#[derive(Clone)]
pub struct LogHandle {
	inner: Arc<Mutex<Vec<String>>>,
}

impl LogHandle {
	pub fn new() -> Self {
		Self { inner: Arc::new(Mutex::new(Vec::new())) }
	}

	pub fn push(&self, msg: impl Into<String>) {
		let mut guard = self.inner.lock().unwrap();
		if guard.len() >= MAX_BUFFERED_MESSAGES {
			guard.remove(0);
		}
		let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.6f");
		guard.push(format!("{timestamp}: {}", msg.into()));
	}

	/// Atomically takes and clears the buffered messages.
	pub fn drain(&self) -> Vec<String> {
		let mut guard = self.inner.lock().unwrap();
		std::mem::take(&mut *guard)
	}
}

impl Default for LogHandle {
	fn default() -> Self {
		Self::new()
	}
}
