// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for gate decisions.
#[derive(Debug, Default)]
pub struct GateMetrics {
	attempts: AtomicU64,
	permitted: AtomicU64,
	denied: AtomicU64,
	busy: AtomicU64,
	handler_timeouts: AtomicU64,
}
impl GateMetrics {
	/// Returns the total number of requests that entered the gate.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of requests whose handler ran.
	pub fn permitted(&self) -> u64 {
		self.permitted.load(Ordering::Relaxed)
	}

	/// Returns the number of requests rejected before the handler ran.
	pub fn denied(&self) -> u64 {
		self.denied.load(Ordering::Relaxed)
	}

	/// Returns the number of requests rejected as [`ResourceBusy`](crate::error::Error::ResourceBusy).
	pub fn busy(&self) -> u64 {
		self.busy.load(Ordering::Relaxed)
	}

	/// Returns the number of handlers that overran their deadline.
	pub fn handler_timeouts(&self) -> u64 {
		self.handler_timeouts.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_permitted(&self) {
		self.permitted.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_denied(&self) {
		self.denied.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_busy(&self) {
		self.busy.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_handler_timeout(&self) {
		self.handler_timeouts.fetch_add(1, Ordering::Relaxed);
	}
}
