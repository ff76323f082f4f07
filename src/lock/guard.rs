// self
use crate::{
	_prelude::*,
	lock::{LockHandle, LockManager, ReleaseOutcome},
};

/// Scoped lock that is released on every exit path.
///
/// Prefer [`LockGuard::release`]; if the guard is dropped while still holding the lock (a
/// cancelled future, a panic in the handler), the release is spawned onto the current tokio
/// runtime. Outside a runtime the lease TTL reclaims the lock instead.
pub struct LockGuard {
	manager: LockManager,
	handle: Option<LockHandle>,
}
impl LockGuard {
	/// Wraps an acquired handle.
	pub fn new(manager: LockManager, handle: LockHandle) -> Self {
		Self { manager, handle: Some(handle) }
	}

	/// Handle backing this guard.
	pub fn handle(&self) -> Option<&LockHandle> {
		self.handle.as_ref()
	}

	/// Releases the lock now.
	///
	/// The handle stays in the guard until the store answers, so cancelling this future still
	/// leaves the release to [`Drop`]. A failed release is retried once from [`Drop`].
	pub async fn release(mut self) -> Result<ReleaseOutcome> {
		let Some(handle) = self.handle.as_ref() else {
			return Ok(ReleaseOutcome::NotHeld);
		};
		let outcome = self.manager.release(handle).await?;

		self.handle = None;

		Ok(outcome)
	}
}
impl Debug for LockGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LockGuard").field("handle", &self.handle).finish()
	}
}
impl Drop for LockGuard {
	fn drop(&mut self) {
		let Some(handle) = self.handle.take() else {
			return;
		};

		match tokio::runtime::Handle::try_current() {
			Ok(runtime) => {
				let manager = self.manager.clone();

				runtime.spawn(async move {
					if let Err(_e) = manager.release(&handle).await {
						#[cfg(feature = "tracing")]
						tracing::warn!(
							resource = %handle.resource,
							error = %_e,
							"Deferred lock release failed; the lease will reclaim it."
						);
					}
				});
			},
			Err(_) => {
				#[cfg(feature = "tracing")]
				tracing::warn!(
					resource = %handle.resource,
					"Lock guard dropped outside a runtime; the lease will reclaim it."
				);
			},
		}
	}
}
