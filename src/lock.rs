//! Lease-based mutual exclusion keyed by resource id, coordinated through the shared store.
//!
//! Acquisition is a single atomic `set_if_absent` whose value is a fresh owner token and whose
//! TTL is the lease, so a crashed holder is reclaimed once the lease runs out. Release is a
//! compare-and-delete on that owner token: a handle whose lease already lapsed (and whose key may
//! now belong to someone else) can never free the newer holder's lock.

mod guard;

pub use guard::LockGuard;

// crates.io
use tokio::time::{self as tokio_time, Instant};
// self
use crate::{
	_prelude::*,
	auth::{ResourceId, token::secret},
	clock::Clock,
	config::LockConfig,
	store::{Namespace, SharedStore, StoreKey},
};

/// Single-attempt lock failures.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum LockError {
	/// The resource is held by another owner.
	#[error("Resource `{resource}` is locked by another owner.")]
	Unavailable {
		/// Contended resource id.
		resource: String,
	},
	/// The holder did not release within the wait budget.
	#[error("Timed out after {waited} waiting for resource `{resource}`.")]
	Timeout {
		/// Contended resource id.
		resource: String,
		/// Time spent waiting.
		waited: Duration,
	},
}

/// Outcome of releasing a [`LockHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
	/// The lock was held by this handle and is now free.
	Released,
	/// The handle no longer owned the lock (already released or lease expired); nothing changed.
	NotHeld,
}

/// Opaque token identifying one acquisition.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(String);
impl OwnerToken {
	fn generate() -> Self {
		Self(secret::random_id())
	}

	/// Stored value representation.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Debug for OwnerToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("OwnerToken").field(&self.0).finish()
	}
}

/// Proof of one successful acquisition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockHandle {
	/// Locked resource.
	pub resource: ResourceId,
	/// Owner token written to the store.
	pub owner: OwnerToken,
	/// Instant the lock was taken, per the manager's clock.
	pub acquired_at: OffsetDateTime,
	/// Lease granted at acquisition.
	pub lease: Duration,
}
impl LockHandle {
	/// Instant after which the store may hand the resource to someone else.
	pub fn lease_expires_at(&self) -> OffsetDateTime {
		self.acquired_at.saturating_add(self.lease)
	}

	fn key(&self) -> StoreKey {
		lock_key(&self.resource)
	}
}

/// Acquires and releases distributed locks.
#[derive(Clone)]
pub struct LockManager {
	store: Arc<dyn SharedStore>,
	clock: Arc<dyn Clock>,
	default_lease: Duration,
	wait_timeout: Duration,
	poll_interval: Duration,
}
impl LockManager {
	/// Creates a manager using the configured lease, wait, and poll timings.
	pub fn new(store: Arc<dyn SharedStore>, clock: Arc<dyn Clock>, config: &LockConfig) -> Self {
		Self {
			store,
			clock,
			default_lease: config.default_lease(),
			wait_timeout: config.wait_timeout(),
			poll_interval: config.poll_interval(),
		}
	}

	/// Configured lease.
	pub fn default_lease(&self) -> Duration {
		self.default_lease
	}

	/// Configured wait budget.
	pub fn wait_timeout(&self) -> Duration {
		self.wait_timeout
	}

	/// Makes one acquisition attempt.
	pub async fn try_acquire(&self, resource: &ResourceId, lease: Duration) -> Result<LockHandle> {
		match self.attempt(resource, lease).await? {
			Some(handle) => Ok(handle),
			None => Err(LockError::Unavailable { resource: resource.to_string() }.into()),
		}
	}

	/// Acquires `resource`, polling until `wait_timeout` elapses.
	pub async fn acquire(
		&self,
		resource: &ResourceId,
		lease: Duration,
		wait_timeout: Duration,
	) -> Result<LockHandle> {
		let started = Instant::now();
		let deadline = started + std_duration(wait_timeout);

		loop {
			if let Some(handle) = self.attempt(resource, lease).await? {
				return Ok(handle);
			}

			let now = Instant::now();

			if now >= deadline {
				let waited = Duration::try_from(now - started).unwrap_or(wait_timeout);

				#[cfg(feature = "tracing")]
				tracing::debug!(resource = %resource, %waited, "Lock wait timed out.");

				return Err(LockError::Timeout { resource: resource.to_string(), waited }.into());
			}

			tokio_time::sleep(std_duration(self.poll_interval).min(deadline - now)).await;
		}
	}

	/// Acquires with the configured lease and wait budget, returning a scoped guard.
	pub async fn lock(&self, resource: &ResourceId) -> Result<LockGuard> {
		let handle = self.acquire(resource, self.default_lease, self.wait_timeout).await?;

		Ok(LockGuard::new(self.clone(), handle))
	}

	/// Releases `handle` if it still owns the lock.
	pub async fn release(&self, handle: &LockHandle) -> Result<ReleaseOutcome> {
		let released =
			self.store.compare_and_delete(&handle.key(), handle.owner.as_str()).await?;

		if released {
			Ok(ReleaseOutcome::Released)
		} else {
			#[cfg(feature = "tracing")]
			tracing::debug!(resource = %handle.resource, "Release skipped; lock no longer held.");

			Ok(ReleaseOutcome::NotHeld)
		}
	}

	/// Returns `true` while `handle` still owns its lock.
	pub async fn is_held(&self, handle: &LockHandle) -> Result<bool> {
		let current = self.store.get(&handle.key()).await?;

		Ok(current.as_deref() == Some(handle.owner.as_str()))
	}

	async fn attempt(&self, resource: &ResourceId, lease: Duration) -> Result<Option<LockHandle>> {
		let owner = OwnerToken::generate();
		let acquired_at = self.clock.now();
		let written = self
			.store
			.set_if_absent(&lock_key(resource), owner.as_str().to_owned(), lease)
			.await?;

		Ok(written.then(|| LockHandle { resource: resource.clone(), owner, acquired_at, lease }))
	}
}
impl Debug for LockManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LockManager")
			.field("default_lease", &self.default_lease)
			.field("wait_timeout", &self.wait_timeout)
			.field("poll_interval", &self.poll_interval)
			.finish()
	}
}

fn lock_key(resource: &ResourceId) -> StoreKey {
	StoreKey::new(Namespace::Lock, resource.as_ref())
}

pub(crate) fn std_duration(duration: Duration) -> std::time::Duration {
	std::time::Duration::try_from(duration).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{test_clock, test_config},
		clock::ManualClock,
		store::MemoryStore,
	};

	fn manager() -> (LockManager, Arc<ManualClock>) {
		let clock = test_clock();
		let store = Arc::new(MemoryStore::with_clock(clock.clone()));

		(LockManager::new(store, clock.clone(), &test_config().lock), clock)
	}

	fn resource(id: &str) -> ResourceId {
		ResourceId::new(id).expect("Resource fixture should be valid.")
	}

	#[tokio::test]
	async fn held_resource_is_unavailable_until_released() {
		let (locks, _) = manager();
		let handle = locks
			.try_acquire(&resource("resource-1"), Duration::seconds(5))
			.await
			.expect("Free resource should lock.");
		let err = locks
			.try_acquire(&resource("resource-1"), Duration::seconds(5))
			.await
			.expect_err("Held resource should not lock twice.");

		assert!(matches!(err, Error::Lock(LockError::Unavailable { .. })));
		assert_eq!(locks.release(&handle).await.expect("Release should succeed."), ReleaseOutcome::Released);
		assert!(locks.try_acquire(&resource("resource-1"), Duration::seconds(5)).await.is_ok());
	}

	#[tokio::test]
	async fn stale_handle_cannot_release_new_holder() {
		let (locks, clock) = manager();
		let stale = locks
			.try_acquire(&resource("resource-1"), Duration::seconds(5))
			.await
			.expect("Free resource should lock.");

		clock.advance(Duration::seconds(6));

		let fresh = locks
			.try_acquire(&resource("resource-1"), Duration::seconds(5))
			.await
			.expect("Expired lease should be reclaimable.");

		assert_eq!(locks.release(&stale).await.expect("Release should answer."), ReleaseOutcome::NotHeld);
		assert!(locks.is_held(&fresh).await.expect("Store should answer."));
		assert!(!locks.is_held(&stale).await.expect("Store should answer."));
	}

	#[tokio::test]
	async fn acquire_times_out_after_wait_budget() {
		let (locks, _) = manager();
		let _held = locks
			.try_acquire(&resource("resource-1"), Duration::seconds(5))
			.await
			.expect("Free resource should lock.");
		let err = locks
			.acquire(&resource("resource-1"), Duration::seconds(5), Duration::milliseconds(50))
			.await
			.expect_err("Held resource should time out.");

		match err {
			Error::Lock(LockError::Timeout { waited, .. }) => {
				assert!(waited >= Duration::milliseconds(50));
			},
			other => panic!("Unexpected error: {other:?}"),
		}
	}

	#[tokio::test]
	async fn waiter_acquires_once_holder_releases() {
		let (locks, _) = manager();
		let held = locks
			.try_acquire(&resource("resource-1"), Duration::seconds(5))
			.await
			.expect("Free resource should lock.");
		let waiter = {
			let locks = locks.clone();

			tokio::spawn(async move {
				locks
					.acquire(&resource("resource-1"), Duration::seconds(5), Duration::seconds(2))
					.await
			})
		};

		tokio_time::sleep(std::time::Duration::from_millis(20)).await;
		locks.release(&held).await.expect("Release should succeed.");

		let handle = waiter
			.await
			.expect("Waiter task should not panic.")
			.expect("Waiter should acquire after release.");

		assert_ne!(handle.owner, held.owner);
	}
}
