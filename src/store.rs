//! Shared-store contracts and built-in backends for lock, quota, and token-list state.
//!
//! Every piece of coordination state lives behind [`SharedStore`]; gate instances keep no
//! authoritative copy. Backends must make each operation atomic on its own key so that
//! compare-and-swap and compare-and-delete are race-free across processes.

pub mod memory;
#[cfg(feature = "redis")] pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")] pub use redis::RedisStore;

// self
use crate::_prelude::*;

/// Boxed future returned by [`SharedStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Atomic key/value contract implemented by shared stores.
pub trait SharedStore
where
	Self: Send + Sync,
{
	/// Fetches the live value for `key`, if present and not expired.
	fn get<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<String>>;

	/// Writes `value`, replacing any previous entry; `None` keeps the entry until deleted.
	fn set<'a>(
		&'a self,
		key: &'a StoreKey,
		value: String,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, ()>;

	/// Writes `value` only if no live entry exists; returns `true` when written.
	fn set_if_absent<'a>(
		&'a self,
		key: &'a StoreKey,
		value: String,
		ttl: Duration,
	) -> StoreFuture<'a, bool>;

	/// Replaces the entry if its current value equals `expected`.
	///
	/// `expected = None` means "only if absent".
	fn compare_and_swap<'a>(
		&'a self,
		key: &'a StoreKey,
		expected: Option<&'a str>,
		replacement: String,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, CompareAndSwapOutcome>;

	/// Deletes the entry only if its current value equals `expected`; returns `true` when deleted.
	fn compare_and_delete<'a>(
		&'a self,
		key: &'a StoreKey,
		expected: &'a str,
	) -> StoreFuture<'a, bool>;

	/// Deletes the entry unconditionally; returns `true` when a live entry was removed.
	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, bool>;
}

/// Result of a compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The expectation held and the entry was written.
	Updated,
	/// A live entry exists but its value differs from the expectation.
	Mismatch,
	/// A value was expected but no live entry exists.
	Missing,
}
impl CompareAndSwapOutcome {
	/// Returns `true` when the replacement was written.
	pub fn is_updated(self) -> bool {
		matches!(self, Self::Updated)
	}
}

/// Error type produced by [`SharedStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// A stored payload could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure (connection refused, timeout, script error).
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// Optimistic updates kept losing races and gave up.
	#[error("Contention on `{key}` persisted after {attempts} attempts.")]
	Contention {
		/// Rendered key that stayed contended.
		key: String,
		/// Number of compare-and-swap attempts made.
		attempts: u32,
	},
}
impl From<serde_json::Error> for StoreError {
	fn from(e: serde_json::Error) -> Self {
		Self::Serialization { message: e.to_string() }
	}
}

/// Key namespaces that keep lock, quota, and token-list state apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
	/// Distributed lock ownership records.
	Lock,
	/// Token-bucket states.
	Quota,
	/// Refresh-token allow-list entries.
	Refresh,
	/// Revoked access-token ids.
	Denylist,
}
impl Namespace {
	/// Returns the stable key prefix.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Lock => "lock",
			Self::Quota => "quota",
			Self::Refresh => "refresh",
			Self::Denylist => "denylist",
		}
	}
}
impl Display for Namespace {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Namespaced key identifying one shared-store entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey {
	/// Namespace component.
	pub namespace: Namespace,
	/// Identifier within the namespace.
	pub id: String,
}
impl StoreKey {
	/// Builds a key in the provided namespace.
	pub fn new(namespace: Namespace, id: impl Into<String>) -> Self {
		Self { namespace, id: id.into() }
	}

	/// Renders the key as stored by remote backends (`{namespace}:{id}`).
	pub fn render(&self) -> String {
		self.to_string()
	}
}
impl Display for StoreKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}:{}", self.namespace, self.id)
	}
}
