//! Thread-safe in-memory [`SharedStore`] implementation for local development and tests.
//!
//! Entries carry an absolute expiry evaluated against the store's [`Clock`], so a
//! [`ManualClock`](crate::clock::ManualClock) can expire leases and buckets deterministically.
//! Expired entries are swept every [`PURGE_EVERY_WRITES`] writes, so per-principal buckets and
//! deny-list entries do not accumulate in a long-running process.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	clock::{self, Clock},
	store::{CompareAndSwapOutcome, SharedStore, StoreError, StoreFuture, StoreKey},
};

/// Number of writes between sweeps of expired entries.
pub const PURGE_EVERY_WRITES: u64 = 1_024;

type StoreMap = Arc<RwLock<HashMap<StoreKey, Entry>>>;

#[derive(Clone, Debug)]
struct Entry {
	value: String,
	expires_at: Option<OffsetDateTime>,
}
impl Entry {
	fn new(value: String, ttl: Option<Duration>, now: OffsetDateTime) -> Result<Self, StoreError> {
		let expires_at = ttl
			.map(|ttl| {
				now.checked_add(ttl).ok_or_else(|| StoreError::Backend {
					message: format!("TTL {ttl} overflows the store clock"),
				})
			})
			.transpose()?;

		Ok(Self { value, expires_at })
	}

	fn is_live(&self, now: OffsetDateTime) -> bool {
		self.expires_at.is_none_or(|at| now < at)
	}
}

/// Process-local storage backend; a single instance stands in for the shared cache.
#[derive(Clone)]
pub struct MemoryStore {
	map: StoreMap,
	clock: Arc<dyn Clock>,
	offline: Arc<Mutex<bool>>,
	writes: Arc<AtomicU64>,
}
impl MemoryStore {
	/// Creates a store whose TTLs follow the provided clock.
	pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
		Self {
			map: Default::default(),
			clock,
			offline: Default::default(),
			writes: Default::default(),
		}
	}

	/// Simulates the backend becoming unreachable (every call fails) or recovering.
	pub fn set_offline(&self, offline: bool) {
		*self.offline.lock() = offline;
	}

	/// Number of live entries, mostly useful for assertions.
	pub fn len(&self) -> usize {
		let now = self.clock.now();

		self.map.read().values().filter(|entry| entry.is_live(now)).count()
	}

	/// Returns `true` if no live entries remain.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Drops expired entries.
	pub fn purge_expired(&self) {
		let now = self.clock.now();

		self.map.write().retain(|_, entry| entry.is_live(now));
	}

	fn insert(
		&self,
		map: &mut HashMap<StoreKey, Entry>,
		key: &StoreKey,
		entry: Entry,
		now: OffsetDateTime,
	) {
		map.insert(key.to_owned(), entry);

		if self.writes.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY_WRITES == PURGE_EVERY_WRITES - 1 {
			map.retain(|_, entry| entry.is_live(now));
		}
	}

	fn ensure_online(&self) -> Result<(), StoreError> {
		if *self.offline.lock() {
			Err(StoreError::Backend { message: "memory store is offline".into() })
		} else {
			Ok(())
		}
	}

	fn get_now(&self, key: &StoreKey) -> Result<Option<String>, StoreError> {
		self.ensure_online()?;

		let now = self.clock.now();

		Ok(self.map.read().get(key).filter(|entry| entry.is_live(now)).map(|e| e.value.clone()))
	}

	fn set_now(&self, key: &StoreKey, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
		self.ensure_online()?;

		let now = self.clock.now();

		let entry = Entry::new(value, ttl, now)?;

		self.insert(&mut self.map.write(), key, entry, now);

		Ok(())
	}

	fn cas_now(
		&self,
		key: &StoreKey,
		expected: Option<&str>,
		replacement: String,
		ttl: Option<Duration>,
	) -> Result<CompareAndSwapOutcome, StoreError> {
		self.ensure_online()?;

		let now = self.clock.now();
		let mut guard = self.map.write();
		let current = guard.get(key).filter(|entry| entry.is_live(now)).map(|e| e.value.as_str());
		let outcome = match (current, expected) {
			(None, None) => CompareAndSwapOutcome::Updated,
			(Some(cur), Some(exp)) if cur == exp => CompareAndSwapOutcome::Updated,
			(Some(_), _) => CompareAndSwapOutcome::Mismatch,
			(None, Some(_)) => CompareAndSwapOutcome::Missing,
		};

		if outcome.is_updated() {
			self.insert(&mut guard, key, Entry::new(replacement, ttl, now)?, now);
		}

		Ok(outcome)
	}

	fn delete_now(&self, key: &StoreKey, expected: Option<&str>) -> Result<bool, StoreError> {
		self.ensure_online()?;

		let now = self.clock.now();
		let mut guard = self.map.write();
		let matches = match guard.get(key) {
			Some(entry) if entry.is_live(now) => expected.is_none_or(|exp| entry.value == exp),
			_ => false,
		};

		if matches {
			guard.remove(key);
		}

		Ok(matches)
	}
}
impl Default for MemoryStore {
	fn default() -> Self {
		Self::with_clock(clock::system())
	}
}
impl Debug for MemoryStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MemoryStore")
			.field("entries", &self.map.read().len())
			.field("offline", &*self.offline.lock())
			.finish()
	}
}
impl SharedStore for MemoryStore {
	fn get<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<String>> {
		Box::pin(async move { self.get_now(key) })
	}

	fn set<'a>(
		&'a self,
		key: &'a StoreKey,
		value: String,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.set_now(key, value, ttl) })
	}

	fn set_if_absent<'a>(
		&'a self,
		key: &'a StoreKey,
		value: String,
		ttl: Duration,
	) -> StoreFuture<'a, bool> {
		Box::pin(async move { Ok(self.cas_now(key, None, value, Some(ttl))?.is_updated()) })
	}

	fn compare_and_swap<'a>(
		&'a self,
		key: &'a StoreKey,
		expected: Option<&'a str>,
		replacement: String,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move { self.cas_now(key, expected, replacement, ttl) })
	}

	fn compare_and_delete<'a>(
		&'a self,
		key: &'a StoreKey,
		expected: &'a str,
	) -> StoreFuture<'a, bool> {
		Box::pin(async move { self.delete_now(key, Some(expected)) })
	}

	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, bool> {
		Box::pin(async move { self.delete_now(key, None) })
	}
}
