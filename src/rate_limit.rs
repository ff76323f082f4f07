//! Token-bucket quotas shared across gate instances.
//!
//! Buckets live in the shared store as JSON [`BucketState`] documents and are only ever
//! mutated by compare-and-swap against the exact payload that was read, so two instances can
//! never both spend the last token. A bucket refills to capacity once per refill interval; a
//! bucket that does not exist (never used, or expired after two idle intervals) is full.

// self
use crate::{
	_prelude::*,
	auth::{OperationId, PrincipalId},
	clock::Clock,
	config::{GlobalRateLimitConfig, RateLimitConfig, millis},
	error::ConfigError,
	store::{CompareAndSwapOutcome, Namespace, SharedStore, StoreError, StoreKey},
};

const GLOBAL_BUCKET_ID: &str = "global";

/// Bucket shape applied to a family of keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
	/// Tokens per interval and bucket ceiling.
	pub capacity: u64,
	/// Refill cadence.
	pub refill_interval: Duration,
	/// Whether buckets are partitioned by principal.
	pub per_principal: bool,
}
impl RateLimitPolicy {
	/// Creates a policy.
	pub fn new(capacity: u64, refill_interval: Duration, per_principal: bool) -> Self {
		Self { capacity, refill_interval, per_principal }
	}

	/// Policy for the per-principal (or per-operation) tier.
	pub fn from_config(config: &RateLimitConfig) -> Self {
		Self::new(config.capacity, millis(config.refill_interval_ms), config.per_principal)
	}

	/// Policy for the service-wide tier.
	pub fn global(config: &GlobalRateLimitConfig) -> Self {
		Self::new(config.capacity, millis(config.refill_interval_ms), false)
	}

	/// Normalizes `cost` (zero counts as one) and rejects costs the bucket can never cover.
	pub fn normalize_cost(&self, cost: u64) -> Result<u64, ConfigError> {
		let cost = cost.max(1);

		if cost > self.capacity {
			return Err(ConfigError::CostExceedsCapacity { cost, capacity: self.capacity });
		}

		Ok(cost)
	}

	fn interval_ms(&self) -> i64 {
		i64::try_from(self.refill_interval.whole_milliseconds()).unwrap_or(i64::MAX).max(1)
	}

	fn bucket_ttl(&self) -> Duration {
		self.refill_interval.saturating_mul(2)
	}
}

/// Identifies one bucket in the shared store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
	/// Service-wide bucket.
	Global,
	/// Bucket shared by every caller of an operation category.
	Operation(OperationId),
	/// Bucket owned by one principal for one operation category.
	Principal {
		/// Calling principal.
		principal: PrincipalId,
		/// Operation category.
		operation: OperationId,
	},
}
impl RateLimitKey {
	/// Builds the key a request falls into under `policy`.
	pub fn for_request(
		policy: &RateLimitPolicy,
		principal: &PrincipalId,
		operation: &OperationId,
	) -> Self {
		if policy.per_principal {
			Self::Principal { principal: principal.clone(), operation: operation.clone() }
		} else {
			Self::Operation(operation.clone())
		}
	}

	/// Store key holding this bucket.
	pub fn store_key(&self) -> StoreKey {
		StoreKey::new(Namespace::Quota, self.to_string())
	}
}
impl Display for RateLimitKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Global => f.write_str(GLOBAL_BUCKET_ID),
			Self::Operation(operation) => write!(f, "op:{operation}"),
			Self::Principal { principal, operation } => write!(f, "{principal}:{operation}"),
		}
	}
}

/// Persisted bucket document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
	/// Tokens currently available.
	pub tokens: u64,
	/// Start of the current refill window, unix milliseconds.
	pub last_refill_ms: i64,
}
impl BucketState {
	/// A full bucket whose window starts at `now_ms`.
	pub fn full(policy: &RateLimitPolicy, now_ms: i64) -> Self {
		Self { tokens: policy.capacity, last_refill_ms: now_ms }
	}

	/// Applies every refill that elapsed by `now_ms`.
	pub fn refilled(self, policy: &RateLimitPolicy, now_ms: i64) -> Self {
		let interval = policy.interval_ms();
		let elapsed = now_ms.saturating_sub(self.last_refill_ms);

		if elapsed < interval {
			return self;
		}

		let windows = elapsed / interval;

		Self {
			tokens: policy.capacity,
			last_refill_ms: self.last_refill_ms.saturating_add(windows.saturating_mul(interval)),
		}
	}

	/// Instant of the next refill.
	pub fn next_refill_ms(&self, policy: &RateLimitPolicy) -> i64 {
		self.last_refill_ms.saturating_add(policy.interval_ms())
	}
}

/// Result of a quota check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// Tokens were spent; `remaining` are left in the window.
	Permitted {
		/// Tokens left after this request.
		remaining: u64,
	},
	/// Not enough tokens; retry later.
	Denied(RetryDirective),
}
impl RateLimitDecision {
	/// Returns `true` for [`RateLimitDecision::Permitted`].
	pub fn is_permitted(&self) -> bool {
		matches!(self, Self::Permitted { .. })
	}
}

/// Advises callers when to retry after a [`RateLimitDecision::Denied`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant the bucket refills.
	pub earliest_retry_at: OffsetDateTime,
	/// Time from the check until the refill.
	pub retry_after: Duration,
	/// Bucket that denied the request.
	pub bucket: String,
}
impl RetryDirective {
	/// Creates a directive for a refill at `earliest_retry_at`, observed at `now`.
	pub fn new(bucket: impl Into<String>, earliest_retry_at: OffsetDateTime, now: OffsetDateTime) -> Self {
		let retry_after = (earliest_retry_at - now).max(Duration::ZERO);

		Self { earliest_retry_at, retry_after, bucket: bucket.into() }
	}
}

/// Shared-store token buckets with an optional global tier.
#[derive(Clone)]
pub struct RateLimiter {
	store: Arc<dyn SharedStore>,
	clock: Arc<dyn Clock>,
	policy: RateLimitPolicy,
	global: Option<RateLimitPolicy>,
	max_cas_attempts: u32,
}
impl RateLimiter {
	/// Builds a limiter from configuration.
	pub fn from_config(
		config: &RateLimitConfig,
		store: Arc<dyn SharedStore>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			store,
			clock,
			policy: RateLimitPolicy::from_config(config),
			global: config.global.as_ref().map(RateLimitPolicy::global),
			max_cas_attempts: config.max_cas_attempts.max(1),
		}
	}

	/// Per-principal (or per-operation) policy.
	pub fn policy(&self) -> &RateLimitPolicy {
		&self.policy
	}

	/// Checks the global bucket (if any) and then the caller's bucket.
	///
	/// A token spent on the global bucket is not refunded when the caller's bucket denies.
	pub async fn check(
		&self,
		principal: &PrincipalId,
		operation: &OperationId,
		cost: u64,
	) -> Result<RateLimitDecision> {
		if self.global.is_some() {
			let decision = self.try_acquire(&RateLimitKey::Global, cost).await?;

			if !decision.is_permitted() {
				return Ok(decision);
			}
		}

		self.try_acquire(&RateLimitKey::for_request(&self.policy, principal, operation), cost).await
	}

	/// Spends `cost` tokens from the bucket behind `key`.
	pub async fn try_acquire(&self, key: &RateLimitKey, cost: u64) -> Result<RateLimitDecision> {
		let policy = match key {
			RateLimitKey::Global => self.global.unwrap_or(self.policy),
			_ => self.policy,
		};
		let cost = policy.normalize_cost(cost)?;
		let store_key = key.store_key();

		for _ in 0..self.max_cas_attempts {
			let now = self.clock.now();
			let now_ms = unix_millis(now);
			let current = self.store.get(&store_key).await?;
			let state = match current.as_deref() {
				Some(payload) => serde_json::from_str::<BucketState>(payload)
					.map_err(StoreError::from)?
					.refilled(&policy, now_ms),
				None => BucketState::full(&policy, now_ms),
			};

			if state.tokens < cost {
				let retry_at = OffsetDateTime::from_unix_timestamp_nanos(
					i128::from(state.next_refill_ms(&policy)) * 1_000_000,
				)
				.unwrap_or(now);

				return Ok(RateLimitDecision::Denied(RetryDirective::new(key.to_string(), retry_at, now)));
			}

			let next = BucketState { tokens: state.tokens - cost, ..state };
			let payload = serde_json::to_string(&next).map_err(StoreError::from)?;

			match self
				.store
				.compare_and_swap(&store_key, current.as_deref(), payload, Some(policy.bucket_ttl()))
				.await?
			{
				CompareAndSwapOutcome::Updated =>
					return Ok(RateLimitDecision::Permitted { remaining: next.tokens }),
				CompareAndSwapOutcome::Mismatch | CompareAndSwapOutcome::Missing => {
					#[cfg(feature = "tracing")]
					tracing::trace!(bucket = %store_key, "Bucket changed underneath; retrying.");
				},
			}
		}

		#[cfg(feature = "tracing")]
		tracing::warn!(bucket = %store_key, attempts = self.max_cas_attempts, "Bucket contention; failing closed.");

		Err(StoreError::Contention { key: store_key.render(), attempts: self.max_cas_attempts }.into())
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimiter")
			.field("policy", &self.policy)
			.field("global", &self.global)
			.field("max_cas_attempts", &self.max_cas_attempts)
			.finish()
	}
}

fn unix_millis(instant: OffsetDateTime) -> i64 {
	i64::try_from(instant.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}
