//! Gate configuration: recognized options, defaults, and validation.
//!
//! Documents are JSON with camelCase keys. Parsing goes through `serde_path_to_error` so a bad
//! value is reported with its dotted path (for example `rateLimit.capacity`).
//!
//! ```json
//! {
//!   "jwtSigningKey": "…at least 32 bytes…",
//!   "tokenTTL": 3600000,
//!   "rateLimit": { "capacity": 5, "refillIntervalMs": 1000 },
//!   "lock": { "defaultLeaseMs": 30000, "maxRetries": 3 }
//! }
//! ```

// self
use crate::{_prelude::*, error::ConfigError};

/// Minimum HS256 key length accepted, in bytes.
pub const MIN_SIGNING_KEY_LEN: usize = 32;
/// Upper bound for every millisecond option (365 days).
pub const MAX_DURATION_MS: u64 = 31_536_000_000;

/// Process-wide configuration, loaded once and read-only afterwards.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct GateConfig {
	/// HMAC secret used to sign and verify bearer tokens.
	pub jwt_signing_key: String,
	/// Access-token lifetime in milliseconds.
	#[serde(rename = "tokenTTL")]
	pub token_ttl_ms: u64,
	/// Refresh-token lifetime in milliseconds.
	#[serde(rename = "refreshTokenTTL")]
	pub refresh_token_ttl_ms: u64,
	/// Expected `iss` claim; tokens are issued with it and verified against it when set.
	pub issuer: Option<String>,
	/// Quota policy.
	pub rate_limit: RateLimitConfig,
	/// Distributed lock timings.
	pub lock: LockConfig,
	/// Optional deadline for the downstream handler.
	pub handler_timeout_ms: Option<u64>,
}
impl GateConfig {
	/// Parses and validates a JSON document.
	pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
		let deserializer = &mut serde_json::Deserializer::from_str(document);
		let config: Self = serde_path_to_error::deserialize(deserializer)
			.map_err(|source| ConfigError::Parse { source })?;

		config.validate()?;

		Ok(config)
	}

	/// Checks cross-field constraints that serde cannot express.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.jwt_signing_key.len() < MIN_SIGNING_KEY_LEN {
			return Err(ConfigError::SigningKeyTooShort {
				min: MIN_SIGNING_KEY_LEN,
				actual: self.jwt_signing_key.len(),
			});
		}

		duration("tokenTTL", self.token_ttl_ms)?;
		duration("refreshTokenTTL", self.refresh_token_ttl_ms)?;
		positive("rateLimit.capacity", self.rate_limit.capacity)?;
		duration("rateLimit.refillIntervalMs", self.rate_limit.refill_interval_ms)?;
		positive("rateLimit.maxCasAttempts", self.rate_limit.max_cas_attempts.into())?;

		if let Some(global) = &self.rate_limit.global {
			positive("rateLimit.global.capacity", global.capacity)?;
			duration("rateLimit.global.refillIntervalMs", global.refill_interval_ms)?;
		}

		duration("lock.defaultLeaseMs", self.lock.default_lease_ms)?;
		at_most("lock.waitTimeoutMs", self.lock.wait_timeout_ms)?;
		at_most("lock.retryBackoffMs", self.lock.retry_backoff_ms)?;
		duration("lock.pollIntervalMs", self.lock.poll_interval_ms)?;

		if let Some(timeout) = self.handler_timeout_ms {
			duration("handlerTimeoutMs", timeout)?;
		}

		Ok(())
	}

	/// Access-token lifetime.
	pub fn token_ttl(&self) -> Duration {
		millis(self.token_ttl_ms)
	}

	/// Refresh-token lifetime.
	pub fn refresh_token_ttl(&self) -> Duration {
		millis(self.refresh_token_ttl_ms)
	}

	/// Handler deadline, if configured.
	pub fn handler_timeout(&self) -> Option<Duration> {
		self.handler_timeout_ms.map(millis)
	}
}
impl Default for GateConfig {
	fn default() -> Self {
		Self {
			jwt_signing_key: String::new(),
			token_ttl_ms: 3_600_000,
			refresh_token_ttl_ms: 604_800_000,
			issuer: None,
			rate_limit: RateLimitConfig::default(),
			lock: LockConfig::default(),
			handler_timeout_ms: None,
		}
	}
}
impl Debug for GateConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("GateConfig")
			.field("jwt_signing_key", &"<redacted>")
			.field("token_ttl_ms", &self.token_ttl_ms)
			.field("refresh_token_ttl_ms", &self.refresh_token_ttl_ms)
			.field("issuer", &self.issuer)
			.field("rate_limit", &self.rate_limit)
			.field("lock", &self.lock)
			.field("handler_timeout_ms", &self.handler_timeout_ms)
			.finish()
	}
}

/// Token-bucket options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RateLimitConfig {
	/// Tokens granted per refill interval (and the bucket ceiling).
	pub capacity: u64,
	/// Refill cadence in milliseconds.
	pub refill_interval_ms: u64,
	/// Keeps one bucket per principal when `true`, one per operation otherwise.
	pub per_principal: bool,
	/// Optional service-wide bucket consulted before the per-principal one.
	pub global: Option<GlobalRateLimitConfig>,
	/// Compare-and-swap attempts before a contended bucket fails closed.
	pub max_cas_attempts: u32,
}
impl Default for RateLimitConfig {
	fn default() -> Self {
		Self {
			capacity: 1,
			refill_interval_ms: 1_000,
			per_principal: true,
			global: None,
			max_cas_attempts: 16,
		}
	}
}

/// Service-wide bucket options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct GlobalRateLimitConfig {
	/// Tokens granted per refill interval.
	pub capacity: u64,
	/// Refill cadence in milliseconds.
	pub refill_interval_ms: u64,
}
impl Default for GlobalRateLimitConfig {
	fn default() -> Self {
		Self { capacity: 1_000, refill_interval_ms: 1_000 }
	}
}

/// Distributed lock timings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct LockConfig {
	/// Lease granted to each acquisition, in milliseconds.
	pub default_lease_ms: u64,
	/// How long one acquisition attempt may wait for the holder, in milliseconds.
	pub wait_timeout_ms: u64,
	/// Extra acquisition attempts after a timeout before reporting the resource as busy.
	pub max_retries: u32,
	/// Base backoff between attempts, doubled per retry, in milliseconds.
	pub retry_backoff_ms: u64,
	/// Poll cadence while waiting for a held lock, in milliseconds.
	pub poll_interval_ms: u64,
}
impl LockConfig {
	/// Lease granted to each acquisition.
	pub fn default_lease(&self) -> Duration {
		millis(self.default_lease_ms)
	}

	/// Wait budget for one acquisition attempt.
	pub fn wait_timeout(&self) -> Duration {
		millis(self.wait_timeout_ms)
	}

	/// Base retry backoff.
	pub fn retry_backoff(&self) -> Duration {
		millis(self.retry_backoff_ms)
	}

	/// Poll cadence while waiting.
	pub fn poll_interval(&self) -> Duration {
		millis(self.poll_interval_ms)
	}
}
impl Default for LockConfig {
	fn default() -> Self {
		Self {
			default_lease_ms: 30_000,
			wait_timeout_ms: 10_000,
			max_retries: 3,
			retry_backoff_ms: 100,
			poll_interval_ms: 25,
		}
	}
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
	if value == 0 { Err(ConfigError::MustBePositive { field }) } else { Ok(()) }
}

fn at_most(field: &'static str, value: u64) -> Result<(), ConfigError> {
	if value > MAX_DURATION_MS {
		Err(ConfigError::MustNotExceed { field, max: MAX_DURATION_MS })
	} else {
		Ok(())
	}
}

fn duration(field: &'static str, value: u64) -> Result<(), ConfigError> {
	positive(field, value)?;
	at_most(field, value)
}

pub(crate) fn millis(value: u64) -> Duration {
	Duration::milliseconds(i64::try_from(value).unwrap_or(i64::MAX))
}
