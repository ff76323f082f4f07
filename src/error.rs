//! Gate-level error types shared across verification, quota, locking, and stores.

// self
use crate::{_prelude::*, gate::StageTransitionError, lock::LockError, store::StoreError};

/// Gate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Canonical gate error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Bearer token failed verification; never retried.
	#[error(transparent)]
	Auth(#[from] AuthError),
	/// Shared store could not be reached or kept answering with conflicts; the gate fails closed.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// A single lock attempt did not succeed.
	#[error(transparent)]
	Lock(#[from] LockError),
	/// The gate attempted an illegal stage transition.
	#[error(transparent)]
	Stage(#[from] StageTransitionError),

	/// Quota exhausted for the current refill window.
	#[error("Request quota exceeded; retry after {retry_after}.")]
	QuotaExceeded {
		/// Time until enough tokens are refilled to admit the request.
		retry_after: Duration,
	},
	/// Lock contention persisted through every local retry.
	#[error("Resource `{resource}` is busy after {attempts} attempts.")]
	ResourceBusy {
		/// Lock key that stayed contended.
		resource: String,
		/// Number of acquisition attempts made before giving up.
		attempts: u32,
	},
	/// Downstream handler exceeded its configured deadline.
	#[error("Handler did not finish within {after}.")]
	HandlerTimeout {
		/// Deadline that elapsed.
		after: Duration,
	},
}
impl Error {
	/// HTTP status code used when the error is surfaced as a denial.
	pub fn status(&self) -> u16 {
		match self {
			Self::Auth(_) => 401,
			Self::QuotaExceeded { .. } => 429,
			Self::Lock(_) => 409,
			Self::ResourceBusy { .. } => 423,
			Self::Storage(_) => 503,
			Self::HandlerTimeout { .. } => 504,
			Self::Config(_) | Self::Stage(_) => 500,
		}
	}

	/// Stable machine-readable code placed in denial bodies.
	pub fn code(&self) -> &'static str {
		match self {
			Self::Auth(e) => e.code(),
			Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
			Self::Lock(_) => "LOCK_UNAVAILABLE",
			Self::ResourceBusy { .. } => "RESOURCE_BUSY",
			Self::Storage(_) => "STORE_UNAVAILABLE",
			Self::HandlerTimeout { .. } => "HANDLER_TIMEOUT",
			Self::Config(_) => "CONFIGURATION_ERROR",
			Self::Stage(_) => "INTERNAL_ERROR",
		}
	}

	/// Retry hint for quota denials.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::QuotaExceeded { retry_after } => Some(*retry_after),
			_ => None,
		}
	}

	/// Returns `true` for lock contention, the only failure the gate retries locally.
	pub fn is_lock_contention(&self) -> bool {
		matches!(self, Self::Lock(_))
	}
}

/// Bearer-token verification failures.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AuthError {
	/// Token is not a structurally valid JWT or lacks required claims.
	#[error("Bearer token is malformed: {reason}.")]
	MalformedToken {
		/// Parser- or gate-supplied reason string.
		reason: String,
	},
	/// Signature, algorithm, issuer, or token kind did not check out.
	#[error("Bearer token is invalid: {reason}.")]
	InvalidToken {
		/// Verifier-supplied reason string.
		reason: String,
	},
	/// Current time is at or past the `exp` claim.
	#[error("Bearer token has expired.")]
	ExpiredToken,
	/// Token id is present on the revocation deny-list.
	#[error("Bearer token has been revoked.")]
	Revoked,
}
impl AuthError {
	/// Convenience constructor for [`AuthError::MalformedToken`].
	pub fn malformed(reason: impl Into<String>) -> Self {
		Self::MalformedToken { reason: reason.into() }
	}

	/// Convenience constructor for [`AuthError::InvalidToken`].
	pub fn invalid(reason: impl Into<String>) -> Self {
		Self::InvalidToken { reason: reason.into() }
	}

	/// Stable machine-readable code placed in denial bodies.
	pub fn code(&self) -> &'static str {
		match self {
			Self::MalformedToken { .. } => "MALFORMED_TOKEN",
			Self::InvalidToken { .. } => "INVALID_TOKEN",
			Self::ExpiredToken => "EXPIRED_TOKEN",
			Self::Revoked => "REVOKED_TOKEN",
		}
	}
}

/// Configuration and validation failures raised while assembling the gate.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Configuration document could not be parsed.
	#[error("Configuration is invalid at `{}`.", .source.path())]
	Parse {
		/// Structured parsing failure including the JSON path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// HMAC signing key is too short for HS256.
	#[error("Signing key must be at least {min} bytes, got {actual}.")]
	SigningKeyTooShort {
		/// Minimum accepted key length in bytes.
		min: usize,
		/// Length of the configured key.
		actual: usize,
	},
	/// A numeric option that must be positive was zero.
	#[error("Configuration option `{field}` must be greater than zero.")]
	MustBePositive {
		/// Dotted option name.
		field: &'static str,
	},
	/// A millisecond option is beyond what timestamps can represent safely.
	#[error("Configuration option `{field}` must not exceed {max}.")]
	MustNotExceed {
		/// Dotted option name.
		field: &'static str,
		/// Largest accepted value.
		max: u64,
	},
	/// A permit request can never be satisfied by the bucket.
	#[error("Permit cost {cost} exceeds bucket capacity {capacity}.")]
	CostExceedsCapacity {
		/// Requested permit cost.
		cost: u64,
		/// Configured bucket capacity.
		capacity: u64,
	},
	/// Token signing failed.
	#[error("Token could not be signed.")]
	TokenEncoding(#[from] jsonwebtoken::errors::Error),
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn statuses_and_codes_follow_denial_contract() {
		let auth = Error::from(AuthError::ExpiredToken);

		assert_eq!(auth.status(), 401);
		assert_eq!(auth.code(), "EXPIRED_TOKEN");

		let quota = Error::QuotaExceeded { retry_after: Duration::milliseconds(750) };

		assert_eq!(quota.status(), 429);
		assert_eq!(quota.retry_after(), Some(Duration::milliseconds(750)));

		let busy = Error::ResourceBusy { resource: "resource-1".into(), attempts: 3 };

		assert_eq!(busy.status(), 423);
		assert!(busy.retry_after().is_none());

		let store = Error::from(StoreError::Backend { message: "connection refused".into() });

		assert_eq!(store.status(), 503);
		assert_eq!(store.code(), "STORE_UNAVAILABLE");
	}

	#[test]
	fn store_error_is_exposed_as_source() {
		let store_error = StoreError::Backend { message: "cache unreachable".into() };
		let gate_error: Error = store_error.clone().into();

		assert!(gate_error.to_string().contains("cache unreachable"));

		let source = StdError::source(&gate_error)
			.expect("Gate error should expose the underlying store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn only_lock_errors_count_as_contention() {
		let lock = Error::from(LockError::Unavailable { resource: "r".into() });

		assert!(lock.is_lock_contention());
		assert!(!Error::from(AuthError::Revoked).is_lock_contention());
	}
}
