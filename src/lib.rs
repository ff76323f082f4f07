//! Distributed request gate: JWT verification, shared-store token buckets, and lease-based
//! resource locks composed in front of a request handler.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod http;
pub mod lock;
pub mod obs;
pub mod rate_limit;
pub mod store;
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and fixture builders shared by unit and integration tests.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::{PrincipalId, TokenIssuer, TokenVerifier},
		clock::{Clock, ManualClock},
		config::{GateConfig, LockConfig, RateLimitConfig},
		gate::Gate,
		store::{MemoryStore, SharedStore},
	};

	/// Signing key used by every test fixture (32 bytes, the HS256 minimum accepted by config).
	pub const TEST_SIGNING_KEY: &str = "test-signing-key-0123456789abcdef";

	/// Fixed instant all manual clocks start from.
	pub const TEST_EPOCH: OffsetDateTime = time::macros::datetime!(2025-11-10 12:00 UTC);

	/// Builds a configuration with small, test-friendly lock timings.
	pub fn test_config() -> GateConfig {
		GateConfig {
			jwt_signing_key: TEST_SIGNING_KEY.into(),
			rate_limit: RateLimitConfig { capacity: 5, refill_interval_ms: 1_000, ..Default::default() },
			lock: LockConfig {
				default_lease_ms: 5_000,
				wait_timeout_ms: 100,
				max_retries: 2,
				retry_backoff_ms: 10,
				poll_interval_ms: 5,
			},
			..Default::default()
		}
	}

	/// Builds a manual clock pinned to [`TEST_EPOCH`].
	pub fn test_clock() -> Arc<ManualClock> {
		Arc::new(ManualClock::new(TEST_EPOCH))
	}

	/// Builds a parsed principal identifier, panicking on invalid fixtures.
	pub fn principal(id: &str) -> PrincipalId {
		PrincipalId::new(id).expect("Principal fixture should be valid.")
	}

	/// Constructs a [`Gate`] backed by an in-memory store that shares the returned manual clock.
	pub fn build_test_gate(config: GateConfig) -> (Gate, Arc<MemoryStore>, Arc<ManualClock>) {
		let clock = test_clock();
		let store_backend = Arc::new(MemoryStore::with_clock(clock.clone()));
		let store: Arc<dyn SharedStore> = store_backend.clone();
		let dyn_clock: Arc<dyn Clock> = clock.clone();
		let gate = Gate::from_config(&config, store, dyn_clock)
			.expect("Test configuration should build a gate.");

		(gate, store_backend, clock)
	}

	/// Builds an issuer/verifier pair sharing the test signing key and a manual clock.
	pub fn build_test_issuer(
		store: Arc<dyn SharedStore>,
		clock: Arc<ManualClock>,
	) -> (TokenIssuer, TokenVerifier) {
		let config = test_config();
		let dyn_clock: Arc<dyn Clock> = clock;
		let verifier = TokenVerifier::from_config(&config, dyn_clock.clone())
			.expect("Test configuration should build a verifier.");
		let issuer = TokenIssuer::from_config(&config, store, dyn_clock)
			.expect("Test configuration should build an issuer.");

		(issuer, verifier)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeSet, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "redis")] pub use redis;
#[cfg(test)] use color_eyre as _;
