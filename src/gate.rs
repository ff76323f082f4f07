//! Per-request orchestration: verify the bearer token, spend quota, optionally take an exclusive
//! lock, run the handler, and release.
//!
//! Every request walks the [`GateStage`] pipeline
//! (`Received → TokenVerified → QuotaChecked → [LockHeld] → Executing → Released`, or `Denied`
//! from any stage before execution). Only lock contention is retried locally; token, quota, and
//! store failures are returned as-is, and an unreachable store always denies.

mod metrics;
mod stage;

pub use metrics::GateMetrics;
pub use stage::{GateStage, StageTransitionError};

// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	auth::{OperationId, Principal, PrincipalId, ResourceId, Revocations, TokenVerifier},
	clock::Clock,
	config::{GateConfig, LockConfig},
	error::{AuthError, ConfigError},
	http,
	lock::{LockGuard, LockManager, std_duration},
	obs::{self, GateOutcome, GateSpan},
	rate_limit::{RateLimitDecision, RateLimiter},
	store::SharedStore,
};

/// How an exclusive operation is keyed in the lock namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Exclusivity {
	/// One holder per resource across all principals.
	Resource(ResourceId),
	/// One holder per principal and resource.
	PrincipalResource(ResourceId),
}
impl Exclusivity {
	/// Lock id for `principal`.
	pub fn lock_id(&self, principal: &PrincipalId) -> ResourceId {
		match self {
			Self::Resource(resource) => resource.clone(),
			Self::PrincipalResource(resource) => resource.scoped_to(principal),
		}
	}
}

/// Inbound request as seen by the gate.
#[derive(Clone, Debug)]
pub struct GateRequest<Req> {
	/// Raw `Authorization` header value.
	pub authorization: Option<String>,
	/// Operation category used for quota partitioning.
	pub operation: OperationId,
	/// Exclusive-lock requirement, if any.
	pub exclusivity: Option<Exclusivity>,
	/// Quota tokens spent by the request.
	pub cost: u64,
	/// Payload forwarded to the handler.
	pub payload: Req,
}
impl<Req> GateRequest<Req> {
	/// Creates a non-exclusive request costing one token.
	pub fn new(operation: OperationId, payload: Req) -> Self {
		Self { authorization: None, operation, exclusivity: None, cost: 1, payload }
	}

	/// Sets the raw `Authorization` header value.
	pub fn with_authorization(mut self, header: impl Into<String>) -> Self {
		self.authorization = Some(header.into());

		self
	}

	/// Shorthand for `Authorization: Bearer <token>`.
	pub fn with_bearer(self, token: impl AsRef<str>) -> Self {
		let header = format!("Bearer {}", token.as_ref());

		self.with_authorization(header)
	}

	/// Requires an exclusive lock on `resource` shared by all principals.
	pub fn exclusive(mut self, resource: ResourceId) -> Self {
		self.exclusivity = Some(Exclusivity::Resource(resource));

		self
	}

	/// Requires an exclusive lock on `resource` for the calling principal only.
	pub fn exclusive_per_principal(mut self, resource: ResourceId) -> Self {
		self.exclusivity = Some(Exclusivity::PrincipalResource(resource));

		self
	}

	/// Overrides the quota cost (zero counts as one).
	pub fn with_cost(mut self, cost: u64) -> Self {
		self.cost = cost;

		self
	}
}

/// Composes verification, quota, and locking in front of a handler.
#[derive(Clone)]
pub struct Gate {
	verifier: TokenVerifier,
	revocations: Revocations,
	limiter: RateLimiter,
	locks: LockManager,
	lock_config: LockConfig,
	handler_timeout: Option<Duration>,
	clock: Arc<dyn Clock>,
	metrics: Arc<GateMetrics>,
}
impl Gate {
	/// Validates `config` and wires every component to the shared store and clock.
	pub fn from_config(
		config: &GateConfig,
		store: Arc<dyn SharedStore>,
		clock: Arc<dyn Clock>,
	) -> Result<Self, ConfigError> {
		config.validate()?;

		Ok(Self {
			verifier: TokenVerifier::from_config(config, clock.clone())?,
			revocations: Revocations::new(store.clone()),
			limiter: RateLimiter::from_config(&config.rate_limit, store.clone(), clock.clone()),
			locks: LockManager::new(store, clock.clone(), &config.lock),
			lock_config: config.lock.clone(),
			handler_timeout: config.handler_timeout(),
			clock,
			metrics: Default::default(),
		})
	}

	/// Decision counters for this gate instance.
	pub fn metrics(&self) -> &GateMetrics {
		&self.metrics
	}

	/// Lock manager sharing the gate's store.
	pub fn locks(&self) -> &LockManager {
		&self.locks
	}

	/// Clock the gate stamps denials with.
	pub fn clock(&self) -> &Arc<dyn Clock> {
		&self.clock
	}

	/// Runs `handler` if the request clears every stage.
	///
	/// A held lock is released whether the handler returns, times out, or the returned future
	/// is dropped mid-flight.
	pub async fn handle<Req, Resp, F, Fut>(
		&self,
		request: GateRequest<Req>,
		handler: F,
	) -> Result<Resp>
	where
		F: FnOnce(Principal, Req) -> Fut,
		Fut: Future<Output = Resp>,
	{
		let span = GateSpan::new(&request.operation, "handle");
		let mut stage = GateStage::Received;

		self.metrics.record_attempt();
		obs::record_gate_outcome(stage, GateOutcome::Attempt);

		let result = span.instrument(self.run(request, handler, &mut stage, &span)).await;

		match &result {
			Ok(_) => obs::record_gate_outcome(stage, GateOutcome::Permitted),
			Err(e) => {
				if !stage.is_terminal() {
					self.metrics.record_denied();
					obs::record_denial(stage, e);

					stage = GateStage::Denied;
				}

				obs::record_gate_outcome(stage, GateOutcome::Denied);
			},
		}

		result
	}

	async fn run<Req, Resp, F, Fut>(
		&self,
		request: GateRequest<Req>,
		handler: F,
		stage: &mut GateStage,
		span: &GateSpan,
	) -> Result<Resp>
	where
		F: FnOnce(Principal, Req) -> Fut,
		Fut: Future<Output = Resp>,
	{
		let GateRequest { authorization, operation, exclusivity, cost, payload } = request;
		let principal = self.authenticate(authorization.as_deref()).await?;

		span.record_principal(principal.id.as_ref());
		*stage = stage.advance(GateStage::TokenVerified)?;

		match self.limiter.check(&principal.id, &operation, cost).await? {
			RateLimitDecision::Permitted { .. } => {},
			RateLimitDecision::Denied(directive) =>
				return Err(Error::QuotaExceeded { retry_after: directive.retry_after }),
		}

		*stage = stage.advance(GateStage::QuotaChecked)?;

		let guard = match &exclusivity {
			Some(exclusivity) => {
				let guard = self.lock_with_retries(&exclusivity.lock_id(&principal.id)).await?;

				*stage = stage.advance(GateStage::LockHeld)?;

				Some(guard)
			},
			None => None,
		};

		*stage = stage.advance(GateStage::Executing)?;

		let executing = handler(principal, payload);
		let outcome = match self.handler_timeout {
			Some(after) => tokio::time::timeout(std_duration(after), executing)
				.await
				.map_err(|_| Error::HandlerTimeout { after }),
			None => Ok(executing.await),
		};

		if let Some(guard) = guard
			&& let Err(_e) = guard.release().await
		{
			// The handler already ran; the lease reclaims the lock.
			#[cfg(feature = "tracing")]
			tracing::warn!(error = %_e, "Lock release failed after execution.");
		}

		*stage = stage.advance(GateStage::Released)?;

		if outcome.is_err() {
			self.metrics.record_handler_timeout();
		} else {
			self.metrics.record_permitted();
		}

		outcome
	}

	async fn authenticate(&self, authorization: Option<&str>) -> Result<Principal> {
		let token = http::bearer_token(authorization)?;
		let principal = self.verifier.verify(token)?;

		if self.revocations.is_revoked(&principal.token_id).await? {
			return Err(AuthError::Revoked.into());
		}

		Ok(principal)
	}

	async fn lock_with_retries(&self, resource: &ResourceId) -> Result<LockGuard> {
		let max_retries = self.lock_config.max_retries;
		let mut attempts = 0;

		loop {
			attempts += 1;

			match self.locks.lock(resource).await {
				Ok(guard) => return Ok(guard),
				Err(e) if e.is_lock_contention() && attempts <= max_retries => {
					let delay = self.backoff(attempts);

					#[cfg(feature = "tracing")]
					tracing::debug!(resource = %resource, attempts, ?delay, "Lock busy; backing off.");

					tokio::time::sleep(delay).await;
				},
				Err(e) if e.is_lock_contention() => {
					self.metrics.record_busy();

					return Err(Error::ResourceBusy { resource: resource.to_string(), attempts });
				},
				Err(e) => return Err(e),
			}
		}
	}

	/// `base * 2^(attempt - 1)` plus up to `base` of jitter.
	fn backoff(&self, attempt: u32) -> std::time::Duration {
		let base = std_duration(self.lock_config.retry_backoff());
		let exponential = base.saturating_mul(1 << attempt.saturating_sub(1).min(16));
		let jitter = base.mul_f64(rand::rng().random::<f64>());

		exponential.saturating_add(jitter)
	}
}
impl Debug for Gate {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Gate")
			.field("verifier", &self.verifier)
			.field("limiter", &self.limiter)
			.field("locks", &self.locks)
			.field("handler_timeout", &self.handler_timeout)
			.field("metrics", &self.metrics)
			.finish()
	}
}
