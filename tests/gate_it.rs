// std
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
// self
use access_gate::{
	_preludet::*,
	auth::{OperationId, Principal, ResourceId, RoleSet},
	clock::{Clock, ManualClock},
	config::{GateConfig, LockConfig, RateLimitConfig},
	error::AuthError,
	gate::{Gate, GateRequest},
	http::Denial,
	store::{CompareAndSwapOutcome, MemoryStore, SharedStore, StoreFuture, StoreKey},
};

/// Memory store whose compare-and-delete answers only after a real-time delay.
struct SlowRelease {
	inner: Arc<MemoryStore>,
	delay: std::time::Duration,
}
impl SharedStore for SlowRelease {
	fn get<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<String>> {
		self.inner.get(key)
	}

	fn set<'a>(
		&'a self,
		key: &'a StoreKey,
		value: String,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, ()> {
		self.inner.set(key, value, ttl)
	}

	fn set_if_absent<'a>(
		&'a self,
		key: &'a StoreKey,
		value: String,
		ttl: Duration,
	) -> StoreFuture<'a, bool> {
		self.inner.set_if_absent(key, value, ttl)
	}

	fn compare_and_swap<'a>(
		&'a self,
		key: &'a StoreKey,
		expected: Option<&'a str>,
		replacement: String,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		self.inner.compare_and_swap(key, expected, replacement, ttl)
	}

	fn compare_and_delete<'a>(
		&'a self,
		key: &'a StoreKey,
		expected: &'a str,
	) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			tokio::time::sleep(self.delay).await;

			self.inner.compare_and_delete(key, expected).await
		})
	}

	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, bool> {
		self.inner.delete(key)
	}
}

fn operation() -> OperationId {
	OperationId::new("lottery.draw").expect("Operation fixture should be valid.")
}

fn resource() -> ResourceId {
	ResourceId::new("draw-42").expect("Resource fixture should be valid.")
}

fn roles() -> RoleSet {
	RoleSet::new(["USER"]).expect("Role fixture should be valid.")
}

fn access_token(store: &Arc<MemoryStore>, clock: &Arc<ManualClock>, id: &str) -> String {
	let (issuer, _) = build_test_issuer(store.clone(), clock.clone());

	issuer
		.issue_access(&principal(id), roles())
		.expect("Access token should be issued.")
		.token
		.expose()
		.to_owned()
}

#[tokio::test]
async fn verified_request_reaches_handler_with_principal() -> color_eyre::Result<()> {
	let (gate, store, clock) = build_test_gate(test_config());
	let token = access_token(&store, &clock, "user-1");
	let request = GateRequest::new(operation(), 7_u32).with_bearer(&token);
	let response = gate
		.handle(request, |principal: Principal, payload| async move {
			format!("{}:{payload}", principal.id)
		})
		.await?;

	assert_eq!(response, "user-1:7");
	assert_eq!(gate.metrics().attempts(), 1);
	assert_eq!(gate.metrics().permitted(), 1);
	assert_eq!(gate.metrics().denied(), 0);

	Ok(())
}

#[tokio::test]
async fn auth_failures_deny_with_401_and_skip_handler() {
	let (gate, store, clock) = build_test_gate(test_config());
	let token = access_token(&store, &clock, "user-1");
	let called = AtomicBool::new(false);
	let run = |request: GateRequest<()>| {
		let gate = &gate;
		let called = &called;

		async move {
			gate.handle(request, |_, _| async move {
				called.store(true, Ordering::SeqCst);
			})
			.await
		}
	};

	let missing = run(GateRequest::new(operation(), ())).await.expect_err("Missing header must deny.");

	assert!(matches!(missing, Error::Auth(AuthError::MalformedToken { .. })));
	assert_eq!(missing.status(), 401);

	let garbage = run(GateRequest::new(operation(), ()).with_bearer("not-a-jwt"))
		.await
		.expect_err("Garbage token must deny.");

	assert!(matches!(garbage, Error::Auth(AuthError::MalformedToken { .. })));

	clock.advance(Duration::hours(1));

	let expired = run(GateRequest::new(operation(), ()).with_bearer(&token))
		.await
		.expect_err("Expired token must deny.");

	assert!(matches!(expired, Error::Auth(AuthError::ExpiredToken)));
	assert!(!called.load(Ordering::SeqCst));
	assert_eq!(gate.metrics().denied(), 3);
}

#[tokio::test]
async fn revoked_token_is_denied() {
	let (gate, store, clock) = build_test_gate(test_config());
	let (issuer, _) = build_test_issuer(store.clone(), clock.clone());
	let issued = issuer.issue_access(&principal("user-1"), roles()).expect("Token should be issued.");

	issuer.revoke(issued.token.expose()).await.expect("Revocation should be stored.");

	let err = gate
		.handle(GateRequest::new(operation(), ()).with_bearer(issued.token.expose()), |_, _| async {})
		.await
		.expect_err("Revoked token must deny.");

	assert!(matches!(err, Error::Auth(AuthError::Revoked)));
}

#[tokio::test]
async fn quota_exhaustion_denies_with_retry_hint() {
	let (gate, store, clock) = build_test_gate(test_config());
	let token = access_token(&store, &clock, "user-1");

	for _ in 0..5 {
		gate.handle(GateRequest::new(operation(), ()).with_bearer(&token), |_, _| async {})
			.await
			.expect("Requests within capacity should pass.");
	}

	let err = gate
		.handle(GateRequest::new(operation(), ()).with_bearer(&token), |_, _| async {})
		.await
		.expect_err("Sixth request should exceed the quota.");
	let denial = Denial::from_error(&err, clock.now());

	assert_eq!(err.retry_after(), Some(Duration::seconds(1)));
	assert_eq!(denial.status, 429);
	assert_eq!(denial.body.retry_after_ms, Some(1_000));

	// Another principal has its own bucket.
	let other = access_token(&store, &clock, "user-2");

	gate.handle(GateRequest::new(operation(), ()).with_bearer(&other), |_, _| async {})
		.await
		.expect("Other principals keep their own quota.");
}

#[tokio::test]
async fn contended_resource_reports_busy_after_retries() {
	let (gate, store, clock) = build_test_gate(test_config());
	let token = access_token(&store, &clock, "user-1");
	let _held = gate
		.locks()
		.try_acquire(&resource(), Duration::seconds(30))
		.await
		.expect("Free resource should lock.");
	let err = gate
		.handle(
			GateRequest::new(operation(), ()).with_bearer(&token).exclusive(resource()),
			|_, _| async {},
		)
		.await
		.expect_err("Held resource should stay busy.");

	match err {
		Error::ResourceBusy { attempts, .. } => assert_eq!(attempts, 3),
		other => panic!("Unexpected error: {other:?}"),
	}

	assert_eq!(gate.metrics().busy(), 1);
}

#[tokio::test]
async fn exclusive_operations_never_overlap() {
	let (gate, store, clock) = build_test_gate(GateConfig {
		rate_limit: RateLimitConfig { capacity: 100, refill_interval_ms: 1_000, ..Default::default() },
		lock: LockConfig { wait_timeout_ms: 2_000, ..test_config().lock },
		..test_config()
	});
	let token = access_token(&store, &clock, "user-1");
	let active = Arc::new(AtomicU32::new(0));
	let overlaps = Arc::new(AtomicU32::new(0));
	let mut tasks = Vec::new();

	for _ in 0..8 {
		let gate = gate.clone();
		let token = token.clone();
		let active = active.clone();
		let overlaps = overlaps.clone();

		tasks.push(tokio::spawn(async move {
			gate.handle(
				GateRequest::new(operation(), ()).with_bearer(&token).exclusive(resource()),
				|_, _| async move {
					if active.fetch_add(1, Ordering::SeqCst) > 0 {
						overlaps.fetch_add(1, Ordering::SeqCst);
					}

					tokio::time::sleep(std::time::Duration::from_millis(5)).await;
					active.fetch_sub(1, Ordering::SeqCst);
				},
			)
			.await
		}));
	}

	for task in tasks {
		task.await.expect("Gate task should not panic.").expect("Every request should run.");
	}

	assert_eq!(overlaps.load(Ordering::SeqCst), 0);
	assert!(
		gate.locks().try_acquire(&resource(), Duration::seconds(1)).await.is_ok(),
		"Lock should be free once all requests finish."
	);
}

#[tokio::test]
async fn per_principal_exclusivity_does_not_block_other_principals() {
	let (gate, store, clock) = build_test_gate(test_config());
	let alice = access_token(&store, &clock, "alice");
	let bob = access_token(&store, &clock, "bob");
	let _alice_lock = gate
		.locks()
		.try_acquire(&resource().scoped_to(&principal("alice")), Duration::seconds(30))
		.await
		.expect("Alice's scoped resource should lock.");
	let request = |token: &str| {
		GateRequest::new(operation(), ()).with_bearer(token).exclusive_per_principal(resource())
	};

	gate.handle(request(&bob), |_, _| async {}).await.expect("Bob is not blocked by Alice.");

	let err = gate
		.handle(request(&alice), |_, _| async {})
		.await
		.expect_err("Alice's own scoped lock is held.");

	assert!(matches!(err, Error::ResourceBusy { .. }));

	let lookalike = ResourceId::new("alice/draw-42").expect("Resource fixture should be valid.");

	gate.handle(
		GateRequest::new(operation(), ()).with_bearer(&alice).exclusive(lookalike),
		|_, _| async {},
	)
	.await
	.expect("A shared resource never aliases a principal-scoped lock.");
}

#[tokio::test]
async fn handler_timeout_releases_lock() {
	let (gate, store, clock) =
		build_test_gate(GateConfig { handler_timeout_ms: Some(20), ..test_config() });
	let token = access_token(&store, &clock, "user-1");
	let err = gate
		.handle(
			GateRequest::new(operation(), ()).with_bearer(&token).exclusive(resource()),
			|_, _| async {
				tokio::time::sleep(std::time::Duration::from_secs(5)).await;
			},
		)
		.await
		.expect_err("Slow handler should time out.");

	assert!(matches!(err, Error::HandlerTimeout { .. }));
	assert_eq!(err.status(), 504);
	assert_eq!(gate.metrics().handler_timeouts(), 1);
	assert!(gate.locks().try_acquire(&resource(), Duration::seconds(1)).await.is_ok());
}

#[tokio::test]
async fn cancelled_request_releases_lock() {
	let (gate, store, clock) = build_test_gate(test_config());
	let token = access_token(&store, &clock, "user-1");
	let pending = gate.handle(
		GateRequest::new(operation(), ()).with_bearer(&token).exclusive(resource()),
		|_, _| std::future::pending::<()>(),
	);

	assert!(
		tokio::time::timeout(std::time::Duration::from_millis(20), pending).await.is_err(),
		"Pending handler should be cancelled by the outer timeout."
	);

	let handle = gate
		.locks()
		.acquire(&resource(), Duration::seconds(1), Duration::milliseconds(500))
		.await
		.expect("Cancelled request should release its lock.");

	assert!(gate.locks().is_held(&handle).await.expect("Store should answer."));
}

#[tokio::test]
async fn cancellation_during_release_still_frees_lock() {
	let clock = test_clock();
	let memory = Arc::new(MemoryStore::with_clock(clock.clone()));
	let store: Arc<dyn SharedStore> =
		Arc::new(SlowRelease { inner: memory.clone(), delay: std::time::Duration::from_millis(50) });
	let dyn_clock: Arc<dyn Clock> = clock.clone();
	let gate = Gate::from_config(&test_config(), store, dyn_clock)
		.expect("Test configuration should build a gate.");
	let token = access_token(&memory, &clock, "user-1");
	let request = gate.handle(
		GateRequest::new(operation(), ()).with_bearer(&token).exclusive(resource()),
		|_, _| async {},
	);

	assert!(
		tokio::time::timeout(std::time::Duration::from_millis(20), request).await.is_err(),
		"Outer timeout should fire while the release is in flight."
	);

	tokio::time::sleep(std::time::Duration::from_millis(200)).await;

	assert!(
		gate.locks().try_acquire(&resource(), Duration::seconds(1)).await.is_ok(),
		"Lock should be released by the dropped guard."
	);
}

#[tokio::test]
async fn unreachable_store_fails_closed() {
	let (gate, store, clock) = build_test_gate(test_config());
	let token = access_token(&store, &clock, "user-1");

	store.set_offline(true);

	let err = gate
		.handle(GateRequest::new(operation(), ()).with_bearer(&token), |_, _| async {})
		.await
		.expect_err("Offline store must deny.");

	assert_eq!(err.status(), 503);
	assert_eq!(err.code(), "STORE_UNAVAILABLE");
}

#[tokio::test]
async fn gate_built_from_json_config() -> color_eyre::Result<()> {
	let config = GateConfig::from_json_str(&format!(
		r#"{{
			"jwtSigningKey": "{TEST_SIGNING_KEY}",
			"rateLimit": {{ "capacity": 1, "refillIntervalMs": 60000 }}
		}}"#
	))?;
	let clock = test_clock();
	let store = Arc::new(MemoryStore::with_clock(clock.clone()));
	let shared: Arc<dyn SharedStore> = store.clone();
	let dyn_clock: Arc<dyn Clock> = clock.clone();
	let gate = Gate::from_config(&config, shared, dyn_clock)?;
	let token = access_token(&store, &clock, "user-1");

	gate.handle(GateRequest::new(operation(), ()).with_bearer(&token), |_, _| async {}).await?;

	let err = gate
		.handle(GateRequest::new(operation(), ()).with_bearer(&token), |_, _| async {})
		.await
		.expect_err("Capacity of one allows a single request per minute.");

	assert_eq!(err.retry_after(), Some(Duration::minutes(1)));

	Ok(())
}
