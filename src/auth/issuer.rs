//! Token minting, refresh rotation, and revocation backed by the shared store.
//!
//! Issuing a token pair records the refresh token's fingerprint under `refresh:{principal}`, so
//! each principal has at most one active refresh token and [`TokenIssuer::logout`] can cut it
//! off. Revoked access tokens are tracked by `jti` under `denylist:{jti}` until they would have
//! expired anyway; the gate consults that list through [`Revocations`].

// crates.io
use jsonwebtoken::{Algorithm, EncodingKey, Header};
// self
use crate::{
	_prelude::*,
	auth::{BearerToken, Claims, PrincipalId, RoleSet, TokenKind, TokenVerifier, token::secret},
	clock::Clock,
	config::{GateConfig, MAX_DURATION_MS},
	error::{AuthError, ConfigError},
	store::{Namespace, SharedStore, StoreError, StoreKey},
};

/// Signed token together with the claims it carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
	/// Compact JWT.
	pub token: BearerToken,
	/// Claims embedded in [`token`](Self::token).
	pub claims: Claims,
}

/// Access/refresh pair returned at login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
	/// Short-lived access token.
	pub access: IssuedToken,
	/// Long-lived refresh token.
	pub refresh: IssuedToken,
}

/// Read-only view over the access-token deny-list.
#[derive(Clone)]
pub struct Revocations {
	store: Arc<dyn SharedStore>,
}
impl Revocations {
	/// Wraps the store holding `denylist:*` entries.
	pub fn new(store: Arc<dyn SharedStore>) -> Self {
		Self { store }
	}

	/// Returns `true` if the token id has been revoked and has not yet expired.
	pub async fn is_revoked(&self, token_id: &str) -> Result<bool, StoreError> {
		let key = StoreKey::new(Namespace::Denylist, token_id);

		Ok(self.store.get(&key).await?.is_some())
	}
}
impl Debug for Revocations {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("Revocations(..)")
	}
}

/// Mints HS256 tokens and manages their refresh and revocation state.
pub struct TokenIssuer {
	key: EncodingKey,
	header: Header,
	verifier: TokenVerifier,
	store: Arc<dyn SharedStore>,
	clock: Arc<dyn Clock>,
	token_ttl: Duration,
	refresh_token_ttl: Duration,
	issuer: Option<String>,
}
impl TokenIssuer {
	/// Builds an issuer that signs with the configured key and TTLs.
	pub fn from_config(
		config: &GateConfig,
		store: Arc<dyn SharedStore>,
		clock: Arc<dyn Clock>,
	) -> Result<Self, ConfigError> {
		config.validate()?;

		let verifier = TokenVerifier::from_config(config, clock.clone())?;

		Ok(Self {
			key: EncodingKey::from_secret(config.jwt_signing_key.as_bytes()),
			header: Header::new(Algorithm::HS256),
			verifier,
			store,
			clock,
			token_ttl: config.token_ttl(),
			refresh_token_ttl: config.refresh_token_ttl(),
			issuer: config.issuer.clone(),
		})
	}

	/// Deny-list view sharing this issuer's store.
	pub fn revocations(&self) -> Revocations {
		Revocations::new(self.store.clone())
	}

	/// Issues a standalone access token.
	pub fn issue_access(&self, principal: &PrincipalId, roles: RoleSet) -> Result<IssuedToken> {
		self.sign(principal, roles, TokenKind::Access, self.token_ttl)
	}

	/// Issues an access/refresh pair and makes the refresh token the principal's active one.
	pub async fn issue_pair(&self, principal: &PrincipalId, roles: RoleSet) -> Result<TokenPair> {
		let access = self.sign(principal, roles.clone(), TokenKind::Access, self.token_ttl)?;
		let refresh = self.sign(principal, roles, TokenKind::Refresh, self.refresh_token_ttl)?;

		self.store
			.set(
				&refresh_key(principal),
				refresh.token.fingerprint(),
				Some(self.refresh_token_ttl),
			)
			.await?;

		Ok(TokenPair { access, refresh })
	}

	/// Exchanges the active refresh token for a new access token.
	pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedToken> {
		let claims = self.verifier.claims_at(refresh_token, self.clock.now())?;

		if claims.kind != TokenKind::Refresh {
			return Err(AuthError::invalid("access tokens cannot be refreshed").into());
		}

		let active = self.store.get(&refresh_key(&claims.sub)).await?;

		if active.as_deref() != Some(secret::fingerprint(refresh_token).as_str()) {
			#[cfg(feature = "tracing")]
			tracing::warn!(principal = %claims.sub, "Refresh token is not the active one.");

			return Err(AuthError::invalid("refresh token is not active").into());
		}

		self.sign(&claims.sub, claims.roles, TokenKind::Access, self.token_ttl)
	}

	/// Deny-lists an access token for the rest of its lifetime.
	///
	/// Tokens that have already expired need no entry; the call is then a no-op.
	pub async fn revoke(&self, access_token: &str) -> Result<()> {
		let claims = self.verifier.decode(access_token)?;
		let remaining = claims.remaining_at(self.clock.now());

		if remaining.is_zero() {
			return Ok(());
		}

		self.store
			.set(
				&StoreKey::new(Namespace::Denylist, claims.jti.as_str()),
				claims.sub.to_string(),
				Some(remaining),
			)
			.await?;

		#[cfg(feature = "tracing")]
		tracing::info!(principal = %claims.sub, token_id = %claims.jti, "Access token revoked.");

		Ok(())
	}

	/// Drops the principal's active refresh token; returns `true` if one was present.
	pub async fn logout(&self, principal: &PrincipalId) -> Result<bool> {
		Ok(self.store.delete(&refresh_key(principal)).await?)
	}

	fn sign(
		&self,
		principal: &PrincipalId,
		roles: RoleSet,
		kind: TokenKind,
		ttl: Duration,
	) -> Result<IssuedToken> {
		let now = self.clock.now();
		let expires_at = now.checked_add(ttl).ok_or(ConfigError::MustNotExceed {
			field: match kind {
				TokenKind::Access => "tokenTTL",
				TokenKind::Refresh => "refreshTokenTTL",
			},
			max: MAX_DURATION_MS,
		})?;
		let claims = Claims {
			sub: principal.clone(),
			jti: secret::random_id(),
			iat: now.unix_timestamp(),
			exp: expires_at.unix_timestamp(),
			roles,
			kind,
			iss: self.issuer.clone(),
		};
		let token = jsonwebtoken::encode(&self.header, &claims, &self.key)
			.map_err(ConfigError::from)?;

		Ok(IssuedToken { token: BearerToken::new(token), claims })
	}
}
impl Debug for TokenIssuer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenIssuer")
			.field("key", &"<redacted>")
			.field("token_ttl", &self.token_ttl)
			.field("refresh_token_ttl", &self.refresh_token_ttl)
			.field("issuer", &self.issuer)
			.finish()
	}
}

fn refresh_key(principal: &PrincipalId) -> StoreKey {
	StoreKey::new(Namespace::Refresh, principal.as_ref())
}
