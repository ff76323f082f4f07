//! HS256 bearer-token verification.
//!
//! Verification is a pure function of the token, the verification key, and "now": the
//! signature is checked by `jsonwebtoken`, while expiry is evaluated against the injected
//! [`Clock`] so callers and tests agree on the instant used.

// crates.io
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
// self
use crate::{
	_prelude::*,
	auth::{Claims, Principal, TokenKind},
	clock::Clock,
	config::{GateConfig, MIN_SIGNING_KEY_LEN},
	error::{AuthError, ConfigError},
};

/// Validates signed bearer tokens and turns them into [`Principal`]s.
#[derive(Clone)]
pub struct TokenVerifier {
	key: DecodingKey,
	validation: Validation,
	clock: Arc<dyn Clock>,
}
impl TokenVerifier {
	/// Creates a verifier for the HMAC `secret`, optionally pinning the `iss` claim.
	pub fn new(secret: &[u8], issuer: Option<&str>, clock: Arc<dyn Clock>) -> Self {
		let mut validation = Validation::new(Algorithm::HS256);

		// Expiry is checked against the injected clock instead.
		validation.validate_exp = false;
		validation.validate_aud = false;
		validation.leeway = 0;
		validation.set_required_spec_claims(&["exp", "sub"]);

		if let Some(issuer) = issuer {
			validation.set_issuer(&[issuer]);
		}

		Self { key: DecodingKey::from_secret(secret), validation, clock }
	}

	/// Builds a verifier from the gate configuration.
	pub fn from_config(config: &GateConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
		let secret = config.jwt_signing_key.as_bytes();

		if secret.len() < MIN_SIGNING_KEY_LEN {
			return Err(ConfigError::SigningKeyTooShort {
				min: MIN_SIGNING_KEY_LEN,
				actual: secret.len(),
			});
		}

		Ok(Self::new(secret, config.issuer.as_deref(), clock))
	}

	/// Verifies an access token against the current clock.
	pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
		self.verify_at(token, self.clock.now())
	}

	/// Verifies an access token as of `now`.
	pub fn verify_at(&self, token: &str, now: OffsetDateTime) -> Result<Principal, AuthError> {
		let claims = self.claims_at(token, now)?;

		if claims.kind != TokenKind::Access {
			return Err(AuthError::invalid("refresh tokens cannot authorize requests"));
		}

		Principal::from_claims(claims)
	}

	/// Verifies signature, structure, and expiry, returning the claims of any token kind.
	pub fn claims_at(&self, token: &str, now: OffsetDateTime) -> Result<Claims, AuthError> {
		let claims = self.decode(token)?;

		if claims.is_expired_at(now) {
			return Err(AuthError::ExpiredToken);
		}

		Ok(claims)
	}

	/// Verifies signature and structure only; expired tokens still decode.
	pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
		ensure_compact_shape(token)?;

		jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
			.map(|data| data.claims)
			.map_err(map_jwt_error)
	}

	/// Clock used for [`verify`](Self::verify).
	pub fn clock(&self) -> &Arc<dyn Clock> {
		&self.clock
	}
}
impl Debug for TokenVerifier {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenVerifier")
			.field("key", &"<redacted>")
			.field("issuer", &self.validation.iss)
			.finish()
	}
}

fn ensure_compact_shape(token: &str) -> Result<(), AuthError> {
	let segments = token.split('.').collect::<Vec<_>>();

	if segments.len() != 3 || segments.iter().any(|segment| segment.is_empty()) {
		return Err(AuthError::malformed("expected three dot-separated segments"));
	}

	Ok(())
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> AuthError {
	match e.kind() {
		ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
		ErrorKind::InvalidToken
		| ErrorKind::Base64(_)
		| ErrorKind::Json(_)
		| ErrorKind::Utf8(_)
		| ErrorKind::MissingRequiredClaim(_) => AuthError::malformed(e.to_string()),
		ErrorKind::InvalidSignature => AuthError::invalid("signature mismatch"),
		ErrorKind::InvalidAlgorithm => AuthError::invalid("unexpected signing algorithm"),
		ErrorKind::InvalidIssuer => AuthError::invalid("untrusted issuer"),
		_ => AuthError::invalid(e.to_string()),
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use jsonwebtoken::{EncodingKey, Header};
	// self
	use super::*;
	use crate::{
		_preludet::{TEST_EPOCH, TEST_SIGNING_KEY, principal, test_clock},
		auth::RoleSet,
	};

	fn sign(claims: &Claims, key: &str, algorithm: Algorithm) -> String {
		jsonwebtoken::encode(
			&Header::new(algorithm),
			claims,
			&EncodingKey::from_secret(key.as_bytes()),
		)
		.expect("Test claims should encode.")
	}

	fn claims(kind: TokenKind, ttl: Duration) -> Claims {
		Claims {
			sub: principal("user-1"),
			jti: "jti-1".into(),
			iat: TEST_EPOCH.unix_timestamp(),
			exp: (TEST_EPOCH + ttl).unix_timestamp(),
			roles: RoleSet::new(["USER"]).expect("Role fixture should be valid."),
			kind,
			iss: None,
		}
	}

	fn verifier() -> TokenVerifier {
		TokenVerifier::new(TEST_SIGNING_KEY.as_bytes(), None, test_clock())
	}

	#[test]
	fn valid_token_yields_principal_with_claims() {
		let token = sign(&claims(TokenKind::Access, Duration::hours(1)), TEST_SIGNING_KEY, Algorithm::HS256);
		let principal = verifier().verify(&token).expect("Fresh token should verify.");

		assert_eq!(principal.id.as_ref(), "user-1");
		assert!(principal.has_role("USER"));
		assert_eq!(principal.expires_at, TEST_EPOCH + Duration::hours(1));
		assert_eq!(principal.token_id, "jti-1");
	}

	#[test]
	fn expired_token_is_reported_as_expired() {
		let token = sign(&claims(TokenKind::Access, Duration::minutes(5)), TEST_SIGNING_KEY, Algorithm::HS256);
		let verifier = verifier();

		assert_eq!(
			verifier.verify_at(&token, TEST_EPOCH + Duration::minutes(5)),
			Err(AuthError::ExpiredToken)
		);
		assert!(verifier.decode(&token).is_ok(), "Decode must ignore expiry.");
	}

	#[test]
	fn wrong_key_and_wrong_algorithm_are_invalid() {
		let claims = claims(TokenKind::Access, Duration::hours(1));
		let forged = sign(&claims, "another-signing-key-0123456789abcdef", Algorithm::HS256);
		let other_alg = sign(&claims, TEST_SIGNING_KEY, Algorithm::HS512);

		assert!(matches!(verifier().verify(&forged), Err(AuthError::InvalidToken { .. })));
		assert!(matches!(verifier().verify(&other_alg), Err(AuthError::InvalidToken { .. })));
	}

	#[test]
	fn structural_garbage_is_malformed() {
		let verifier = verifier();

		for token in ["", "abc", "a.b", "a..c", "a.b.c.d", "!!!.???.###"] {
			assert!(
				matches!(verifier.verify(token), Err(AuthError::MalformedToken { .. })),
				"{token:?} should be malformed"
			);
		}
	}

	#[test]
	fn refresh_tokens_cannot_authorize_requests() {
		let token = sign(&claims(TokenKind::Refresh, Duration::days(1)), TEST_SIGNING_KEY, Algorithm::HS256);

		assert!(matches!(verifier().verify(&token), Err(AuthError::InvalidToken { .. })));
	}

	#[test]
	fn pinned_issuer_rejects_foreign_tokens() {
		let verifier = TokenVerifier::new(TEST_SIGNING_KEY.as_bytes(), Some("gate"), test_clock());
		let mut foreign = claims(TokenKind::Access, Duration::hours(1));

		foreign.iss = Some("elsewhere".into());

		let token = sign(&foreign, TEST_SIGNING_KEY, Algorithm::HS256);

		assert!(matches!(verifier.verify(&token), Err(AuthError::InvalidToken { .. })));
	}
}
