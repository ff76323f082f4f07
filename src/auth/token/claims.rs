//! Claim schema shared by the issuer and the verifier.

// self
use crate::{
	_prelude::*,
	auth::{PrincipalId, RoleSet},
	error::AuthError,
};

/// Distinguishes short-lived access tokens from refresh tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
	/// Presented on every gated request.
	Access,
	/// Exchanged for a new access token; never accepted by the gate.
	Refresh,
}
impl TokenKind {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Access => "access",
			Self::Refresh => "refresh",
		}
	}
}
impl Display for TokenKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Signed claim set (HS256).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
	/// Subject principal.
	pub sub: PrincipalId,
	/// Unique token id, used as the revocation key.
	pub jti: String,
	/// Issued-at, seconds since the Unix epoch.
	pub iat: i64,
	/// Expiry, seconds since the Unix epoch.
	pub exp: i64,
	/// Granted roles.
	#[serde(default)]
	pub roles: RoleSet,
	/// Token kind.
	#[serde(rename = "typ")]
	pub kind: TokenKind,
	/// Issuer, when the deployment configures one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iss: Option<String>,
}
impl Claims {
	/// Expiry as an instant.
	pub fn expires_at(&self) -> Result<OffsetDateTime, AuthError> {
		OffsetDateTime::from_unix_timestamp(self.exp)
			.map_err(|_| AuthError::malformed("exp claim is out of range"))
	}

	/// Issued-at as an instant.
	pub fn issued_at(&self) -> Result<OffsetDateTime, AuthError> {
		OffsetDateTime::from_unix_timestamp(self.iat)
			.map_err(|_| AuthError::malformed("iat claim is out of range"))
	}

	/// Returns `true` once `now` reaches the expiry second.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		now.unix_timestamp() >= self.exp
	}

	/// Lifetime left at `now`, clamped to zero.
	pub fn remaining_at(&self, now: OffsetDateTime) -> Duration {
		let remaining = Duration::seconds(self.exp.saturating_sub(now.unix_timestamp()));

		if remaining.is_negative() { Duration::ZERO } else { remaining }
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn claims(exp: i64) -> Claims {
		Claims {
			sub: PrincipalId::new("user-1").expect("Principal fixture should be valid."),
			jti: "jti-1".into(),
			iat: exp - 60,
			exp,
			roles: RoleSet::new(["USER"]).expect("Role fixture should be valid."),
			kind: TokenKind::Access,
			iss: None,
		}
	}

	#[test]
	fn claim_names_match_wire_format() {
		let value = serde_json::to_value(claims(1_700_000_000))
			.expect("Claims should serialize to JSON.");

		assert_eq!(value["typ"], "access");
		assert_eq!(value["sub"], "user-1");
		assert_eq!(value["roles"][0], "USER");
		assert!(value.get("iss").is_none());
	}

	#[test]
	fn expiry_is_inclusive_of_the_exp_second() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let claims = claims(now.unix_timestamp() + 30);

		assert!(!claims.is_expired_at(now));
		assert_eq!(claims.remaining_at(now), Duration::seconds(30));
		assert!(claims.is_expired_at(now + Duration::seconds(30)));
		assert_eq!(claims.remaining_at(now + Duration::minutes(5)), Duration::ZERO);
	}
}
