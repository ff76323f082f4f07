//! Authenticated identity handed to downstream handlers.

// self
use crate::{
	_prelude::*,
	auth::{Claims, PrincipalId, RoleSet},
	error::AuthError,
};

/// Identity extracted from a verified access token; immutable for the life of a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
	/// Subject identifier.
	pub id: PrincipalId,
	/// Granted roles.
	pub roles: RoleSet,
	/// Instant the presenting token stops being valid.
	pub expires_at: OffsetDateTime,
	/// Token id used for revocation checks.
	pub token_id: String,
}
impl Principal {
	/// Builds a principal from verified claims.
	pub fn from_claims(claims: Claims) -> Result<Self, AuthError> {
		let expires_at = claims.expires_at()?;

		Ok(Self { id: claims.sub, roles: claims.roles, expires_at, token_id: claims.jti })
	}

	/// Returns `true` if the principal holds `role`.
	pub fn has_role(&self, role: &str) -> bool {
		self.roles.contains(role)
	}
}
impl Display for Principal {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		Display::fmt(&self.id, f)
	}
}
