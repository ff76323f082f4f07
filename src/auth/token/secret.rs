//! Redacted bearer token wrapper and fingerprints that keep raw tokens out of the store.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Redacted bearer token wrapper keeping signed material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BearerToken(String);
impl BearerToken {
	/// Wraps a compact JWT string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Stable base64 (no padding) SHA-256 digest of the token, safe to persist.
	pub fn fingerprint(&self) -> String {
		fingerprint(&self.0)
	}
}
impl AsRef<str> for BearerToken {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for BearerToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("BearerToken").field(&"<redacted>").finish()
	}
}
impl Display for BearerToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

pub(crate) fn fingerprint(token: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

/// 128 random bits, URL-safe base64; used for token ids and lock owner tokens.
pub(crate) fn random_id() -> String {
	URL_SAFE_NO_PAD.encode(rand::random::<[u8; 16]>())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn token_formatters_redact() {
		let token = BearerToken::new("header.payload.signature");

		assert_eq!(format!("{token:?}"), "BearerToken(\"<redacted>\")");
		assert_eq!(format!("{token}"), "<redacted>");
	}

	#[test]
	fn fingerprint_is_stable_and_opaque() {
		let token = BearerToken::new("header.payload.signature");
		let print = token.fingerprint();

		assert_eq!(print, BearerToken::new("header.payload.signature").fingerprint());
		assert_ne!(print, BearerToken::new("header.payload.other").fingerprint());
		assert!(!print.contains("payload"));
		assert_eq!(print.len(), 43);
	}

	#[test]
	fn random_ids_do_not_repeat() {
		let ids = (0..64).map(|_| random_id()).collect::<BTreeSet<_>>();

		assert_eq!(ids.len(), 64);
		assert!(ids.iter().all(|id| id.len() == 22));
	}
}
