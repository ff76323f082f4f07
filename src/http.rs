//! HTTP-facing edges of the gate: `Authorization` header parsing and structured denial bodies.
//!
//! The crate does not bind to a web framework; adapters pass the raw header value in and
//! serialize [`Denial::body`] back out with [`Denial::status`].

// crates.io
use time::format_description::well_known::Rfc3339;
// self
use crate::{_prelude::*, error::AuthError};

const BEARER_SCHEME: &str = "Bearer";

/// Extracts the token from an `Authorization: Bearer <token>` header value.
///
/// The scheme is matched case-insensitively; a missing header, another scheme, or an empty
/// token is reported as [`AuthError::MalformedToken`].
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
	let header = header.ok_or_else(|| AuthError::malformed("missing Authorization header"))?;
	let (scheme, token) = header
		.trim()
		.split_once(' ')
		.ok_or_else(|| AuthError::malformed("expected `Bearer <token>`"))?;

	if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
		return Err(AuthError::malformed("unsupported authorization scheme"));
	}

	let token = token.trim();

	if token.is_empty() {
		return Err(AuthError::malformed("empty bearer token"));
	}

	Ok(token)
}

/// JSON body returned with every denial.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
	/// Stable machine-readable code.
	pub code: String,
	/// Human-readable message.
	pub message: String,
	/// Retry hint for quota denials, in milliseconds.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub retry_after_ms: Option<u64>,
	/// Correlation id for log lookups.
	pub trace_id: String,
	/// RFC 3339 instant the denial was produced.
	pub timestamp: String,
}

/// Status code plus body for one denied request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Denial {
	/// HTTP status code.
	pub status: u16,
	/// Serialized body.
	pub body: ErrorBody,
}
impl Denial {
	/// Builds the denial for `error`, stamped at `now` with a fresh trace id.
	pub fn from_error(error: &Error, now: OffsetDateTime) -> Self {
		Self::with_trace_id(error, now, new_trace_id())
	}

	/// Builds the denial with a caller-supplied trace id.
	pub fn with_trace_id(error: &Error, now: OffsetDateTime, trace_id: impl Into<String>) -> Self {
		let retry_after_ms = error
			.retry_after()
			.map(|retry| u64::try_from(retry.whole_milliseconds()).unwrap_or_default());
		let timestamp = now.format(&Rfc3339).unwrap_or_else(|_| now.unix_timestamp().to_string());

		Self {
			status: error.status(),
			body: ErrorBody {
				code: error.code().into(),
				message: error.to_string(),
				retry_after_ms,
				trace_id: trace_id.into(),
				timestamp,
			},
		}
	}

	/// `Retry-After` header value in whole seconds, rounded up.
	pub fn retry_after_header(&self) -> Option<String> {
		self.body.retry_after_ms.map(|ms| ms.div_ceil(1_000).to_string())
	}

	/// Serializes the body to JSON.
	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(&self.body)
	}
}

fn new_trace_id() -> String {
	format!("{:016x}", rand::random::<u64>())
}
