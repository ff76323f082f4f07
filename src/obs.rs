//! Optional observability helpers for gated requests.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `access_gate.request` with the `operation`
//!   and `stage` (call site) fields, plus `warn` events for every denial.
//! - Enable `metrics` to increment the `access_gate_request_total` counter for every
//!   attempt/permit/denial, labeled by `stage` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Outcome labels recorded for each request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GateOutcome {
	/// Entry to the gate.
	Attempt,
	/// The handler ran.
	Permitted,
	/// The request was rejected before or while running the handler.
	Denied,
}
impl GateOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			GateOutcome::Attempt => "attempt",
			GateOutcome::Permitted => "permitted",
			GateOutcome::Denied => "denied",
		}
	}
}
impl Display for GateOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
