// self
use crate::{gate::GateStage, obs::GateOutcome};

/// Records a gate outcome via the global metrics recorder (when enabled).
pub fn record_gate_outcome(stage: GateStage, outcome: GateOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"access_gate_request_total",
			"stage" => stage.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (stage, outcome);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn record_gate_outcome_noop_without_metrics() {
		record_gate_outcome(GateStage::TokenVerified, GateOutcome::Denied);
	}
}
