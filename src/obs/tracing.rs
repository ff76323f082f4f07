// self
use crate::{_prelude::*, auth::OperationId, gate::GateStage};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedRequest<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedRequest<F> = F;

/// A span wrapping one pass through the gate.
#[derive(Clone, Debug)]
pub struct GateSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl GateSpan {
	/// Creates a new span tagged with the operation and call site.
	pub fn new(operation: &OperationId, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"access_gate.request",
				operation = operation.as_ref(),
				stage,
				principal = tracing::field::Empty
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (operation, stage);

			Self {}
		}
	}

	/// Records the verified principal on the span.
	pub fn record_principal(&self, principal: &str) {
		#[cfg(feature = "tracing")]
		{
			self.span.record("principal", principal);
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = principal;
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedRequest<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a denial event inside the current span.
pub fn record_denial(stage: GateStage, error: &Error) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(
			stage = stage.as_str(),
			status = error.status(),
			code = error.code(),
			error = %error,
			"Request denied."
		);
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (stage, error);
	}
}
