// self
use crate::{_prelude::*, connection::ConnectionKey, obs::OperationKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOperation<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOperation<F> = F;

/// A span builder used by engine operations.
#[derive(Clone, Debug)]
pub struct OperationSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OperationSpan {
	/// Creates a new span tagged with the provided operation + stage.
	pub fn new(kind: OperationKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"cloud_storage_resilience.operation",
				operation = kind.as_str(),
				stage
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOperation<Fut>
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

/// Emits an event describing the recovery decision taken for a connection.
pub fn trace_recovery(key: &ConnectionKey, error_type: &str, strategy: &str, state: &str) {
	#[cfg(feature = "tracing")]
	{
		tracing::info!(connection = %key, error_type, strategy, state, "recovery decision");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (key, error_type, strategy, state);
	}
}

/// Emits a warning for a failure the engine absorbed instead of surfacing.
pub fn trace_absorbed_failure(key: &ConnectionKey, stage: &'static str, error: &dyn StdError) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(connection = %key, stage, error = %error, "absorbed failure");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (key, stage, error);
	}
}

/// Emits a warning for a sweep stage that had to be skipped.
pub fn trace_sweep_failure(stage: &'static str, error: &dyn StdError) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(stage, error = %error, "sweep stage skipped");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (stage, error);
	}
}

/// Emits an event for a notification decision.
pub fn trace_notification(key: &ConnectionKey, template: &str, error_type: &str, sent: bool) {
	#[cfg(feature = "tracing")]
	{
		tracing::info!(connection = %key, template, error_type, sent, "notification");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (key, template, error_type, sent);
	}
}
