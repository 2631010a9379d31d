// self
use crate::obs::{OperationKind, OperationOutcome};

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_operation_outcome(kind: OperationKind, outcome: OperationOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"cloud_storage_resilience_operation_total",
			"operation" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Records a recovery decision labeled by strategy and resulting state.
pub fn record_recovery(strategy: &'static str, state: &'static str) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"cloud_storage_resilience_recovery_total",
			"strategy" => strategy,
			"state" => state
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (strategy, state);
	}
}
