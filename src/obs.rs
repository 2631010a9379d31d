//! Optional observability helpers for engine operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `cloud_storage_resilience.operation` with the
//!   `operation` and `stage` (call site) fields, plus events for recovery decisions.
//! - Enable `metrics` to increment the `cloud_storage_resilience_operation_total` counter for
//!   every attempt/success/failure (labeled by `operation` + `outcome`) and the
//!   `cloud_storage_resilience_recovery_total` counter labeled by `strategy` + `state`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Engine operations observed by spans and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
	/// Token validity check with an optional refresh.
	EnsureToken,
	/// Failure classification and recovery.
	HandleFailure,
	/// Connect flow completion.
	Connect,
	/// User-initiated disconnect.
	Disconnect,
	/// Periodic renewal and retry sweep.
	Sweep,
}
impl OperationKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OperationKind::EnsureToken => "ensure_token",
			OperationKind::HandleFailure => "handle_failure",
			OperationKind::Connect => "connect",
			OperationKind::Disconnect => "disconnect",
			OperationKind::Sweep => "sweep",
		}
	}
}
impl Display for OperationKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationOutcome {
	/// Entry to an engine operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure reported back to the caller.
	Failure,
}
impl OperationOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OperationOutcome::Attempt => "attempt",
			OperationOutcome::Success => "success",
			OperationOutcome::Failure => "failure",
		}
	}
}
impl Display for OperationOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
