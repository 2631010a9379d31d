//! Strategy selection table.

// self
use crate::{_prelude::*, taxonomy::ErrorType};

/// Recovery strategy chosen for a classified failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
	/// Refresh the access token through the refresh coordinator.
	TokenRefresh,
	/// Retry with exponential backoff after a transport failure.
	NetworkRetry,
	/// Wait for the provider quota to reset.
	QuotaWait,
	/// Retry with exponential backoff while the provider is unavailable.
	ServiceRetry,
	/// Stop and ask the user to reconnect.
	UserInterventionRequired,
	/// Surface the failure to the caller without retrying.
	NotRetryable,
	/// Retry an unrecognized failure once.
	UnknownRetry,
}
impl RecoveryStrategy {
	/// Picks the strategy for `error_type`.
	///
	/// `has_refresh_path` tells whether an expired token can be refreshed. `unknown_recurred`
	/// tells whether the current episode already spent its single unknown-error retry.
	pub const fn select(error_type: ErrorType, has_refresh_path: bool, unknown_recurred: bool) -> Self {
		match error_type {
			ErrorType::TokenExpired | ErrorType::ExpiredRefreshToken if has_refresh_path =>
				RecoveryStrategy::TokenRefresh,
			ErrorType::TokenExpired | ErrorType::ExpiredRefreshToken =>
				RecoveryStrategy::UserInterventionRequired,
			ErrorType::NetworkError | ErrorType::Timeout => RecoveryStrategy::NetworkRetry,
			ErrorType::ApiQuotaExceeded => RecoveryStrategy::QuotaWait,
			ErrorType::ServiceUnavailable => RecoveryStrategy::ServiceRetry,
			ErrorType::InvalidRefreshToken
			| ErrorType::InvalidCredentials
			| ErrorType::InsufficientPermissions => RecoveryStrategy::UserInterventionRequired,
			ErrorType::StorageQuotaExceeded
			| ErrorType::FolderAccessDenied
			| ErrorType::InvalidFileType
			| ErrorType::FileTooLarge
			| ErrorType::InvalidFileContent
			| ErrorType::ProviderNotConfigured
			| ErrorType::FileNotFound => RecoveryStrategy::NotRetryable,
			ErrorType::UnknownError if unknown_recurred => RecoveryStrategy::UserInterventionRequired,
			ErrorType::UnknownError => RecoveryStrategy::UnknownRetry,
		}
	}

	/// Returns `true` for strategies that wait and retry through the scheduled sweep.
	pub const fn is_scheduled(self) -> bool {
		matches!(
			self,
			RecoveryStrategy::NetworkRetry
				| RecoveryStrategy::QuotaWait
				| RecoveryStrategy::ServiceRetry
				| RecoveryStrategy::UnknownRetry
		)
	}

	/// Returns a stable label suitable for logs and metrics.
	pub const fn as_str(self) -> &'static str {
		match self {
			RecoveryStrategy::TokenRefresh => "token_refresh",
			RecoveryStrategy::NetworkRetry => "network_retry",
			RecoveryStrategy::QuotaWait => "quota_wait",
			RecoveryStrategy::ServiceRetry => "service_retry",
			RecoveryStrategy::UserInterventionRequired => "user_intervention_required",
			RecoveryStrategy::NotRetryable => "not_retryable",
			RecoveryStrategy::UnknownRetry => "unknown_retry",
		}
	}
}
impl Display for RecoveryStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
