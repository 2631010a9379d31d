//! Closed error taxonomy shared by every component.
//!
//! Each [`ErrorType`] carries fixed `recoverable`, `requires_user_intervention`, and
//! [`Severity`] attributes. Downstream components branch on those attributes (and on the
//! enum itself), never on raw provider vocabulary.

// self
use crate::{_prelude::*, connection::ProviderId};

/// Impact level attached to every [`ErrorType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	/// Affects a single file or request.
	Low,
	/// Degrades the connection temporarily.
	Medium,
	/// Blocks the connection until someone acts.
	High,
	/// The connection cannot work at all.
	Critical,
}
impl Severity {
	/// Returns a stable label suitable for logs and reports.
	pub const fn as_str(self) -> &'static str {
		match self {
			Severity::Low => "low",
			Severity::Medium => "medium",
			Severity::High => "high",
			Severity::Critical => "critical",
		}
	}
}
impl Display for Severity {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Every failure the engine observes maps to exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
	/// Access token expired; a refresh should fix it.
	TokenExpired,
	/// Refresh token was rejected by the provider.
	InvalidRefreshToken,
	/// Refresh token outlived its own lifetime.
	ExpiredRefreshToken,
	/// Granted scopes do not cover the operation.
	InsufficientPermissions,
	/// Provider API rate limit or quota hit.
	ApiQuotaExceeded,
	/// User's storage space is full.
	StorageQuotaExceeded,
	/// DNS/TCP/TLS failure reaching the provider.
	NetworkError,
	/// Provider returned a 5xx or maintenance response.
	ServiceUnavailable,
	/// Request took too long.
	Timeout,
	/// Target file does not exist.
	FileNotFound,
	/// Target folder exists but is not accessible.
	FolderAccessDenied,
	/// Provider refuses the file type.
	InvalidFileType,
	/// File exceeds the provider's size limit.
	FileTooLarge,
	/// Provider rejected the file payload.
	InvalidFileContent,
	/// Provider is not registered or lacks required configuration.
	ProviderNotConfigured,
	/// Stored credentials (or client credentials) were rejected.
	InvalidCredentials,
	/// Nothing above matched.
	UnknownError,
}
impl ErrorType {
	/// Every variant, in declaration order.
	pub const ALL: [ErrorType; 17] = [
		ErrorType::TokenExpired,
		ErrorType::InvalidRefreshToken,
		ErrorType::ExpiredRefreshToken,
		ErrorType::InsufficientPermissions,
		ErrorType::ApiQuotaExceeded,
		ErrorType::StorageQuotaExceeded,
		ErrorType::NetworkError,
		ErrorType::ServiceUnavailable,
		ErrorType::Timeout,
		ErrorType::FileNotFound,
		ErrorType::FolderAccessDenied,
		ErrorType::InvalidFileType,
		ErrorType::FileTooLarge,
		ErrorType::InvalidFileContent,
		ErrorType::ProviderNotConfigured,
		ErrorType::InvalidCredentials,
		ErrorType::UnknownError,
	];

	/// Returns the stable upper-case label (`TOKEN_EXPIRED`, ...).
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorType::TokenExpired => "TOKEN_EXPIRED",
			ErrorType::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
			ErrorType::ExpiredRefreshToken => "EXPIRED_REFRESH_TOKEN",
			ErrorType::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
			ErrorType::ApiQuotaExceeded => "API_QUOTA_EXCEEDED",
			ErrorType::StorageQuotaExceeded => "STORAGE_QUOTA_EXCEEDED",
			ErrorType::NetworkError => "NETWORK_ERROR",
			ErrorType::ServiceUnavailable => "SERVICE_UNAVAILABLE",
			ErrorType::Timeout => "TIMEOUT",
			ErrorType::FileNotFound => "FILE_NOT_FOUND",
			ErrorType::FolderAccessDenied => "FOLDER_ACCESS_DENIED",
			ErrorType::InvalidFileType => "INVALID_FILE_TYPE",
			ErrorType::FileTooLarge => "FILE_TOO_LARGE",
			ErrorType::InvalidFileContent => "INVALID_FILE_CONTENT",
			ErrorType::ProviderNotConfigured => "PROVIDER_NOT_CONFIGURED",
			ErrorType::InvalidCredentials => "INVALID_CREDENTIALS",
			ErrorType::UnknownError => "UNKNOWN_ERROR",
		}
	}

	/// Static attribute row for this error type.
	pub const fn attributes(self) -> ErrorAttributes {
		use Severity::*;

		let (recoverable, requires_user_intervention, severity) = match self {
			ErrorType::TokenExpired => (true, false, Medium),
			ErrorType::InvalidRefreshToken => (false, true, High),
			ErrorType::ExpiredRefreshToken => (false, true, High),
			ErrorType::InsufficientPermissions => (false, true, High),
			ErrorType::ApiQuotaExceeded => (true, false, Medium),
			ErrorType::StorageQuotaExceeded => (false, true, High),
			ErrorType::NetworkError => (true, false, Medium),
			ErrorType::ServiceUnavailable => (true, false, Medium),
			ErrorType::Timeout => (true, false, Low),
			ErrorType::FileNotFound => (false, false, Low),
			ErrorType::FolderAccessDenied => (false, true, High),
			ErrorType::InvalidFileType => (false, false, Low),
			ErrorType::FileTooLarge => (false, false, Low),
			ErrorType::InvalidFileContent => (false, false, Low),
			ErrorType::ProviderNotConfigured => (false, true, Critical),
			ErrorType::InvalidCredentials => (false, true, Critical),
			ErrorType::UnknownError => (true, false, Medium),
		};

		ErrorAttributes { recoverable, requires_user_intervention, severity }
	}

	/// Whether automatic recovery can fix this error.
	pub const fn is_recoverable(self) -> bool {
		self.attributes().recoverable
	}

	/// Whether the user has to act before the connection works again.
	pub const fn requires_user_intervention(self) -> bool {
		self.attributes().requires_user_intervention
	}

	/// Impact level of this error.
	pub const fn severity(self) -> Severity {
		self.attributes().severity
	}

	/// Human-readable summary shown to end users.
	pub const fn user_message(self) -> &'static str {
		match self {
			ErrorType::TokenExpired => "Your access token has expired.",
			ErrorType::InvalidRefreshToken =>
				"Your stored authorization is no longer valid. Please reconnect your account.",
			ErrorType::ExpiredRefreshToken =>
				"Your stored authorization has expired. Please reconnect your account.",
			ErrorType::InsufficientPermissions =>
				"The connected account does not grant the permissions this operation needs.",
			ErrorType::ApiQuotaExceeded =>
				"The provider's API limit was reached. Requests will resume automatically.",
			ErrorType::StorageQuotaExceeded => "The connected storage account is full.",
			ErrorType::NetworkError => "The storage provider could not be reached.",
			ErrorType::ServiceUnavailable => "The storage provider is temporarily unavailable.",
			ErrorType::Timeout => "The storage provider took too long to respond.",
			ErrorType::FileNotFound => "The requested file could not be found.",
			ErrorType::FolderAccessDenied => "Access to the target folder was denied.",
			ErrorType::InvalidFileType => "This file type is not accepted by the provider.",
			ErrorType::FileTooLarge => "The file exceeds the provider's size limit.",
			ErrorType::InvalidFileContent => "The provider rejected the file contents.",
			ErrorType::ProviderNotConfigured => "This storage provider is not configured.",
			ErrorType::InvalidCredentials =>
				"The stored credentials were rejected. Please reconnect your account.",
			ErrorType::UnknownError => "An unexpected error occurred with the storage provider.",
		}
	}

	/// Ordered steps a user (or admin) can follow to resolve the error.
	pub const fn recovery_instructions(self) -> &'static [&'static str] {
		match self {
			ErrorType::TokenExpired => &[
				"No action needed; the connection renews its token automatically.",
				"If the problem persists, reconnect the account.",
			],
			ErrorType::InvalidRefreshToken
			| ErrorType::ExpiredRefreshToken
			| ErrorType::InvalidCredentials => &[
				"Open the storage settings.",
				"Disconnect the affected account.",
				"Connect the account again and approve the requested access.",
			],
			ErrorType::InsufficientPermissions => &[
				"Reconnect the account and grant every requested permission.",
				"Check that the account still has access to the configured folder.",
			],
			ErrorType::ApiQuotaExceeded => &[
				"Wait for the provider's rate limit to reset.",
				"Reduce the number of simultaneous uploads if this happens often.",
			],
			ErrorType::StorageQuotaExceeded => &[
				"Free up space in the connected storage account.",
				"Or upgrade the storage plan with the provider.",
			],
			ErrorType::NetworkError | ErrorType::Timeout => &[
				"Check the server's network connectivity.",
				"The engine retries automatically with increasing delays.",
			],
			ErrorType::ServiceUnavailable => &[
				"Check the provider's status page.",
				"The engine retries automatically once the service recovers.",
			],
			ErrorType::FileNotFound => &["Verify that the file still exists in the storage account."],
			ErrorType::FolderAccessDenied => &[
				"Verify that the target folder exists.",
				"Make sure the connected account can write to the folder.",
			],
			ErrorType::InvalidFileType => &["Upload a file type the provider accepts."],
			ErrorType::FileTooLarge => &["Split the file or upload a smaller version."],
			ErrorType::InvalidFileContent => &["Check that the file is not corrupted and retry."],
			ErrorType::ProviderNotConfigured => &[
				"Ask an administrator to configure the storage provider.",
				"Verify the provider's client credentials in the configuration.",
			],
			ErrorType::UnknownError => &[
				"Retry the operation.",
				"If the error persists, reconnect the account or contact support.",
			],
		}
	}
}
impl Display for ErrorType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for ErrorType {
	type Err = UnknownErrorTypeError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ErrorType::ALL
			.into_iter()
			.find(|kind| kind.as_str().eq_ignore_ascii_case(s))
			.ok_or_else(|| UnknownErrorTypeError { label: s.to_owned() })
	}
}

/// Returned when parsing an [`ErrorType`] label that does not exist.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Unknown error type label `{label}`.")]
pub struct UnknownErrorTypeError {
	/// Label that failed to parse.
	pub label: String,
}

/// Attribute row attached to an [`ErrorType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorAttributes {
	/// Whether automatic recovery can fix the error.
	pub recoverable: bool,
	/// Whether the user must act.
	pub requires_user_intervention: bool,
	/// Impact level.
	pub severity: Severity,
}

/// Structured failure surfaced to UI, logs, and notification templates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
#[error("{provider}: {message} ({error_type}).")]
pub struct ConnectionError {
	/// Classified error type.
	pub error_type: ErrorType,
	/// Provider the failure came from.
	pub provider: ProviderId,
	/// Human-readable message.
	pub message: String,
	/// Structured diagnostic context extracted during classification.
	pub context: BTreeMap<String, String>,
	/// Copied from the error type's attributes.
	pub requires_user_intervention: bool,
	/// Copied from the error type's attributes.
	pub is_recoverable: bool,
	/// Copied from the error type's attributes.
	pub severity: Severity,
}
impl ConnectionError {
	/// Builds an error using the error type's default user message.
	pub fn new(error_type: ErrorType, provider: ProviderId) -> Self {
		let attributes = error_type.attributes();

		Self {
			error_type,
			provider,
			message: error_type.user_message().to_owned(),
			context: BTreeMap::new(),
			requires_user_intervention: attributes.requires_user_intervention,
			is_recoverable: attributes.recoverable,
			severity: attributes.severity,
		}
	}

	/// Overrides the message.
	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = message.into();

		self
	}

	/// Replaces the structured context.
	pub fn with_context(mut self, context: BTreeMap<String, String>) -> Self {
		self.context = context;

		self
	}

	/// Ordered recovery instructions for the error type.
	pub fn recovery_instructions(&self) -> &'static [&'static str] {
		self.error_type.recovery_instructions()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn labels_round_trip_through_serde_and_from_str() {
		for kind in ErrorType::ALL {
			let payload =
				serde_json::to_string(&kind).expect("Error type should serialize to JSON.");

			assert_eq!(payload, format!("\"{}\"", kind.as_str()));
			assert_eq!(kind.as_str().parse::<ErrorType>(), Ok(kind));
		}

		assert_eq!("token_expired".parse::<ErrorType>(), Ok(ErrorType::TokenExpired));
		assert!("SOMETHING_ELSE".parse::<ErrorType>().is_err());
	}

	#[test]
	fn refresh_token_failures_need_the_user() {
		for kind in [
			ErrorType::InvalidRefreshToken,
			ErrorType::ExpiredRefreshToken,
			ErrorType::InvalidCredentials,
		] {
			assert!(!kind.is_recoverable());
			assert!(kind.requires_user_intervention());
			assert!(kind.severity() >= Severity::High);
		}

		assert!(ErrorType::TokenExpired.is_recoverable());
		assert!(!ErrorType::NetworkError.requires_user_intervention());
	}

	#[test]
	fn every_error_type_has_instructions() {
		for kind in ErrorType::ALL {
			assert!(!kind.recovery_instructions().is_empty(), "{kind} lacks instructions.");
			assert!(!kind.user_message().is_empty());
		}
	}

	#[test]
	fn connection_error_copies_attributes() {
		let provider = ProviderId::new("dropbox").expect("Provider fixture should be valid.");
		let error = ConnectionError::new(ErrorType::StorageQuotaExceeded, provider)
			.with_message("Storage is full.");

		assert!(error.requires_user_intervention);
		assert!(!error.is_recoverable);
		assert_eq!(error.severity, Severity::High);
		assert_eq!(error.to_string(), "dropbox: Storage is full. (STORAGE_QUOTA_EXCEEDED).");
	}
}
