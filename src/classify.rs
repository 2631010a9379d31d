//! Raw provider failures and their classification into the closed [`ErrorType`] taxonomy.
//!
//! Classification is layered: transport flags first, then the provider's reason table, then the
//! generic OAuth reason table, then message heuristics, and finally the HTTP status code. Any
//! signal that survives every layer unmatched maps to [`ErrorType::UnknownError`].

// self
use crate::{_prelude::*, connection::ProviderId, taxonomy::ErrorType};

const MESSAGE_PREVIEW_LIMIT: usize = 256;

/// Raw failure signal observed by a caller of a provider operation.
///
/// The struct keeps only primitive data (status code, reason string, transport flags) so
/// classification stays independent of any HTTP client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFailure {
	/// HTTP status code returned by the provider, when available.
	pub status: Option<u16>,
	/// Provider-specific reason or OAuth `error` code.
	pub reason: Option<String>,
	/// Free-form message or OAuth `error_description`.
	pub message: Option<String>,
	/// The failure originated in the network/transport layer.
	pub network: bool,
	/// The failure was a timeout.
	pub timeout: bool,
	/// The failure was returned by a token refresh call.
	pub during_refresh: bool,
	/// Provider-reported wait before retrying (`Retry-After`).
	#[serde(default, with = "crate::classify::optional_seconds")]
	pub retry_after: Option<Duration>,
	/// Instant the failure was observed; defaults to the classification time.
	pub observed_at: Option<OffsetDateTime>,
	/// Extra diagnostic context copied into the classified error.
	pub context: BTreeMap<String, String>,
}
impl RawFailure {
	/// Failure described by an HTTP status code.
	pub fn http(status: u16) -> Self {
		Self { status: Some(status), ..Default::default() }
	}

	/// Failure raised by the network/transport layer.
	pub fn network(message: impl Into<String>) -> Self {
		Self { network: true, message: Some(message.into()), ..Default::default() }
	}

	/// Failure raised by a timed-out call.
	pub fn timeout() -> Self {
		Self { timeout: true, ..Default::default() }
	}

	/// Adds the provider reason string.
	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());

		self
	}

	/// Adds a diagnostic message, truncated to a bounded preview.
	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(truncate_preview(message.into()));

		self
	}

	/// Marks the failure as coming from a token refresh call.
	pub fn during_refresh(mut self) -> Self {
		self.during_refresh = true;

		self
	}

	/// Adds the provider-reported retry delay.
	pub fn with_retry_after(mut self, delay: Duration) -> Self {
		self.retry_after = Some(delay);

		self
	}

	/// Sets the observation instant.
	pub fn observed_at(mut self, instant: OffsetDateTime) -> Self {
		self.observed_at = Some(instant);

		self
	}

	/// Adds one context entry.
	pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.context.insert(key.into(), value.into());

		self
	}

	/// Returns a short description suitable for `last_error_message`.
	pub fn summary(&self) -> String {
		match (self.status, self.reason.as_deref(), self.message.as_deref()) {
			(_, Some(reason), Some(message)) => format!("{reason}: {message}"),
			(_, Some(reason), None) => reason.to_owned(),
			(_, None, Some(message)) => message.to_owned(),
			(Some(status), None, None) => format!("HTTP {status}"),
			(None, None, None) if self.timeout => "timed out".into(),
			(None, None, None) if self.network => "network failure".into(),
			(None, None, None) => "unrecognized failure".into(),
		}
	}
}

/// Case-insensitive lookup table from provider reason strings to error types.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReasonTable(HashMap<String, ErrorType>);
impl ReasonTable {
	/// Generic OAuth 2.0 error codes shared by every token-based provider.
	pub fn generic() -> Self {
		Self::from_pairs(&[
			("invalid_grant", ErrorType::InvalidRefreshToken),
			("invalid_client", ErrorType::InvalidCredentials),
			("unauthorized_client", ErrorType::InvalidCredentials),
			("invalid_token", ErrorType::TokenExpired),
			("expired_token", ErrorType::TokenExpired),
			("insufficient_scope", ErrorType::InsufficientPermissions),
			("invalid_scope", ErrorType::InsufficientPermissions),
			("access_denied", ErrorType::InsufficientPermissions),
			("temporarily_unavailable", ErrorType::ServiceUnavailable),
			("server_error", ErrorType::ServiceUnavailable),
			("slow_down", ErrorType::ApiQuotaExceeded),
		])
	}

	/// Google Drive API reasons.
	pub fn google_drive() -> Self {
		Self::from_pairs(&[
			("quotaExceeded", ErrorType::ApiQuotaExceeded),
			("rateLimitExceeded", ErrorType::ApiQuotaExceeded),
			("userRateLimitExceeded", ErrorType::ApiQuotaExceeded),
			("dailyLimitExceeded", ErrorType::ApiQuotaExceeded),
			("sharingRateLimitExceeded", ErrorType::ApiQuotaExceeded),
			("storageQuotaExceeded", ErrorType::StorageQuotaExceeded),
			("teamDriveFileLimitExceeded", ErrorType::StorageQuotaExceeded),
			("authError", ErrorType::TokenExpired),
			("insufficientPermissions", ErrorType::InsufficientPermissions),
			("insufficientFilePermissions", ErrorType::FolderAccessDenied),
			("domainPolicy", ErrorType::InsufficientPermissions),
			("notFound", ErrorType::FileNotFound),
			("backendError", ErrorType::ServiceUnavailable),
			("internalError", ErrorType::ServiceUnavailable),
			("uploadTooLarge", ErrorType::FileTooLarge),
		])
	}

	/// Amazon S3 error codes.
	pub fn amazon_s3() -> Self {
		Self::from_pairs(&[
			("SlowDown", ErrorType::ApiQuotaExceeded),
			("RequestLimitExceeded", ErrorType::ApiQuotaExceeded),
			("AccessDenied", ErrorType::FolderAccessDenied),
			("AllAccessDisabled", ErrorType::FolderAccessDenied),
			("InvalidAccessKeyId", ErrorType::InvalidCredentials),
			("SignatureDoesNotMatch", ErrorType::InvalidCredentials),
			("ExpiredToken", ErrorType::InvalidCredentials),
			("NoSuchBucket", ErrorType::ProviderNotConfigured),
			("NoSuchKey", ErrorType::FileNotFound),
			("EntityTooLarge", ErrorType::FileTooLarge),
			("InvalidDigest", ErrorType::InvalidFileContent),
			("BadDigest", ErrorType::InvalidFileContent),
			("RequestTimeout", ErrorType::Timeout),
			("ServiceUnavailable", ErrorType::ServiceUnavailable),
			("InternalError", ErrorType::ServiceUnavailable),
		])
	}

	/// Resolves a preset by its configuration name.
	pub fn preset(name: ReasonPreset) -> Self {
		match name {
			ReasonPreset::Generic => Self::default(),
			ReasonPreset::GoogleDrive => Self::google_drive(),
			ReasonPreset::AmazonS3 => Self::amazon_s3(),
		}
	}

	/// Adds or replaces one mapping.
	pub fn insert(&mut self, reason: &str, error_type: ErrorType) {
		self.0.insert(reason.to_ascii_lowercase(), error_type);
	}

	/// Looks up a reason, ignoring ASCII case.
	pub fn lookup(&self, reason: &str) -> Option<ErrorType> {
		self.0.get(&reason.trim().to_ascii_lowercase()).copied()
	}

	/// Returns the number of mappings.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` when the table has no mappings.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	fn from_pairs(pairs: &[(&str, ErrorType)]) -> Self {
		let mut table = Self::default();

		for (reason, error_type) in pairs {
			table.insert(reason, *error_type);
		}

		table
	}
}

/// Reason-table presets selectable from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonPreset {
	/// Only the generic OAuth codes.
	#[default]
	Generic,
	/// Google Drive API reasons.
	GoogleDrive,
	/// Amazon S3 error codes.
	AmazonS3,
}

/// Result of classifying a [`RawFailure`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
	/// Classified error type.
	pub error_type: ErrorType,
	/// Structured context extracted from the raw failure.
	pub context: BTreeMap<String, String>,
}

/// Maps raw failures to [`ErrorType`] values. Pure and total.
#[derive(Clone, Debug)]
pub struct ErrorClassifier {
	generic: ReasonTable,
}
impl ErrorClassifier {
	/// Creates a classifier with the generic OAuth table.
	pub fn new() -> Self {
		Self { generic: ReasonTable::generic() }
	}

	/// Classifies `failure` using the provider-specific `table` layered over the generic codes.
	///
	/// `has_refresh_token` decides whether an unauthorized response means an expired access
	/// token (refreshable) or invalid credentials.
	pub fn classify(
		&self,
		provider: &ProviderId,
		table: &ReasonTable,
		failure: &RawFailure,
		has_refresh_token: bool,
	) -> Classification {
		let error_type = self.classify_type(table, failure, has_refresh_token);

		Classification { error_type, context: Self::extract_context(provider, failure) }
	}

	fn classify_type(
		&self,
		table: &ReasonTable,
		failure: &RawFailure,
		has_refresh_token: bool,
	) -> ErrorType {
		if failure.timeout {
			return ErrorType::Timeout;
		}
		if failure.network {
			return ErrorType::NetworkError;
		}
		if let Some(reason) = failure.reason.as_deref() {
			if let Some(error_type) = table.lookup(reason) {
				return error_type;
			}
			if let Some(error_type) = self.generic.lookup(reason) {
				return Self::refine_generic(error_type, failure);
			}
		}
		if let Some(error_type) = failure.message.as_deref().and_then(classify_message) {
			return Self::refine_generic(error_type, failure);
		}

		classify_status(failure.status, has_refresh_token, failure.during_refresh)
	}

	// `invalid_grant` covers both revoked and expired refresh tokens.
	fn refine_generic(error_type: ErrorType, failure: &RawFailure) -> ErrorType {
		match error_type {
			ErrorType::InvalidRefreshToken
				if failure
					.message
					.as_deref()
					.is_some_and(|message| message.to_ascii_lowercase().contains("expired")) =>
				ErrorType::ExpiredRefreshToken,
			ErrorType::InvalidRefreshToken if !failure.during_refresh =>
				ErrorType::InvalidCredentials,
			other => other,
		}
	}

	fn extract_context(provider: &ProviderId, failure: &RawFailure) -> BTreeMap<String, String> {
		let mut context = failure.context.clone();

		context.insert("provider".into(), provider.to_string());

		if let Some(status) = failure.status {
			context.insert("http_status".into(), status.to_string());
		}
		if let Some(reason) = &failure.reason {
			context.insert("reason".into(), reason.clone());
		}
		if let Some(delay) = failure.retry_after {
			context.insert("retry_after_seconds".into(), delay.whole_seconds().to_string());
		}
		if failure.during_refresh {
			context.insert("during_refresh".into(), "true".into());
		}

		context
	}
}
impl Default for ErrorClassifier {
	fn default() -> Self {
		Self::new()
	}
}

fn truncate_preview(message: String) -> String {
	if message.chars().count() <= MESSAGE_PREVIEW_LIMIT {
		return message;
	}

	let mut buf: String = message.chars().take(MESSAGE_PREVIEW_LIMIT).collect();

	buf.push('…');

	buf
}

fn classify_message(message: &str) -> Option<ErrorType> {
	let lowered = message.to_ascii_lowercase();

	match lowered.as_str() {
		text if text.contains("invalid_grant") => Some(ErrorType::InvalidRefreshToken),
		text if text.contains("invalid_client") => Some(ErrorType::InvalidCredentials),
		text if text.contains("insufficient_scope") => Some(ErrorType::InsufficientPermissions),
		text if text.contains("storage quota") => Some(ErrorType::StorageQuotaExceeded),
		text if text.contains("rate limit") || text.contains("quota") =>
			Some(ErrorType::ApiQuotaExceeded),
		text if text.contains("timed out") || text.contains("timeout") => Some(ErrorType::Timeout),
		text if text.contains("connection refused") || text.contains("connection reset") =>
			Some(ErrorType::NetworkError),
		_ => None,
	}
}

fn classify_status(status: Option<u16>, has_refresh_token: bool, during_refresh: bool) -> ErrorType {
	match status {
		Some(400) if during_refresh => ErrorType::InvalidRefreshToken,
		Some(401) if during_refresh => ErrorType::InvalidCredentials,
		Some(401) if has_refresh_token => ErrorType::TokenExpired,
		Some(401) => ErrorType::InvalidCredentials,
		Some(403) => ErrorType::InsufficientPermissions,
		Some(404 | 410) => ErrorType::FileNotFound,
		Some(408) => ErrorType::Timeout,
		Some(413) => ErrorType::FileTooLarge,
		Some(415) => ErrorType::InvalidFileType,
		Some(422) => ErrorType::InvalidFileContent,
		Some(429) => ErrorType::ApiQuotaExceeded,
		Some(507) => ErrorType::StorageQuotaExceeded,
		Some(504) => ErrorType::Timeout,
		Some(code) if (500..600).contains(&code) => ErrorType::ServiceUnavailable,
		_ => ErrorType::UnknownError,
	}
}

pub(crate) mod optional_seconds {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		value.map(|delay| delay.whole_seconds()).serialize(serializer)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Option::<i64>::deserialize(deserializer)?.map(Duration::seconds))
	}
}
