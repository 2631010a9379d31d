//! Token lifecycle status and the issued-token model handed over by providers.

// self
use crate::{_prelude::*, connection::secret::TokenSecret};

/// Lifecycle status of an OAuth connection's access token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
	/// Token is usable and outside the proactive-refresh window.
	Valid,
	/// Token passed its expiry instant or was rejected by the provider.
	Expired,
	/// Token is still usable but should be renewed soon.
	RefreshNeeded,
	/// Token (and its refresh path) can no longer be used; the user must reconnect.
	Invalid,
	/// No token is on file.
	#[default]
	Missing,
}
impl TokenStatus {
	/// Returns a stable label suitable for logs and reports.
	pub const fn as_str(self) -> &'static str {
		match self {
			TokenStatus::Valid => "valid",
			TokenStatus::Expired => "expired",
			TokenStatus::RefreshNeeded => "refresh_needed",
			TokenStatus::Invalid => "invalid",
			TokenStatus::Missing => "missing",
		}
	}
}
impl Display for TokenStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Errors produced by [`IssuedTokenBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum IssuedTokenError {
	/// Issued when the access token (or key) value is empty.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when the expiry is not after the issued-at instant.
	#[error("Token expiry must be after its issued-at instant.")]
	NonPositiveLifetime,
}

/// Credentials issued by a provider, either at connect time or by a refresh.
///
/// Key/secret providers store their key here without an expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
	/// Access token (or key identifier); callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token, when the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Instant the provider issued the token.
	pub issued_at: OffsetDateTime,
	/// Expiry instant, absent for non-expiring credentials.
	pub expires_at: Option<OffsetDateTime>,
}
impl IssuedToken {
	/// Returns a builder for the provided access token value.
	pub fn builder(access_token: impl Into<String>) -> IssuedTokenBuilder {
		IssuedTokenBuilder::new(access_token)
	}

	/// Returns `true` once `instant` reached the expiry.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expires| instant >= expires)
	}

	/// Returns the remaining lifetime at `instant`, if the token expires at all.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Option<Duration> {
		self.expires_at.map(|expires| expires - instant)
	}
}
impl Debug for IssuedToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IssuedToken")
			.field("access_token", &self.access_token)
			.field("refresh_token", &self.refresh_token)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`IssuedToken`].
#[derive(Clone, Debug)]
pub struct IssuedTokenBuilder {
	access_token: TokenSecret,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl IssuedTokenBuilder {
	fn new(access_token: impl Into<String>) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
		}
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the issued-at instant (defaults to the current clock).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a lifetime relative to the issued-at instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Consumes the builder and produces an [`IssuedToken`].
	pub fn build(self) -> Result<IssuedToken, IssuedTokenError> {
		if self.access_token.is_empty() {
			return Err(IssuedTokenError::MissingAccessToken);
		}

		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => Some(instant),
			(None, Some(delta)) => Some(issued_at + delta),
			(None, None) => None,
		};

		if expires_at.is_some_and(|expires| expires <= issued_at) {
			return Err(IssuedTokenError::NonPositiveLifetime);
		}

		Ok(IssuedToken {
			access_token: self.access_token,
			refresh_token: self.refresh_token,
			issued_at,
			expires_at,
		})
	}
}
