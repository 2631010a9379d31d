//! Per-connection health record, its consolidation rules, and the mutations applied to it.

// self
use crate::{
	_prelude::*,
	connection::{ConnectionKey, IssuedToken, ProviderKind, TokenSecret, TokenStatus},
	taxonomy::ErrorType,
};

/// Consecutive failures at which a connection reports `connection_issues`.
pub const CONNECTION_ISSUE_THRESHOLD: u32 = 3;

/// Raw connection state, before consolidation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawStatus {
	/// Last operation succeeded.
	Healthy,
	/// Some recent operations failed.
	Degraded,
	/// Recovery gave up for now; a sweep will retry later.
	Unhealthy,
	/// Credentials were removed outside of this engine.
	Disconnected,
	/// The user has to reconnect.
	AuthenticationRequired,
	/// Failures crossed the connection-issue threshold.
	ConnectionIssues,
	/// No connection has been established.
	#[default]
	NotConnected,
}

/// Single simplified state exposed to consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidatedStatus {
	/// Connection works.
	Healthy,
	/// User must reconnect.
	AuthenticationRequired,
	/// Connection is failing repeatedly.
	ConnectionIssues,
	/// Connection was never established or was disconnected.
	NotConnected,
}
impl ConsolidatedStatus {
	/// Returns the stable status string.
	pub const fn as_str(self) -> &'static str {
		match self {
			ConsolidatedStatus::Healthy => "healthy",
			ConsolidatedStatus::AuthenticationRequired => "authentication_required",
			ConsolidatedStatus::ConnectionIssues => "connection_issues",
			ConsolidatedStatus::NotConnected => "not_connected",
		}
	}
}
impl Display for ConsolidatedStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Health and token-lifecycle state for one connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHealthRecord {
	/// Connection this record describes.
	pub key: ConnectionKey,
	/// Authentication style of the provider.
	pub provider_kind: ProviderKind,
	/// Raw state before consolidation.
	pub status: RawStatus,
	/// Failed operations since the last success.
	pub consecutive_failures: u32,
	/// Classification of the most recent failure.
	pub last_error_type: Option<ErrorType>,
	/// Diagnostic message of the most recent failure.
	pub last_error_message: Option<String>,
	/// Diagnostic context of the most recent failure.
	pub last_error_context: BTreeMap<String, String>,
	/// When the most recent failure was recorded.
	pub last_error_at: Option<OffsetDateTime>,
	/// When the last operation succeeded.
	pub last_successful_operation_at: Option<OffsetDateTime>,
	/// Set once automatic recovery is no longer possible.
	pub requires_reconnection: bool,
	/// Token lifecycle status (OAuth providers only).
	pub token_status: TokenStatus,
	/// Issued-at instant of the current token.
	pub token_issued_at: Option<OffsetDateTime>,
	/// Expiry instant of the current token.
	pub token_expires_at: Option<OffsetDateTime>,
	/// When the proactive sweep should renew the token.
	pub next_scheduled_renewal_at: Option<OffsetDateTime>,
	/// Refresh failures since the last successful refresh.
	pub refresh_failure_count: u32,
	/// Bumped whenever the stored credentials change.
	pub token_generation: u64,
	/// When the user last completed a connect flow.
	pub connected_at: Option<OffsetDateTime>,
	/// Stored credentials; never logged.
	pub credentials: Option<IssuedToken>,
	/// Last time any field changed.
	pub updated_at: OffsetDateTime,
}
impl ConnectionHealthRecord {
	/// Creates the default record for a connection that has not been seen before.
	pub fn new(key: ConnectionKey, provider_kind: ProviderKind, instant: OffsetDateTime) -> Self {
		Self {
			key,
			provider_kind,
			status: RawStatus::NotConnected,
			consecutive_failures: 0,
			last_error_type: None,
			last_error_message: None,
			last_error_context: BTreeMap::new(),
			last_error_at: None,
			last_successful_operation_at: None,
			requires_reconnection: false,
			token_status: TokenStatus::Missing,
			token_issued_at: None,
			token_expires_at: None,
			next_scheduled_renewal_at: None,
			refresh_failure_count: 0,
			token_generation: 0,
			connected_at: None,
			credentials: None,
			updated_at: instant,
		}
	}

	/// Derives the consolidated status (first matching rule wins).
	pub fn consolidate(&self) -> ConsolidatedStatus {
		if self.requires_reconnection || self.status == RawStatus::AuthenticationRequired {
			return ConsolidatedStatus::AuthenticationRequired;
		}
		if self.token_status == TokenStatus::Missing && !self.is_connected() {
			return ConsolidatedStatus::NotConnected;
		}
		if self.provider_kind.uses_tokens()
			&& matches!(self.token_status, TokenStatus::Invalid | TokenStatus::Missing)
			&& !self.has_refresh_path()
		{
			return ConsolidatedStatus::AuthenticationRequired;
		}
		if self.consecutive_failures >= CONNECTION_ISSUE_THRESHOLD {
			return ConsolidatedStatus::ConnectionIssues;
		}

		ConsolidatedStatus::Healthy
	}

	/// Returns `false` for records that were never connected or have been disconnected.
	pub fn is_connected(&self) -> bool {
		!matches!(self.status, RawStatus::NotConnected | RawStatus::Disconnected)
	}

	/// Returns `true` when an automatic refresh can still be attempted.
	pub fn has_refresh_path(&self) -> bool {
		!self.requires_reconnection && self.refresh_token().is_some()
	}

	/// Returns the stored refresh token, if any.
	pub fn refresh_token(&self) -> Option<&TokenSecret> {
		self.credentials.as_ref().and_then(|token| token.refresh_token.as_ref())
	}

	/// Returns `true` when the token must be refreshed at `instant`.
	///
	/// A token needs a refresh once its status is no longer `valid`, once it expired, or once
	/// its remaining lifetime dropped inside `proactive_window`.
	pub fn needs_refresh_at(&self, instant: OffsetDateTime, proactive_window: Duration) -> bool {
		if !self.provider_kind.uses_tokens() {
			return false;
		}
		if self.token_status != TokenStatus::Valid {
			return true;
		}

		match self.token_expires_at {
			Some(expires) => expires - instant <= proactive_window,
			None => false,
		}
	}

	/// Returns `true` when the proactive sweep should renew this token at `instant`.
	pub fn renewal_due_at(&self, instant: OffsetDateTime) -> bool {
		self.provider_kind.uses_tokens()
			&& !self.requires_reconnection
			&& self.token_status != TokenStatus::Missing
			&& self.next_scheduled_renewal_at.is_some_and(|due| due <= instant)
	}

	/// Error type a blocked connection reports until the user reconnects.
	///
	/// `None` while automatic recovery is still possible.
	pub fn blocking_error(&self) -> Option<ErrorType> {
		self.requires_reconnection.then(|| {
			self.last_error_type
				.filter(|error_type| error_type.requires_user_intervention())
				.unwrap_or(ErrorType::InvalidCredentials)
		})
	}

	/// Checks the structural invariants every persisted record must hold.
	pub fn invariants_hold(&self) -> bool {
		let expiry_implies_token =
			self.token_expires_at.is_none() || self.token_status != TokenStatus::Missing;
		let reconnection_blocks_healthy =
			!self.requires_reconnection || self.consolidate() != ConsolidatedStatus::Healthy;

		expiry_implies_token && reconnection_blocks_healthy
	}

	/// Applies a mutation in place.
	pub fn apply(&mut self, mutation: HealthMutation) {
		match mutation {
			HealthMutation::OperationSucceeded { at } => {
				self.consecutive_failures = 0;
				self.last_successful_operation_at = Some(at);

				if !self.requires_reconnection {
					self.status = RawStatus::Healthy;
				}

				self.updated_at = at;
			},
			HealthMutation::OperationFailed {
				error_type,
				message,
				context,
				at,
				manual_intervention_threshold,
			} => {
				self.consecutive_failures = self.consecutive_failures.saturating_add(1);
				self.set_last_error(error_type, message, context, at);

				if self.consecutive_failures >= manual_intervention_threshold {
					self.require_reconnection();
				} else if !self.requires_reconnection {
					self.status = if self.consecutive_failures >= CONNECTION_ISSUE_THRESHOLD {
						RawStatus::ConnectionIssues
					} else {
						RawStatus::Degraded
					};
				}
			},
			HealthMutation::TokenRejected { observed_at } => {
				let current = self.token_issued_at.is_some_and(|issued| issued <= observed_at);

				if current && self.token_status == TokenStatus::Valid {
					self.token_status = TokenStatus::Expired;
					self.updated_at = observed_at;
				}
			},
			HealthMutation::TokenRefreshed { token, renewal_lead, at } => {
				let refresh_token = token
					.refresh_token
					.clone()
					.or_else(|| self.refresh_token().cloned());

				self.install_token(IssuedToken { refresh_token, ..token }, renewal_lead);
				self.refresh_failure_count = 0;
				self.updated_at = at;
			},
			HealthMutation::RefreshFailed { error_type, message, at, max_refresh_failures } => {
				self.refresh_failure_count = self.refresh_failure_count.saturating_add(1);
				// Retry continuations own the next attempt, not the proactive sweep.
				self.next_scheduled_renewal_at = None;
				self.set_last_error(error_type, message, BTreeMap::new(), at);

				if error_type.requires_user_intervention()
					|| self.refresh_failure_count > max_refresh_failures
				{
					self.require_reconnection();
				} else if self.token_expires_at.is_some_and(|expires| expires <= at) {
					self.token_status = TokenStatus::Expired;
				} else {
					self.token_status = TokenStatus::RefreshNeeded;
				}
			},
			HealthMutation::RequireReconnection { error_type, message, at } => {
				self.set_last_error(error_type, message, BTreeMap::new(), at);
				self.require_reconnection();
			},
			HealthMutation::Connected { token, renewal_lead, at } => {
				self.install_token(token, renewal_lead);
				self.status = RawStatus::Healthy;
				self.consecutive_failures = 0;
				self.refresh_failure_count = 0;
				self.requires_reconnection = false;
				self.connected_at = Some(at);
				self.clear_last_error();
				self.updated_at = at;
			},
			HealthMutation::Disconnected { at } => {
				self.credentials = None;
				self.token_status = TokenStatus::Missing;
				self.token_issued_at = None;
				self.token_expires_at = None;
				self.next_scheduled_renewal_at = None;
				self.token_generation = self.token_generation.saturating_add(1);
				self.status = RawStatus::NotConnected;
				self.consecutive_failures = 0;
				self.refresh_failure_count = 0;
				self.requires_reconnection = false;
				self.clear_last_error();
				self.updated_at = at;
			},
			HealthMutation::RecoveryExhausted { at } =>
				if !self.requires_reconnection {
					self.status = RawStatus::Unhealthy;
					self.updated_at = at;
				},
		}
	}

	fn install_token(&mut self, token: IssuedToken, renewal_lead: Duration) {
		self.token_issued_at = Some(token.issued_at);
		self.token_expires_at = token.expires_at;
		self.next_scheduled_renewal_at = match (self.provider_kind.uses_tokens(), token.expires_at) {
			(true, Some(expires)) => Some((expires - renewal_lead).max(token.issued_at)),
			_ => None,
		};
		self.token_status = TokenStatus::Valid;
		self.token_generation = self.token_generation.saturating_add(1);
		self.credentials = Some(token);
	}

	fn require_reconnection(&mut self) {
		self.requires_reconnection = true;
		self.status = RawStatus::AuthenticationRequired;
		self.next_scheduled_renewal_at = None;

		if self.provider_kind.uses_tokens() && self.token_status != TokenStatus::Missing {
			self.token_status = TokenStatus::Invalid;
		}
	}

	fn set_last_error(
		&mut self,
		error_type: ErrorType,
		message: String,
		context: BTreeMap<String, String>,
		at: OffsetDateTime,
	) {
		self.last_error_type = Some(error_type);
		self.last_error_message = Some(message);
		self.last_error_context = context;
		self.last_error_at = Some(at);
		self.updated_at = at;
	}

	fn clear_last_error(&mut self) {
		self.last_error_type = None;
		self.last_error_message = None;
		self.last_error_context.clear();
		self.last_error_at = None;
	}
}

/// Described field change applied atomically by
/// [`ConnectionHealthStore::update`](crate::health::ConnectionHealthStore::update).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthMutation {
	/// A provider operation succeeded.
	OperationSucceeded {
		/// Completion instant.
		at: OffsetDateTime,
	},
	/// A provider operation failed and was classified.
	OperationFailed {
		/// Classified error type.
		error_type: ErrorType,
		/// Diagnostic message.
		message: String,
		/// Diagnostic context.
		context: BTreeMap<String, String>,
		/// Failure instant.
		at: OffsetDateTime,
		/// Consecutive failures that force a reconnection.
		manual_intervention_threshold: u32,
	},
	/// The provider rejected the access token that was current at `observed_at`.
	TokenRejected {
		/// Instant the rejection was observed.
		observed_at: OffsetDateTime,
	},
	/// A refresh produced a new token.
	TokenRefreshed {
		/// Newly issued token; a missing refresh token keeps the stored one.
		token: IssuedToken,
		/// Lead time before expiry at which the next renewal is scheduled.
		renewal_lead: Duration,
		/// Completion instant.
		at: OffsetDateTime,
	},
	/// A refresh attempt failed.
	RefreshFailed {
		/// Classified error type.
		error_type: ErrorType,
		/// Diagnostic message.
		message: String,
		/// Failure instant.
		at: OffsetDateTime,
		/// Refresh failures tolerated before forcing a reconnection.
		max_refresh_failures: u32,
	},
	/// Automatic recovery is impossible; the user must reconnect.
	RequireReconnection {
		/// Error that made recovery impossible.
		error_type: ErrorType,
		/// Diagnostic message.
		message: String,
		/// Decision instant.
		at: OffsetDateTime,
	},
	/// The user completed a connect (or reconnect) flow.
	Connected {
		/// Credentials issued by the authorization flow.
		token: IssuedToken,
		/// Lead time before expiry at which the first renewal is scheduled.
		renewal_lead: Duration,
		/// Completion instant.
		at: OffsetDateTime,
	},
	/// The user disconnected the provider.
	Disconnected {
		/// Disconnect instant.
		at: OffsetDateTime,
	},
	/// Retries were consumed without success.
	RecoveryExhausted {
		/// Decision instant.
		at: OffsetDateTime,
	},
}
impl HealthMutation {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(&self) -> &'static str {
		match self {
			HealthMutation::OperationSucceeded { .. } => "operation_succeeded",
			HealthMutation::OperationFailed { .. } => "operation_failed",
			HealthMutation::TokenRejected { .. } => "token_rejected",
			HealthMutation::TokenRefreshed { .. } => "token_refreshed",
			HealthMutation::RefreshFailed { .. } => "refresh_failed",
			HealthMutation::RequireReconnection { .. } => "require_reconnection",
			HealthMutation::Connected { .. } => "connected",
			HealthMutation::Disconnected { .. } => "disconnected",
			HealthMutation::RecoveryExhausted { .. } => "recovery_exhausted",
		}
	}
}
