//! Read-only health reports for dashboards and status endpoints.

// self
use crate::{
	_prelude::*,
	config::EngineConfig,
	connection::{ConnectionKey, ProviderId, TokenStatus, UserId},
	health::{ConnectionHealthRecord, ConnectionHealthStore, ConsolidatedStatus},
	limit::{RateLimitConcern, RateLimitKey, RateLimiter},
	provider::ProviderRegistry,
	recovery::{self, RecoveryStrategy, RecoveryStrategyEngine},
	taxonomy::ErrorType,
};

/// Snapshot of one connection for external consumers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
	/// Provider the report describes.
	pub provider: ProviderId,
	/// Consolidated status.
	pub consolidated_status: ConsolidatedStatus,
	/// Human-readable status line.
	pub status_message: String,
	/// A rate limit, not a genuine failure, is holding the connection back.
	pub is_rate_limited: bool,
	/// Time until the active rate limit lifts.
	pub rate_limit_resets_in: Option<Duration>,
	/// Failed operations since the last success.
	pub consecutive_failures: u32,
	/// Classification of the most recent failure.
	pub last_error_type: Option<ErrorType>,
	/// `ERROR_TYPE: message` of the most recent failure.
	pub last_error_summary: Option<String>,
	/// The user must reconnect.
	pub requires_reconnection: bool,
	/// Token lifecycle status.
	pub token_status: TokenStatus,
	/// Expiry of the current token.
	pub token_expires_at: Option<OffsetDateTime>,
	/// Last successful provider operation.
	pub last_successful_operation_at: Option<OffsetDateTime>,
	/// Ordered steps for the user; empty while healthy.
	pub recovery_instructions: Vec<String>,
	/// When the next automatic retry runs.
	pub retry_scheduled_at: Option<OffsetDateTime>,
}

/// Derives [`HealthReport`]s without mutating anything.
#[derive(Clone, Debug)]
pub struct HealthStatusAggregator {
	health: ConnectionHealthStore,
	providers: Arc<ProviderRegistry>,
	limiter: Arc<RateLimiter>,
	recovery: RecoveryStrategyEngine,
	config: Arc<EngineConfig>,
}
impl HealthStatusAggregator {
	/// Creates an aggregator over shared engine components.
	pub fn new(
		health: ConnectionHealthStore,
		providers: Arc<ProviderRegistry>,
		limiter: Arc<RateLimiter>,
		recovery: RecoveryStrategyEngine,
		config: Arc<EngineConfig>,
	) -> Self {
		Self { health, providers, limiter, recovery, config }
	}

	/// Reports one connection at the current time.
	pub async fn report(&self, key: &ConnectionKey) -> Result<HealthReport> {
		self.report_at(key, OffsetDateTime::now_utc()).await
	}

	/// Reports one connection at `now`; unknown connections report `not_connected`.
	pub async fn report_at(&self, key: &ConnectionKey, now: OffsetDateTime) -> Result<HealthReport> {
		let record = self.health.peek(key).await?;

		Ok(self.build(key, record.as_ref(), now))
	}

	/// Reports every registered provider for `user`, ordered by provider.
	pub async fn report_all(&self, user: &UserId) -> Result<Vec<HealthReport>> {
		self.report_all_at(user, OffsetDateTime::now_utc()).await
	}

	/// Reports every registered provider for `user` at `now`.
	pub async fn report_all_at(
		&self,
		user: &UserId,
		now: OffsetDateTime,
	) -> Result<Vec<HealthReport>> {
		let mut reports = Vec::with_capacity(self.providers.len());

		for registration in self.providers.iter() {
			let key = ConnectionKey::of(user, &registration.id);

			reports.push(self.report_at(&key, now).await?);
		}

		Ok(reports)
	}

	fn build(
		&self,
		key: &ConnectionKey,
		record: Option<&ConnectionHealthRecord>,
		now: OffsetDateTime,
	) -> HealthReport {
		let consolidated_status =
			record.map(ConnectionHealthRecord::consolidate).unwrap_or(ConsolidatedStatus::NotConnected);
		let pending = self.recovery.pending_retry(key);
		let rate_limit_resets_in = self.rate_limit_wait(key, pending.as_ref(), now);
		let is_rate_limited = rate_limit_resets_in.is_some()
			&& consolidated_status != ConsolidatedStatus::AuthenticationRequired;
		let last_error_type = record.and_then(|record| record.last_error_type);
		let last_error_summary = record.and_then(|record| {
			let error_type = record.last_error_type?;

			Some(match &record.last_error_message {
				Some(message) => format!("{error_type}: {message}"),
				None => error_type.to_string(),
			})
		});
		let status_message = match (is_rate_limited, rate_limit_resets_in) {
			(true, Some(wait)) => recovery::rate_limited_message(&key.provider, wait),
			_ => status_message(&key.provider, consolidated_status, last_error_type),
		};
		let recovery_instructions = match (consolidated_status, last_error_type) {
			(ConsolidatedStatus::Healthy, _) | (_, None) => Vec::new(),
			(_, Some(error_type)) =>
				error_type.recovery_instructions().iter().map(|step| (*step).to_owned()).collect(),
		};

		HealthReport {
			provider: key.provider.clone(),
			consolidated_status,
			status_message,
			is_rate_limited,
			rate_limit_resets_in: rate_limit_resets_in.filter(|_| is_rate_limited),
			consecutive_failures: record.map(|record| record.consecutive_failures).unwrap_or(0),
			last_error_type,
			last_error_summary,
			requires_reconnection: record.is_some_and(|record| record.requires_reconnection),
			token_status: record.map(|record| record.token_status).unwrap_or(TokenStatus::Missing),
			token_expires_at: record.and_then(|record| record.token_expires_at),
			last_successful_operation_at: record
				.and_then(|record| record.last_successful_operation_at),
			recovery_instructions,
			retry_scheduled_at: pending.map(|retry| retry.next_eligible_at),
		}
	}

	// Longest wait imposed by a local budget or a provider quota.
	fn rate_limit_wait(
		&self,
		key: &ConnectionKey,
		pending: Option<&recovery::ScheduledRetry>,
		now: OffsetDateTime,
	) -> Option<Duration> {
		let budgets = [
			(RateLimitConcern::TokenRefresh, self.config.max_refresh_attempts_per_hour),
			(RateLimitConcern::HealthCheck, self.config.max_health_checks_per_minute),
		];
		let local = budgets.into_iter().filter_map(|(concern, window_max)| {
			let budget = RateLimitKey::new(key.clone(), concern);

			self.limiter
				.is_limited_at(&budget, window_max, now)
				.then(|| self.limiter.time_until_reset_at(&budget, now))
		});
		let quota = pending
			.filter(|retry| {
				retry.strategy == RecoveryStrategy::QuotaWait
					|| retry.error_type == ErrorType::ApiQuotaExceeded
			})
			.map(|retry| retry.next_eligible_at - now)
			.filter(|wait| wait.is_positive());

		local.chain(quota).max()
	}
}

fn status_message(
	provider: &ProviderId,
	status: ConsolidatedStatus,
	last_error_type: Option<ErrorType>,
) -> String {
	match status {
		ConsolidatedStatus::Healthy => format!("Connected to {provider}."),
		ConsolidatedStatus::AuthenticationRequired => match last_error_type {
			Some(error_type) if error_type.requires_user_intervention() =>
				format!("{provider}: {}", error_type.user_message()),
			_ => format!("{provider}: Please reconnect your account."),
		},
		ConsolidatedStatus::ConnectionIssues => match last_error_type {
			Some(error_type) => format!(
				"{provider} is having connection issues. {} Recovery continues automatically.",
				error_type.user_message()
			),
			None => format!("{provider} is having connection issues."),
		},
		ConsolidatedStatus::NotConnected => format!("{provider} is not connected."),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn provider() -> ProviderId {
		ProviderId::new("dropbox").expect("Provider fixture should be valid.")
	}

	#[test]
	fn reconnect_message_differs_from_connection_issues() {
		let reconnect = status_message(
			&provider(),
			ConsolidatedStatus::AuthenticationRequired,
			Some(ErrorType::InvalidRefreshToken),
		);
		let issues = status_message(
			&provider(),
			ConsolidatedStatus::ConnectionIssues,
			Some(ErrorType::NetworkError),
		);

		assert!(reconnect.contains("reconnect"));
		assert!(issues.contains("connection issues"));
		assert_ne!(reconnect, issues);
		assert_eq!(
			status_message(&provider(), ConsolidatedStatus::NotConnected, None),
			"dropbox is not connected."
		);
	}
}
