//! User-facing notifications and their per-error cooldowns.

pub mod throttle;

pub use throttle::*;

// self
use crate::{
	_prelude::*,
	connection::{ProviderId, UserId},
	taxonomy::ErrorType,
};

/// Boxed future returned by [`NotificationSender::send`].
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = bool> + 'a + Send>>;

/// Template keys understood by notification senders.
pub mod template {
	/// The user must reconnect the provider.
	pub const AUTHENTICATION_REQUIRED: &str = "connection.authentication_required";
	/// Automatic recovery keeps failing.
	pub const CONNECTION_ISSUES: &str = "connection.issues";
	/// A non-retryable problem needs the user's attention.
	pub const ACTION_REQUIRED: &str = "connection.action_required";
}

/// Notification handed to a [`NotificationSender`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
	/// Recipient.
	pub user: UserId,
	/// Provider the notification is about.
	pub provider: ProviderId,
	/// Error that triggered it.
	pub error_type: ErrorType,
	/// Template key, see [`template`].
	pub template_key: String,
	/// Values interpolated into the template.
	pub context: BTreeMap<String, String>,
}
impl Notification {
	/// Picks the template for an error type and seeds the common context values.
	pub fn for_error(
		user: UserId,
		provider: ProviderId,
		error_type: ErrorType,
		template_key: &str,
	) -> Self {
		let mut context = BTreeMap::new();

		context.insert("provider".into(), provider.to_string());
		context.insert("error_type".into(), error_type.as_str().into());
		context.insert("message".into(), error_type.user_message().into());
		context.insert("instructions".into(), error_type.recovery_instructions().join("\n"));

		Self { user, provider, error_type, template_key: template_key.into(), context }
	}

	/// Adds one context value.
	pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.context.insert(key.into(), value.into());

		self
	}
}

/// Delivery channel for user notifications (email, chat, ...).
pub trait NotificationSender
where
	Self: Send + Sync,
{
	/// Delivers the notification; returns `false` when delivery failed.
	fn send<'a>(&'a self, notification: &'a Notification) -> NotifyFuture<'a>;
}

/// Sender that drops every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSender;
impl NotificationSender for NoopSender {
	fn send<'a>(&'a self, _notification: &'a Notification) -> NotifyFuture<'a> {
		Box::pin(async { true })
	}
}
