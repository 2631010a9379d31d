#![allow(dead_code)]

// std
use std::{
	collections::VecDeque,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};
// crates.io
use cloud_storage_resilience::{
	classify::{RawFailure, ReasonPreset},
	config::{EngineConfig, ProviderConfig},
	connection::{ConnectionKey, IssuedToken, ProviderId, ProviderKind, TokenSecret, UserId},
	engine::{Engine, EngineBuilder},
	notify::{Notification, NotificationSender, NotifyFuture},
	provider::{HealthProbe, ProviderFuture, TokenRefresher},
};
use time::{Duration, OffsetDateTime, macros};

pub const T0: OffsetDateTime = macros::datetime!(2025-06-01 09:00 UTC);
pub const DRIVE: &str = "google-drive";
pub const S3: &str = "amazon-s3";

pub fn provider(id: &str) -> ProviderId {
	ProviderId::new(id).expect("Provider fixture should be valid.")
}

pub fn key(user: &str, provider_id: &str) -> ConnectionKey {
	ConnectionKey::new(UserId::new(user).expect("User fixture should be valid."), provider(provider_id))
}

/// OAuth token issued at `issued_at`, valid for one hour, with a refresh token.
pub fn oauth_token(issued_at: OffsetDateTime) -> IssuedToken {
	IssuedToken::builder("access-initial")
		.refresh_token("refresh-initial")
		.issued_at(issued_at)
		.expires_in(Duration::HOUR)
		.build()
		.expect("OAuth token fixture should build.")
}

pub fn key_secret_token(issued_at: OffsetDateTime) -> IssuedToken {
	IssuedToken::builder("AKIAFIXTURE")
		.issued_at(issued_at)
		.build()
		.expect("Key/secret token fixture should build.")
}

/// Configuration declaring Google Drive (OAuth) and Amazon S3 (key/secret).
pub fn config() -> EngineConfig {
	let mut drive = ProviderConfig::new(provider(DRIVE), ProviderKind::OauthToken);

	drive.reason_table = ReasonPreset::GoogleDrive;

	let mut s3 = ProviderConfig::new(provider(S3), ProviderKind::KeySecret);

	s3.reason_table = ReasonPreset::AmazonS3;

	EngineConfig { providers: vec![drive, s3], ..EngineConfig::default() }
}

pub fn builder(
	config: EngineConfig,
	refresher: Arc<ScriptedRefresher>,
	notifier: Arc<RecordingNotifier>,
) -> EngineBuilder {
	Engine::builder(config).with_refresher(provider(DRIVE), refresher).with_notifier(notifier)
}

enum RefreshScript {
	Issue { issued_at: Option<OffsetDateTime> },
	Fail(RawFailure),
}

/// Refresher that counts calls and answers from a fixed script.
pub struct ScriptedRefresher {
	calls: AtomicUsize,
	delay: std::time::Duration,
	script: RefreshScript,
}
impl ScriptedRefresher {
	/// Issues one-hour tokens stamped with `issued_at`, or the current clock when `None`.
	pub fn issuing(issued_at: Option<OffsetDateTime>) -> Arc<Self> {
		Arc::new(Self {
			calls: AtomicUsize::new(0),
			delay: std::time::Duration::ZERO,
			script: RefreshScript::Issue { issued_at },
		})
	}

	pub fn failing(failure: RawFailure) -> Arc<Self> {
		Arc::new(Self {
			calls: AtomicUsize::new(0),
			delay: std::time::Duration::ZERO,
			script: RefreshScript::Fail(failure),
		})
	}

	/// Same script, answered after `delay`.
	pub fn slow(issued_at: OffsetDateTime, delay: std::time::Duration) -> Arc<Self> {
		Arc::new(Self {
			calls: AtomicUsize::new(0),
			delay,
			script: RefreshScript::Issue { issued_at: Some(issued_at) },
		})
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl TokenRefresher for ScriptedRefresher {
	fn refresh<'a>(
		&'a self,
		_key: &'a ConnectionKey,
		_refresh_token: &'a TokenSecret,
	) -> ProviderFuture<'a, IssuedToken> {
		Box::pin(async move {
			let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

			if !self.delay.is_zero() {
				tokio::time::sleep(self.delay).await;
			}

			match &self.script {
				RefreshScript::Issue { issued_at } => {
					let issued_at = issued_at.unwrap_or_else(OffsetDateTime::now_utc);

					Ok(IssuedToken::builder(format!("access-{call}"))
						.issued_at(issued_at)
						.expires_in(Duration::HOUR)
						.build()
						.expect("Refreshed token fixture should build."))
				},
				RefreshScript::Fail(failure) => Err(failure.clone()),
			}
		})
	}
}

/// Probe answering from a queue; an empty queue answers healthy.
#[derive(Default)]
pub struct ScriptedProbe {
	answers: Mutex<VecDeque<Result<(), RawFailure>>>,
	calls: AtomicUsize,
}
impl ScriptedProbe {
	pub fn answering(answers: impl IntoIterator<Item = Result<(), RawFailure>>) -> Arc<Self> {
		Arc::new(Self {
			answers: Mutex::new(answers.into_iter().collect()),
			calls: AtomicUsize::new(0),
		})
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl HealthProbe for ScriptedProbe {
	fn probe<'a>(
		&'a self,
		_key: &'a ConnectionKey,
		_credentials: Option<&'a IssuedToken>,
	) -> ProviderFuture<'a, ()> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let answer = self
			.answers
			.lock()
			.expect("Probe script lock should not be poisoned.")
			.pop_front()
			.unwrap_or(Ok(()));

		Box::pin(async move { answer })
	}
}

/// Sender that keeps every delivered notification.
#[derive(Default)]
pub struct RecordingNotifier(Mutex<Vec<Notification>>);
impl RecordingNotifier {
	pub fn sent(&self) -> Vec<Notification> {
		self.0.lock().expect("Notifier lock should not be poisoned.").clone()
	}
}
impl NotificationSender for RecordingNotifier {
	fn send<'a>(&'a self, notification: &'a Notification) -> NotifyFuture<'a> {
		self.0.lock().expect("Notifier lock should not be poisoned.").push(notification.clone());

		Box::pin(async { true })
	}
}
