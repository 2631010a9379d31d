//! Connection identity: validated user/provider identifiers, the `(user, provider)` key, token
//! secrets, and issued-token models.

pub mod id;
pub mod secret;
pub mod token;

pub use id::*;
pub use secret::*;
pub use token::*;

// self
use crate::_prelude::*;

/// Unique key identifying one connection (a user paired with one storage provider).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
	/// User that owns the connection.
	pub user: UserId,
	/// Storage provider the user is connected to.
	pub provider: ProviderId,
}
impl ConnectionKey {
	/// Builds a key for the provided user/provider pair.
	pub fn new(user: UserId, provider: ProviderId) -> Self {
		Self { user, provider }
	}

	/// Borrowing constructor used by call sites that only hold references.
	pub fn of(user: &UserId, provider: &ProviderId) -> Self {
		Self { user: user.clone(), provider: provider.clone() }
	}
}
impl Display for ConnectionKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}/{}", self.user, self.provider)
	}
}

/// How a provider authenticates the connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
	/// OAuth access/refresh token pair that must be kept alive.
	#[default]
	OauthToken,
	/// Static key/secret credentials with no token lifecycle.
	KeySecret,
}
impl ProviderKind {
	/// Returns a stable label suitable for logs and configuration.
	pub const fn as_str(self) -> &'static str {
		match self {
			ProviderKind::OauthToken => "oauth_token",
			ProviderKind::KeySecret => "key_secret",
		}
	}

	/// Returns `true` when token status and renewal fields carry meaning.
	pub const fn uses_tokens(self) -> bool {
		matches!(self, ProviderKind::OauthToken)
	}
}
impl Display for ProviderKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
