//! Engine-level error types for configuration, storage, and input validation.
//!
//! Provider failures never surface as [`Error`]; they are classified into
//! [`ConnectionError`](crate::taxonomy::ConnectionError) values instead.

// self
use crate::_prelude::*;

/// Engine-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(feature = "reqwest")]
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical engine error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Identifier failed validation.
	#[error(transparent)]
	Identifier(#[from] crate::connection::IdentifierError),
	/// Issued token failed validation.
	#[error(transparent)]
	Token(#[from] crate::connection::IssuedTokenError),
	/// The connection names a provider the engine does not know.
	#[error("Provider `{provider}` is not registered.")]
	ProviderNotRegistered {
		/// Provider identifier string.
		provider: String,
	},
}

/// Configuration and validation failures raised while loading or wiring the engine.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// A numeric knob lies outside its documented range.
	#[error("Configuration value `{field}` = {value} is outside the allowed range {min}..={max}.")]
	OutOfRange {
		/// Name of the offending field.
		field: &'static str,
		/// Supplied value.
		value: i64,
		/// Inclusive lower bound.
		min: i64,
		/// Inclusive upper bound.
		max: i64,
	},
	/// TOML source could not be parsed into a configuration.
	#[error("Configuration could not be parsed.")]
	Parse {
		/// Underlying TOML failure.
		#[source]
		source: toml::de::Error,
	},
	/// The same provider was registered twice.
	#[error("Provider `{provider}` is registered more than once.")]
	DuplicateProvider {
		/// Provider identifier string.
		provider: String,
	},
	/// A collaborator was attached to a provider nobody declared.
	#[error("Provider `{provider}` is not declared in the configuration.")]
	UnknownProvider {
		/// Provider identifier string.
		provider: String,
	},
	/// An OAuth provider needs a token endpoint to refresh tokens.
	#[error("Provider `{provider}` does not declare a token endpoint.")]
	MissingTokenEndpoint {
		/// Provider identifier string.
		provider: String,
	},
	/// HTTP client could not be constructed.
	#[cfg(feature = "reqwest")]
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Token endpoint URL was rejected by the OAuth client.
	#[cfg(feature = "reqwest")]
	#[error("Token endpoint URL is invalid.")]
	InvalidTokenEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
}
impl ConfigError {
	/// Checks that `value` lies in `min..=max`.
	pub fn ensure_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<(), Self> {
		if (min..=max).contains(&value) {
			Ok(())
		} else {
			Err(Self::OutOfRange { field, value, min, max })
		}
	}

	/// Wraps a transport's builder failure inside [`ConfigError`].
	#[cfg(feature = "reqwest")]
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}
impl From<toml::de::Error> for ConfigError {
	fn from(source: toml::de::Error) -> Self {
		Self::Parse { source }
	}
}
