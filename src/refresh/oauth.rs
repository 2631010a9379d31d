//! Bundled [`TokenRefresher`] performing the OAuth 2.0 `refresh_token` grant over reqwest.

// crates.io
use oauth2::{
	AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, HttpClientError, RefreshToken,
	RequestTokenError, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicRequestTokenError, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	classify::RawFailure,
	config::ProviderConfig,
	connection::{ConnectionKey, IssuedToken, TokenSecret},
	error::ConfigError,
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot},
	provider::{ProviderFuture, TokenRefresher},
};

type RefreshClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Refreshes tokens against a provider's OAuth token endpoint.
///
/// Every failure, including transport errors and malformed responses, comes back as a
/// [`RawFailure`] carrying the HTTP status and `Retry-After` hint when the endpoint sent them.
#[derive(Clone)]
pub struct OAuthTokenRefresher {
	oauth_client: RefreshClient,
	http_client: ReqwestHttpClient,
}
impl OAuthTokenRefresher {
	/// Creates a refresher for a public client.
	pub fn new(
		token_endpoint: &Url,
		client_id: impl Into<String>,
		http_client: ReqwestHttpClient,
	) -> Result<Self, ConfigError> {
		let token_url = TokenUrl::new(token_endpoint.to_string())
			.map_err(|source| ConfigError::InvalidTokenEndpoint { source })?;
		let oauth_client = BasicClient::new(ClientId::new(client_id.into())).set_token_uri(token_url);

		Ok(Self { oauth_client, http_client })
	}

	/// Creates a refresher from a provider configuration entry.
	pub fn from_config(
		config: &ProviderConfig,
		client_id: impl Into<String>,
		http_client: ReqwestHttpClient,
	) -> Result<Self, ConfigError> {
		let endpoint = config
			.token_endpoint
			.as_ref()
			.ok_or_else(|| ConfigError::MissingTokenEndpoint { provider: config.id.to_string() })?;

		Self::new(endpoint, client_id, http_client)
	}

	/// Authenticates with a client secret (HTTP Basic by default).
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.oauth_client = self.oauth_client.set_client_secret(ClientSecret::new(secret.into()));

		self
	}

	/// Sends client credentials in the form body instead of HTTP Basic.
	pub fn with_request_body_auth(mut self) -> Self {
		self.oauth_client = self.oauth_client.set_auth_type(AuthType::RequestBody);

		self
	}
}
impl TokenRefresher for OAuthTokenRefresher {
	fn refresh<'a>(
		&'a self,
		_key: &'a ConnectionKey,
		refresh_token: &'a TokenSecret,
	) -> ProviderFuture<'a, IssuedToken> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.instrumented(meta.clone());
			let refresh_secret = RefreshToken::new(refresh_token.expose().to_owned());
			let response = self
				.oauth_client
				.exchange_refresh_token(&refresh_secret)
				.request_async(&instrumented)
				.await
				.map_err(|err| map_request_error(meta.take(), err))?;

			map_token_response(response, OffsetDateTime::now_utc())
		})
	}
}
impl Debug for OAuthTokenRefresher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthTokenRefresher")
			.field("token_endpoint", &self.oauth_client.token_uri().as_str())
			.finish()
	}
}

fn map_token_response(
	response: BasicTokenResponse,
	issued_at: OffsetDateTime,
) -> Result<IssuedToken, RawFailure> {
	let mut builder =
		IssuedToken::builder(response.access_token().secret().to_owned()).issued_at(issued_at);

	if let Some(lifetime) =
		response.expires_in().and_then(|lifetime| i64::try_from(lifetime.as_secs()).ok())
	{
		builder = builder.expires_in(Duration::seconds(lifetime));
	}
	if let Some(refresh) = response.refresh_token() {
		builder = builder.refresh_token(refresh.secret().to_owned());
	}

	builder.build().map_err(|e| {
		RawFailure::default()
			.with_message(format!("Token endpoint returned an unusable token: {e}"))
			.during_refresh()
	})
}

fn map_request_error(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<ReqwestError>>,
) -> RawFailure {
	let mut failure = match err {
		RequestTokenError::ServerResponse(response) => {
			let failure = RawFailure::default().with_reason(response.error().as_ref().to_string());

			match response.error_description() {
				Some(description) => failure.with_message(description.clone()),
				None => failure,
			}
		},
		RequestTokenError::Request(HttpClientError::Reqwest(inner)) => map_reqwest_error(&inner),
		RequestTokenError::Request(other) => RawFailure::network(other.to_string()),
		RequestTokenError::Parse(error, _body) => RawFailure::default()
			.with_message(format!("Token response could not be parsed: {error}")),
		RequestTokenError::Other(message) => RawFailure::default().with_message(message),
	};

	if let Some(meta) = meta {
		failure.status = failure.status.or(meta.status);
		failure.retry_after = meta.retry_after.or(failure.retry_after);
	}

	failure.during_refresh()
}

fn map_reqwest_error(err: &ReqwestError) -> RawFailure {
	let mut failure = if err.is_timeout() {
		RawFailure::timeout().with_message(err.to_string())
	} else {
		RawFailure::network(err.to_string())
	};

	failure.status = err.status().map(|code| code.as_u16());

	failure
}
