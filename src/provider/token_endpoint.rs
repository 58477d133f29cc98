//! Reqwest-backed [`CredentialProvider`] for a plain-text token endpoint.
//!
//! The endpoint is called with `POST` and HTTP basic authentication; a 2xx response body,
//! trimmed, is the bearer token.

// self
use crate::{
	_prelude::*,
	auth::{Principal, Secret},
	error::{AuthFetchError, ConfigError},
	http::ReqwestHttpClient,
	operation::{classify::truncate_preview, descriptor::validate_http_url},
	provider::{CredentialProvider, ProviderFuture},
};

/// Fetches tokens from a basic-auth protected endpoint.
#[derive(Clone, Debug)]
pub struct TokenEndpointProvider {
	endpoint: Url,
	http_client: ReqwestHttpClient,
}
impl TokenEndpointProvider {
	/// Creates a provider for `endpoint` with a default HTTP client.
	pub fn new(endpoint: Url) -> Result<Self, ConfigError> {
		validate_http_url("token endpoint", &endpoint)?;

		Ok(Self { endpoint, http_client: ReqwestHttpClient::default() })
	}

	/// Reuses the caller's HTTP client (and its connection pool).
	pub fn with_http_client(mut self, http_client: ReqwestHttpClient) -> Self {
		self.http_client = http_client;

		self
	}

	/// Endpoint the provider posts to.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	async fn request(&self, principal: &Principal) -> Result<Secret, AuthFetchError> {
		let response = self
			.http_client
			.post(self.endpoint.clone())
			.basic_auth(principal.id.as_ref(), Some(principal.secret.expose()))
			.send()
			.await?;
		let status = response.status();

		if !status.is_success() {
			// An unreadable error body must not hide the status.
			let body = response.text().await.unwrap_or_default();

			return Err(AuthFetchError::Status {
				status: status.as_u16(),
				body: truncate_preview(body),
			});
		}

		let body = response.text().await?;
		let token = body.trim();

		if token.is_empty() {
			return Err(AuthFetchError::EmptyToken);
		}

		Ok(Secret::new(token))
	}
}
impl CredentialProvider for TokenEndpointProvider {
	fn fetch<'a>(&'a self, principal: &'a Principal) -> ProviderFuture<'a> {
		Box::pin(self.request(principal))
	}
}
