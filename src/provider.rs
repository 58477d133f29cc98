//! Credential providers: where bearer tokens come from.
//!
//! [`CredentialProvider`] is the dispatcher's only dependency on the token service. A provider
//! performs the network round trip and returns the new token; it never touches the shared
//! credential cell, the caller decides whether to install the result.

#[cfg(feature = "reqwest")] pub mod token_endpoint;

#[cfg(feature = "reqwest")] pub use token_endpoint::*;

// self
use crate::{
	_prelude::*,
	auth::{Principal, Secret},
	error::AuthFetchError,
};

/// Boxed future returned by [`CredentialProvider::fetch`].
pub type ProviderFuture<'a> = Pin<Box<dyn Future<Output = Result<Secret, AuthFetchError>> + 'a + Send>>;

/// Issues bearer tokens for a principal.
pub trait CredentialProvider
where
	Self: Send + Sync,
{
	/// Exchanges the principal's account name and password for a new token.
	fn fetch<'a>(&'a self, principal: &'a Principal) -> ProviderFuture<'a>;
}
