//! Principal presented to the credential provider.

// self
use crate::{
	_prelude::*,
	auth::{PrincipalId, Secret},
};

/// Account name and password exchanged for a bearer token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
	/// Account name sent as the basic-auth user.
	pub id: PrincipalId,
	/// Password sent as the basic-auth password.
	pub secret: Secret,
}
impl Principal {
	/// Pairs an account name with its password.
	pub fn new(id: PrincipalId, secret: impl Into<Secret>) -> Self {
		Self { id, secret: secret.into() }
	}
}
impl Display for Principal {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.id)
	}
}
