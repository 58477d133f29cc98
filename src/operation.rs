//! Remote operations: the unit of work a dispatcher runs once per task.
//!
//! [`RemoteOperation`] is the only dependency the dispatcher has on the signing service.
//! Implementations receive the bearer token to attach and return a [`Receipt`] or an
//! [`OperationError`] whose variant has already been classified, so the dispatcher can decide
//! whether to renew the credential without inspecting messages. `classify` holds the
//! [`FailureClassifier`] strategy used by HTTP-backed operations, `payload` the signing request
//! model, and `descriptor` the validated description of the SOAP endpoint.

pub mod classify;
pub mod descriptor;
pub mod payload;
#[cfg(feature = "reqwest")] pub mod soap;

pub use classify::*;
pub use descriptor::*;
pub use payload::*;
#[cfg(feature = "reqwest")] pub use soap::*;

// self
use crate::{_prelude::*, auth::Secret, error::OperationError};

/// Boxed future returned by [`RemoteOperation::invoke`].
pub type OperationFuture<'a> =
	Pin<Box<dyn Future<Output = Result<Receipt, OperationError>> + 'a + Send>>;

/// Idempotent unit of remote work invoked with a bearer token.
///
/// The dispatcher may invoke the same operation twice for one task (the original attempt and a
/// single retry after renewal), never concurrently.
pub trait RemoteOperation
where
	Self: Send + Sync,
{
	/// Performs one attempt using `token` as the bearer credential.
	fn invoke<'a>(&'a self, token: &'a Secret) -> OperationFuture<'a>;
}
impl<O> RemoteOperation for Arc<O>
where
	O: ?Sized + RemoteOperation,
{
	fn invoke<'a>(&'a self, token: &'a Secret) -> OperationFuture<'a> {
		(**self).invoke(token)
	}
}

/// Acknowledgement of a successful invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Receipt {
	/// HTTP status code, when the operation is HTTP-backed.
	pub status: Option<u16>,
	/// Truncated response body for diagnostics.
	pub body_preview: Option<String>,
}
