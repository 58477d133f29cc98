//! Failure classification hooks for HTTP-backed remote operations.
//!
//! A [`FailureClassifier`] turns primitive response facts (status, body preview, whether the
//! transport failed) into a [`FailureKind`]. The dispatcher only ever renews on
//! [`FailureKind::Unauthorized`], so this is the single place that decides what counts as an
//! expired or rejected credential.

// self
use crate::_prelude::*;

/// Canonical failure categories for a remote operation attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
	/// The attached credential was rejected; renew and retry once.
	Unauthorized,
	/// The service answered with a fault; not retried.
	Fault,
	/// No response was obtained; not retried.
	Transport,
}
impl FailureKind {
	/// Returns a stable label suitable for logs and reports.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Unauthorized => "unauthorized",
			Self::Fault => "fault",
			Self::Transport => "transport",
		}
	}
}
impl Display for FailureKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Strategy that maps a failed response onto a [`FailureKind`].
pub trait FailureClassifier: Send + Sync {
	/// Classifies a failed attempt.
	fn classify(&self, ctx: &ResponseContext) -> FailureKind;
}

/// Facts about a failed attempt handed to a [`FailureClassifier`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseContext {
	/// HTTP status code returned by the service, when available.
	pub http_status: Option<u16>,
	/// Truncated response body.
	pub body_preview: Option<String>,
	/// Whether the failure happened below HTTP (DNS, TCP, TLS, timeouts).
	pub network_error: bool,
}
impl ResponseContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Context for a response that carried the given status.
	pub fn with_status(status: u16) -> Self {
		Self { http_status: Some(status), ..Default::default() }
	}

	/// Context for a call that never produced a response.
	pub fn network_failure() -> Self {
		Self { network_error: true, ..Default::default() }
	}

	/// Adds a body preview, truncated to a fixed number of characters.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(truncate_preview(body.into()));

		self
	}
}

/// Default classifier: 401 and 403 mean the credential was rejected, every other status is a
/// fault, and network failures are transport errors.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFailureClassifier;
impl FailureClassifier for DefaultFailureClassifier {
	fn classify(&self, ctx: &ResponseContext) -> FailureKind {
		if ctx.network_error {
			return FailureKind::Transport;
		}

		match ctx.http_status {
			Some(401 | 403) => FailureKind::Unauthorized,
			Some(_) => FailureKind::Fault,
			None => FailureKind::Transport,
		}
	}
}

/// Truncates a response body to the preview limit, marking the cut with an ellipsis.
pub(crate) fn truncate_preview(body: String) -> String {
	if body.chars().count() <= ResponseContext::BODY_PREVIEW_LIMIT {
		return body;
	}

	let mut buf = body.chars().take(ResponseContext::BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}
