//! Error types for credential fetching, remote operations, task outcomes, and configuration.

// std
use std::io;
// self
use crate::{_prelude::*, auth::IdentifierError, operation::FailureKind};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that stop a batch before or instead of running it.
///
/// Per-task failures never surface here; they are recorded as [`TaskError`] values on the
/// task's outcome.
#[derive(Debug, ThisError)]
pub enum Error {
	/// The initial credential could not be fetched, so no task was started.
	#[error("Initial credential fetch failed; no tasks were started.")]
	Startup(#[source] AuthFetchError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// Failure to obtain a token from the credential provider.
#[derive(Debug, ThisError)]
pub enum AuthFetchError {
	/// Token endpoint answered with a non-success status.
	#[error("Token endpoint returned HTTP {status}.")]
	Status {
		/// HTTP status code.
		status: u16,
		/// Response body preview for diagnostics.
		body: String,
	},
	/// Token endpoint answered with success but no token.
	#[error("Token endpoint returned an empty token.")]
	EmptyToken,
	/// The token endpoint could not be reached.
	#[error("Network error occurred while calling the token endpoint.")]
	Transport {
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
}
impl AuthFetchError {
	/// Wraps a transport-specific network error.
	pub fn transport(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Transport { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for AuthFetchError {
	fn from(e: ReqwestError) -> Self {
		Self::transport(e)
	}
}

/// Failure reported by a single remote operation invocation.
///
/// The variant, not the message, decides whether the dispatcher renews the credential: only
/// [`OperationError::Unauthorized`] triggers the renew-and-retry path.
#[derive(Debug, ThisError)]
pub enum OperationError {
	/// The service rejected the attached credential.
	#[error("Signing service rejected the bearer credential: {detail}.")]
	Unauthorized {
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Service-supplied detail.
		detail: String,
	},
	/// The service processed the call and reported a fault.
	#[error("Signing service reported a fault: {detail}.")]
	Fault {
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Service-supplied detail.
		detail: String,
		/// Retry-After hint from the service, if supplied.
		retry_after: Option<Duration>,
	},
	/// The call never produced a response.
	#[error("Network error occurred while calling the signing service.")]
	Transport {
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
}
impl OperationError {
	/// Wraps a transport-specific network error.
	pub fn transport(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Transport { source: Box::new(src) }
	}

	/// Classification of this failure.
	pub fn kind(&self) -> FailureKind {
		match self {
			Self::Unauthorized { .. } => FailureKind::Unauthorized,
			Self::Fault { .. } => FailureKind::Fault,
			Self::Transport { .. } => FailureKind::Transport,
		}
	}

	/// Returns `true` when the failure should trigger a credential renewal.
	pub fn is_unauthorized(&self) -> bool {
		matches!(self, Self::Unauthorized { .. })
	}

	/// HTTP status associated with the failure, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Unauthorized { status, .. } | Self::Fault { status, .. } => *status,
			Self::Transport { .. } => None,
		}
	}
}

/// Terminal failure recorded for one task.
#[derive(Debug, ThisError)]
pub enum TaskError {
	/// The first attempt failed for a reason other than authorization; nothing was retried.
	#[error("Signing task failed without retry.")]
	Operation {
		/// Failure of the only attempt.
		#[source]
		source: OperationError,
	},
	/// The first attempt was unauthorized and the credential could not be renewed.
	#[error("Credential renewal failed after the signing service rejected the token.")]
	RenewalFailed {
		/// Failure of the first attempt.
		unauthorized: OperationError,
		/// Provider failure during renewal.
		#[source]
		source: AuthFetchError,
	},
	/// The credential was renewed but the retried attempt failed as well.
	#[error("Signing task failed again after renewing the credential.")]
	RenewalExhausted {
		/// Failure of the first attempt.
		unauthorized: OperationError,
		/// Failure of the retried attempt.
		#[source]
		retry: OperationError,
	},
	/// The batch was cancelled before the task acquired a permit.
	#[error("Signing task was cancelled before it started.")]
	Cancelled,
}
impl TaskError {
	/// Returns a stable label suitable for logs and metrics.
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::Operation { .. } => "operation_failed",
			Self::RenewalFailed { .. } => "renewal_failed",
			Self::RenewalExhausted { .. } => "renewal_exhausted",
			Self::Cancelled => "cancelled",
		}
	}

	/// Failure of the first attempt, when one was made.
	pub fn first_cause(&self) -> Option<&OperationError> {
		match self {
			Self::Operation { source } => Some(source),
			Self::RenewalFailed { unauthorized, .. } | Self::RenewalExhausted { unauthorized, .. } =>
				Some(unauthorized),
			Self::Cancelled => None,
		}
	}

	/// Failure of the retried attempt, when a retry ran.
	pub fn retry_cause(&self) -> Option<&OperationError> {
		match self {
			Self::RenewalExhausted { retry, .. } => Some(retry),
			_ => None,
		}
	}

	/// Provider failure, when renewal was attempted and failed.
	pub fn renewal_cause(&self) -> Option<&AuthFetchError> {
		match self {
			Self::RenewalFailed { source, .. } => Some(source),
			_ => None,
		}
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Configuration or document file could not be read.
	#[error("Unable to read {}.", .path.display())]
	Read {
		/// Path that failed to load.
		path: PathBuf,
		/// Underlying IO failure.
		#[source]
		source: io::Error,
	},
	/// Configuration file is not valid TOML for the expected schema.
	#[error("Configuration file is invalid.")]
	Parse(#[from] toml::de::Error),
	/// A URL field could not be parsed.
	#[error("The {field} URL is invalid.")]
	InvalidUrl {
		/// Configuration field name.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A URL field uses a scheme other than HTTP(S).
	#[error("The {field} URL must use http or https: {url}.")]
	UnsupportedScheme {
		/// Configuration field name.
		field: &'static str,
		/// Offending URL.
		url: String,
	},
	/// An identifier failed validation.
	#[error(transparent)]
	Identifier(#[from] IdentifierError),
	/// A required secret is blank.
	#[error("The {field} secret must not be blank.")]
	BlankSecret {
		/// Configuration field name.
		field: &'static str,
	},
	/// A numeric setting must be at least one.
	#[error("The {field} setting must be at least 1.")]
	Zero {
		/// Configuration field name.
		field: &'static str,
	},
	/// The payload provides neither inline document text nor a document path.
	#[error("The payload must set exactly one of document_text or document_path.")]
	DocumentSource,
	/// The SOAP operation name is not a valid XML element name.
	#[error("SOAP operation name `{name}` is not a valid element name.")]
	InvalidOperationName {
		/// Rejected name.
		name: String,
	},
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
