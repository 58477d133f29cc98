//! TOML batch configuration.
//!
//! The file has four sections:
//!
//! ```toml
//! [auth]
//! principal = "svc-batch"
//! secret = "..."
//! token_endpoint = "https://auth.example.com/token"
//!
//! [service]
//! endpoint = "https://gedo.example.com/ws"
//! namespace = "http://ar.gob.gcaba.ee.services.external/"
//! soap_action = ""
//!
//! [batch]
//! task_count = 100
//! concurrency_limit = 20
//! renewal = "per_task"
//!
//! [payload]
//! document_type = "TESTL"
//! document_text = "Documento de prueba."
//! issuer = "USERT"
//! ```
//!
//! Only this module and the CLI read files; everything downstream receives resolved values.

// std
use std::fs;
// self
use crate::{
	_prelude::*,
	auth::{DocumentType, Principal, PrincipalId, Secret, UserId},
	dispatch::RenewalPolicy,
	error::ConfigError,
	operation::{ServiceDescriptor, SigningTaskRequest, descriptor::validate_http_url},
};

/// Complete batch configuration file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
	/// Credentials and token endpoint.
	pub auth: AuthSection,
	/// Signing service endpoint.
	pub service: ServiceSection,
	/// Batch size and concurrency.
	#[serde(default)]
	pub batch: BatchSection,
	/// Signing request submitted by every task.
	pub payload: PayloadSection,
	/// Directory relative document paths are resolved against.
	#[serde(skip)]
	base_dir: Option<PathBuf>,
}
impl BatchConfig {
	/// Loads and validates a configuration file.
	///
	/// A relative `payload.document_path` is resolved against the file's directory.
	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = fs::read_to_string(path)
			.map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
		let mut config = Self::from_toml(&content)?;

		config.base_dir = path.parent().map(Path::to_path_buf);

		Ok(config)
	}

	/// Parses and validates configuration from a TOML string.
	pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(content)?;

		config.validate()?;

		Ok(config)
	}

	/// Checks every field that can be checked without touching the filesystem.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.auth.secret.is_blank() {
			return Err(ConfigError::BlankSecret { field: "auth.secret" });
		}

		self.token_endpoint()?;
		self.service_descriptor()?;
		self.concurrency()?;

		if self.service.timeout_secs == 0 {
			return Err(ConfigError::Zero { field: "service.timeout_secs" });
		}
		if self.payload.document_text.is_some() == self.payload.document_path.is_some() {
			return Err(ConfigError::DocumentSource);
		}

		Ok(())
	}

	/// Account the batch authenticates as.
	pub fn principal(&self) -> Principal {
		Principal::new(self.auth.principal.clone(), self.auth.secret.clone())
	}

	/// Parsed token endpoint URL.
	pub fn token_endpoint(&self) -> Result<Url, ConfigError> {
		parse_http_url("auth.token_endpoint", &self.auth.token_endpoint)
	}

	/// Limiter capacity.
	pub fn concurrency(&self) -> Result<NonZeroUsize, ConfigError> {
		NonZeroUsize::new(self.batch.concurrency_limit)
			.ok_or(ConfigError::Zero { field: "batch.concurrency_limit" })
	}

	/// Per-request HTTP timeout.
	pub fn timeout(&self) -> std::time::Duration {
		std::time::Duration::from_secs(self.service.timeout_secs)
	}

	/// Validated signing service description.
	pub fn service_descriptor(&self) -> Result<ServiceDescriptor, ConfigError> {
		let endpoint = parse_http_url("service.endpoint", &self.service.endpoint)?;

		ServiceDescriptor::builder(endpoint)
			.namespace(&self.service.namespace)
			.operation(&self.service.operation)
			.soap_action(&self.service.soap_action)
			.build()
	}

	/// Builds the signing request, reading the document from disk when configured by path.
	pub fn signing_request(&self) -> Result<SigningTaskRequest, ConfigError> {
		let payload = &self.payload;
		let data = match (&payload.document_text, &payload.document_path) {
			(Some(text), None) => text.clone().into_bytes(),
			(None, Some(path)) => {
				let path = match &self.base_dir {
					Some(base) if path.is_relative() => base.join(path),
					_ => path.clone(),
				};

				fs::read(&path).map_err(|source| ConfigError::Read { path, source })?
			},
			_ => return Err(ConfigError::DocumentSource),
		};
		let mut request =
			SigningTaskRequest::new(payload.document_type.clone(), data, payload.issuer.clone())
				.with_task_name(&payload.task_name)
				.with_reference(&payload.reference);

		if !payload.signers.is_empty() {
			request = request.with_signers(payload.signers.iter().cloned());
		}
		if let Some(receiver) = &payload.receiver {
			request = request.with_receiver(receiver.clone());
		}

		request.subscribe_to_document = payload.subscribe_to_document;
		request.mail_receiver = payload.mail_receiver;
		request.notify_on_signature = payload.notify_on_signature;
		request.metadata = payload.metadata.clone();
		request.external_recipients = payload.external_recipients.clone();

		Ok(request)
	}
}

/// `[auth]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthSection {
	/// Service account name.
	pub principal: PrincipalId,
	/// Service account password.
	pub secret: Secret,
	/// Token endpoint URL.
	pub token_endpoint: String,
}

/// `[service]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
	/// SOAP endpoint URL.
	pub endpoint: String,
	/// Target namespace of the operation element.
	#[serde(default)]
	pub namespace: String,
	/// Operation element name.
	#[serde(default = "default_operation")]
	pub operation: String,
	/// `SOAPAction` header value.
	#[serde(default)]
	pub soap_action: String,
	/// Per-request timeout in seconds, applied to both endpoints.
	#[serde(default = "default_timeout_secs")]
	pub timeout_secs: u64,
}

/// `[batch]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchSection {
	/// Number of identical tasks to submit.
	pub task_count: usize,
	/// Maximum concurrent invocations.
	pub concurrency_limit: usize,
	/// Renewal coordination.
	pub renewal: RenewalPolicy,
}
impl Default for BatchSection {
	fn default() -> Self {
		Self { task_count: 1, concurrency_limit: 20, renewal: RenewalPolicy::default() }
	}
}

/// `[payload]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadSection {
	/// Document type acronym.
	pub document_type: DocumentType,
	/// Inline document content.
	#[serde(default)]
	pub document_text: Option<String>,
	/// Document file to read.
	#[serde(default)]
	pub document_path: Option<PathBuf>,
	/// Task name shown to signers.
	#[serde(default = "default_task_name")]
	pub task_name: String,
	/// Issuing user.
	pub issuer: UserId,
	/// Signing users in order; defaults to the issuer.
	#[serde(default)]
	pub signers: Vec<UserId>,
	/// Receiving user; defaults to the issuer.
	#[serde(default)]
	pub receiver: Option<UserId>,
	/// Free-text reference.
	#[serde(default)]
	pub reference: String,
	/// Subscribe the issuer to document updates.
	#[serde(default)]
	pub subscribe_to_document: bool,
	/// Email the receiver.
	#[serde(default)]
	pub mail_receiver: bool,
	/// Notify the issuer once signed.
	#[serde(default)]
	pub notify_on_signature: bool,
	/// Metadata entries.
	#[serde(default)]
	pub metadata: BTreeMap<String, String>,
	/// External recipients.
	#[serde(default)]
	pub external_recipients: BTreeMap<String, String>,
}

fn default_operation() -> String {
	ServiceDescriptor::DEFAULT_OPERATION.into()
}

fn default_timeout_secs() -> u64 {
	30
}

fn default_task_name() -> String {
	"Firmar Documento".into()
}

fn parse_http_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
	let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { field, source })?;

	validate_http_url(field, &url)?;

	Ok(url)
}
