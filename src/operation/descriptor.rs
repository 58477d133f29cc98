//! Validated description of the SOAP endpoint that generates signing tasks.

// self
use crate::{_prelude::*, error::ConfigError};

/// Endpoint, namespace, and operation name of the signing service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDescriptor {
	/// URL the envelopes are posted to.
	pub endpoint: Url,
	/// Target namespace of the operation element.
	pub namespace: String,
	/// Operation element name.
	pub operation: String,
	/// Value of the `SOAPAction` header.
	pub soap_action: String,
}
impl ServiceDescriptor {
	/// Operation used when none is configured.
	pub const DEFAULT_OPERATION: &'static str = "generarTareaGEDO";

	/// Creates a new builder for the provided endpoint.
	pub fn builder(endpoint: Url) -> ServiceDescriptorBuilder {
		ServiceDescriptorBuilder::new(endpoint)
	}
}

/// Builder for [`ServiceDescriptor`] values.
#[derive(Debug)]
pub struct ServiceDescriptorBuilder {
	endpoint: Url,
	namespace: String,
	operation: String,
	soap_action: String,
}
impl ServiceDescriptorBuilder {
	/// Creates a builder with the default operation name and an empty `SOAPAction`.
	pub fn new(endpoint: Url) -> Self {
		Self {
			endpoint,
			namespace: String::new(),
			operation: ServiceDescriptor::DEFAULT_OPERATION.into(),
			soap_action: String::new(),
		}
	}

	/// Sets the target namespace.
	pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = namespace.into();

		self
	}

	/// Overrides the operation element name.
	pub fn operation(mut self, operation: impl Into<String>) -> Self {
		self.operation = operation.into();

		self
	}

	/// Sets the `SOAPAction` header value.
	pub fn soap_action(mut self, action: impl Into<String>) -> Self {
		self.soap_action = action.into();

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ServiceDescriptor, ConfigError> {
		validate_http_url("service endpoint", &self.endpoint)?;

		if !is_element_name(&self.operation) {
			return Err(ConfigError::InvalidOperationName { name: self.operation });
		}

		Ok(ServiceDescriptor {
			endpoint: self.endpoint,
			namespace: self.namespace,
			operation: self.operation,
			soap_action: self.soap_action,
		})
	}
}

/// Rejects URLs that are not plain HTTP(S).
pub(crate) fn validate_http_url(field: &'static str, url: &Url) -> Result<(), ConfigError> {
	match url.scheme() {
		"http" | "https" => Ok(()),
		_ => Err(ConfigError::UnsupportedScheme { field, url: url.to_string() }),
	}
}

fn is_element_name(name: &str) -> bool {
	let mut chars = name.chars();

	matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
		&& chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
