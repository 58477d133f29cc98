//! Reqwest-backed [`RemoteOperation`] that posts a signing-task envelope to the SOAP service.

// crates.io
use reqwest::header::CONTENT_TYPE;
// self
use crate::{
	_prelude::*,
	auth::Secret,
	error::OperationError,
	http::{ReqwestHttpClient, ResponseMetadata},
	operation::{
		DefaultFailureClassifier, FailureClassifier, FailureKind, OperationFuture, Receipt,
		RemoteOperation, ResponseContext, ServiceDescriptor, SigningTaskRequest,
		classify::truncate_preview,
	},
};

const SOAP_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Submits one pre-rendered signing-task envelope per invocation.
///
/// The envelope is rendered once at construction and shared, so cloning the operation (or
/// wrapping it in an [`Arc`]) for every task of a batch is cheap.
#[derive(Clone)]
pub struct SoapSigningOperation {
	descriptor: Arc<ServiceDescriptor>,
	envelope: Arc<str>,
	http_client: ReqwestHttpClient,
	classifier: Arc<dyn FailureClassifier>,
}
impl SoapSigningOperation {
	/// Builds the operation for `request` against the described service.
	pub fn new(descriptor: ServiceDescriptor, request: &SigningTaskRequest) -> Self {
		let envelope = request.render_envelope(&descriptor.namespace, &descriptor.operation);

		Self {
			descriptor: Arc::new(descriptor),
			envelope: envelope.into(),
			http_client: ReqwestHttpClient::default(),
			classifier: Arc::new(DefaultFailureClassifier),
		}
	}

	/// Reuses the caller's HTTP client (and its connection pool).
	pub fn with_http_client(mut self, http_client: ReqwestHttpClient) -> Self {
		self.http_client = http_client;

		self
	}

	/// Replaces the failure classifier.
	pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
		self.classifier = classifier;

		self
	}

	/// Rendered envelope sent on every invocation.
	pub fn envelope(&self) -> &str {
		&self.envelope
	}

	async fn submit(&self, token: &Secret) -> Result<Receipt, OperationError> {
		let response = match self
			.http_client
			.post(self.descriptor.endpoint.clone())
			.bearer_auth(token.expose())
			.header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
			.header("SOAPAction", format!("\"{}\"", self.descriptor.soap_action))
			.body(self.envelope.to_string())
			.send()
			.await
		{
			Ok(response) => response,
			Err(err) => return Err(self.network_failure(err)),
		};
		let meta = ResponseMetadata::capture(&response);
		let success = response.status().is_success();
		let body = response.text().await.map_err(|err| self.network_failure(err))?;

		if success {
			return Ok(Receipt { status: meta.status, body_preview: Some(truncate_preview(body)) });
		}

		let ctx = ResponseContext { http_status: meta.status, ..Default::default() }
			.with_body_preview(body);

		Err(self.failure(&ctx, meta))
	}

	fn network_failure(&self, err: ReqwestError) -> OperationError {
		let ctx = ResponseContext::network_failure();

		match self.classifier.classify(&ctx) {
			FailureKind::Transport => OperationError::transport(err),
			_ => self.failure(&ctx, ResponseMetadata::default()),
		}
	}

	fn failure(&self, ctx: &ResponseContext, meta: ResponseMetadata) -> OperationError {
		let detail = ctx.body_preview.clone().unwrap_or_else(|| "no response body".into());

		match self.classifier.classify(ctx) {
			FailureKind::Unauthorized => OperationError::Unauthorized { status: meta.status, detail },
			FailureKind::Fault | FailureKind::Transport => OperationError::Fault {
				status: meta.status,
				detail,
				retry_after: meta.retry_after,
			},
		}
	}
}
impl RemoteOperation for SoapSigningOperation {
	fn invoke<'a>(&'a self, token: &'a Secret) -> OperationFuture<'a> {
		Box::pin(self.submit(token))
	}
}
impl Debug for SoapSigningOperation {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SoapSigningOperation")
			.field("descriptor", &self.descriptor)
			.field("envelope_len", &self.envelope.len())
			.finish()
	}
}
