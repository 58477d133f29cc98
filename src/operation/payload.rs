//! Signing-task request model and its SOAP 1.1 envelope rendering.

// std
use std::{borrow::Cow, fmt::Write as _};
// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
// self
use crate::{
	_prelude::*,
	auth::{DocumentType, UserId},
};

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// One "generate a signing task" request.
///
/// Every task of a batch submits the same request; the dispatcher's operation factory receives
/// the task id, so a per-task request only requires building a different value there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningTaskRequest {
	/// Acronym of the document type to generate.
	pub document_type: DocumentType,
	/// Raw document content; sent base64-encoded.
	pub data: Vec<u8>,
	/// Task name shown to the signers.
	pub task_name: String,
	/// User that issues the task.
	pub issuer: UserId,
	/// Users asked to sign, in signing order.
	pub signers: Vec<UserId>,
	/// User that receives the signed document.
	pub receiver: UserId,
	/// Free-text reference attached to the document.
	pub reference: String,
	/// Subscribe the issuer to document updates.
	pub subscribe_to_document: bool,
	/// Send an email to the receiver.
	pub mail_receiver: bool,
	/// Notify the issuer once the document is signed.
	pub notify_on_signature: bool,
	/// Optional metadata entries.
	pub metadata: BTreeMap<String, String>,
	/// Optional external recipients, keyed by recipient identifier.
	pub external_recipients: BTreeMap<String, String>,
}
impl SigningTaskRequest {
	/// Creates a request where the issuer also signs and receives the document.
	pub fn new(document_type: DocumentType, data: impl Into<Vec<u8>>, issuer: UserId) -> Self {
		Self {
			document_type,
			data: data.into(),
			task_name: "Firmar Documento".into(),
			signers: vec![issuer.clone()],
			receiver: issuer.clone(),
			issuer,
			reference: String::new(),
			subscribe_to_document: false,
			mail_receiver: false,
			notify_on_signature: false,
			metadata: BTreeMap::new(),
			external_recipients: BTreeMap::new(),
		}
	}

	/// Overrides the task name.
	pub fn with_task_name(mut self, name: impl Into<String>) -> Self {
		self.task_name = name.into();

		self
	}

	/// Replaces the signer list.
	pub fn with_signers<I>(mut self, signers: I) -> Self
	where
		I: IntoIterator<Item = UserId>,
	{
		self.signers = signers.into_iter().collect();

		self
	}

	/// Overrides the receiving user.
	pub fn with_receiver(mut self, receiver: UserId) -> Self {
		self.receiver = receiver;

		self
	}

	/// Sets the free-text reference.
	pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
		self.reference = reference.into();

		self
	}

	/// Adds a metadata entry.
	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.metadata.insert(key.into(), value.into());

		self
	}

	/// Adds an external recipient.
	pub fn with_external_recipient(
		mut self,
		key: impl Into<String>,
		value: impl Into<String>,
	) -> Self {
		self.external_recipients.insert(key.into(), value.into());

		self
	}

	/// Renders the SOAP 1.1 envelope invoking `operation` in the `namespace` target namespace.
	pub fn render_envelope(&self, namespace: &str, operation: &str) -> String {
		let mut xml = String::with_capacity(1024 + self.data.len() * 4 / 3);
		let ns = escape(namespace);

		// Writing into a `String` cannot fail.
		let _ = write!(
			xml,
			"<soapenv:Envelope xmlns:soapenv=\"{SOAP_ENV_NS}\" xmlns:svc=\"{ns}\">\
			<soapenv:Header/><soapenv:Body><svc:{operation}><request>"
		);

		element(&mut xml, "acronimoTipoDocumento", &self.document_type);
		element(&mut xml, "data", &STANDARD.encode(&self.data));
		element(&mut xml, "tarea", &self.task_name);
		element(&mut xml, "usuarioEmisor", &self.issuer);
		entries(
			&mut xml,
			"usuarioFirmante",
			self.signers.iter().enumerate().map(|(idx, user)| ((idx + 1).to_string(), user.to_string())),
		);
		element(&mut xml, "usuarioReceptor", &self.receiver);
		element(&mut xml, "referencia", &self.reference);
		element(&mut xml, "suscribirseAlDocumento", bool_str(self.subscribe_to_document));
		element(&mut xml, "enviarCorreoReceptor", bool_str(self.mail_receiver));
		entries(
			&mut xml,
			"listaUsuariosDestinatariosExternos",
			self.external_recipients.iter().map(|(k, v)| (k.clone(), v.clone())),
		);
		entries(&mut xml, "metaDatos", self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
		element(&mut xml, "recibirAvisoFirma", bool_str(self.notify_on_signature));

		let _ = write!(xml, "</request></svc:{operation}></soapenv:Body></soapenv:Envelope>");

		xml
	}
}

fn element(xml: &mut String, name: &str, value: &str) {
	let _ = write!(xml, "<{name}>{}</{name}>", escape(value));
}

fn entries<I>(xml: &mut String, name: &str, values: I)
where
	I: Iterator<Item = (String, String)>,
{
	let _ = write!(xml, "<{name}>");

	for (key, value) in values {
		let _ = write!(xml, "<entry><key>{}</key><value>{}</value></entry>", escape(&key), escape(&value));
	}

	let _ = write!(xml, "</{name}>");
}

fn bool_str(value: bool) -> &'static str {
	if value { "true" } else { "false" }
}

/// Escapes the five XML special characters.
pub(crate) fn escape(value: &str) -> Cow<'_, str> {
	if !value.contains(['&', '<', '>', '"', '\'']) {
		return Cow::Borrowed(value);
	}

	let mut buf = String::with_capacity(value.len() + 8);

	for ch in value.chars() {
		match ch {
			'&' => buf.push_str("&amp;"),
			'<' => buf.push_str("&lt;"),
			'>' => buf.push_str("&gt;"),
			'"' => buf.push_str("&quot;"),
			'\'' => buf.push_str("&apos;"),
			other => buf.push(other),
		}
	}

	Cow::Owned(buf)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn request() -> SigningTaskRequest {
		SigningTaskRequest::new(
			DocumentType::new("TESTL").expect("Acronym fixture should be valid."),
			"Documento de prueba.",
			UserId::new("USERT").expect("User fixture should be valid."),
		)
		.with_reference("A & B <test>")
	}

	#[test]
	fn envelope_carries_base64_document_and_signers() {
		let xml = request().render_envelope("http://example.com/gedo", "generarTareaGEDO");

		assert!(xml.starts_with("<soapenv:Envelope"));
		assert!(xml.contains("<svc:generarTareaGEDO><request>"));
		assert!(xml.contains(&format!("<data>{}</data>", STANDARD.encode("Documento de prueba."))));
		assert!(xml.contains(
			"<usuarioFirmante><entry><key>1</key><value>USERT</value></entry></usuarioFirmante>"
		));
		assert!(xml.contains("<metaDatos></metaDatos>"));
		assert!(xml.contains("<recibirAvisoFirma>false</recibirAvisoFirma>"));
	}

	#[test]
	fn text_values_are_escaped() {
		let xml = request().render_envelope("urn:a&b", "generarTareaGEDO");

		assert!(xml.contains("<referencia>A &amp; B &lt;test&gt;</referencia>"));
		assert!(xml.contains("xmlns:svc=\"urn:a&amp;b\""));
		assert!(matches!(escape("plain"), Cow::Borrowed("plain")));
	}

	#[test]
	fn optional_maps_render_entries() {
		let xml = request()
			.with_metadata("expediente", "EX-1")
			.with_external_recipient("ext-1", "mail@example.com")
			.render_envelope("urn:gedo", "generarTareaGEDO");

		assert!(xml.contains("<metaDatos><entry><key>expediente</key><value>EX-1</value></entry></metaDatos>"));
		assert!(xml.contains("<value>mail@example.com</value>"));
	}
}
