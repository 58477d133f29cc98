// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
use httpmock::prelude::*;
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::TcpListener,
};
// self
use signing_batch::{
	auth::{Principal, PrincipalId},
	error::AuthFetchError,
	provider::{CredentialProvider, TokenEndpointProvider},
	url::Url,
};

fn principal() -> Principal {
	Principal::new(
		PrincipalId::new("svc-batch").expect("Principal fixture should be valid."),
		"svc-password",
	)
}

fn provider(server: &MockServer) -> TokenEndpointProvider {
	TokenEndpointProvider::new(
		Url::parse(&server.url("/token")).expect("Mock token endpoint should parse."),
	)
	.expect("HTTP token endpoints should be accepted.")
}

#[tokio::test]
async fn fetch_sends_basic_auth_and_trims_token() {
	let server = MockServer::start_async().await;
	let expected = format!("Basic {}", STANDARD.encode("svc-batch:svc-password"));
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").header("authorization", expected);
			then.status(200).body("  eyJhbGciOi.token \n");
		})
		.await;
	let token = provider(&server)
		.fetch(&principal())
		.await
		.expect("Token endpoint should return a token.");

	assert_eq!(token.expose(), "eyJhbGciOi.token");

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn non_success_status_carries_status_and_body() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(500).body("identity backend unavailable");
		})
		.await;
	let err = provider(&server)
		.fetch(&principal())
		.await
		.expect_err("HTTP 500 should fail the fetch.");

	match err {
		AuthFetchError::Status { status, body } => {
			assert_eq!(status, 500);
			assert_eq!(body, "identity backend unavailable");
		},
		other => panic!("Unexpected error: {other:?}."),
	}

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn truncated_error_body_keeps_the_status() {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("Loopback listener should bind.");
	let addr = listener.local_addr().expect("Listener should have an address.");
	let server = tokio::spawn(async move {
		let (mut socket, _) = listener.accept().await.expect("Provider should connect.");
		let mut request = Vec::new();
		let mut buf = [0; 1024];

		while !request.windows(4).any(|w| w == b"\r\n\r\n") {
			let read = socket.read(&mut buf).await.expect("Request should be readable.");

			if read == 0 {
				break;
			}

			request.extend_from_slice(&buf[..read]);
		}

		socket
			.write_all(b"HTTP/1.1 502 Bad Gateway\r\ncontent-length: 64\r\n\r\ncut short")
			.await
			.expect("Response head should be written.");
	});
	let provider = TokenEndpointProvider::new(
		Url::parse(&format!("http://{addr}/token")).expect("Loopback URL should parse."),
	)
	.expect("HTTP token endpoints should be accepted.");
	let err = provider.fetch(&principal()).await.expect_err("HTTP 502 should fail the fetch.");

	assert!(matches!(err, AuthFetchError::Status { status: 502, .. }), "unexpected error: {err:?}");

	server.await.expect("Loopback server should finish.");
}

#[tokio::test]
async fn blank_body_is_an_empty_token() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).body(" \r\n");
		})
		.await;

	let err = provider(&server)
		.fetch(&principal())
		.await
		.expect_err("Blank tokens must be rejected.");

	assert!(matches!(err, AuthFetchError::EmptyToken));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
	let provider = TokenEndpointProvider::new(
		Url::parse("http://127.0.0.1:1/token").expect("Closed-port URL should parse."),
	)
	.expect("HTTP token endpoints should be accepted.");
	let err = provider.fetch(&principal()).await.expect_err("Closed ports must fail.");

	assert!(matches!(err, AuthFetchError::Transport { .. }));
}
