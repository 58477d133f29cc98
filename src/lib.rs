//! Bounded-concurrency batch submission of document-signing tasks, with a shared bearer
//! credential that is renewed in place whenever the signing service rejects it.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod batch;
#[cfg(feature = "cli")] pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
#[cfg(feature = "reqwest")] pub mod http;
pub mod obs;
pub mod operation;
pub mod provider;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Scripted providers and operations for exercising the dispatcher without a network;
	//! enabled via `cfg(test)` or the `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::{HashMap, VecDeque},
		sync::atomic::{AtomicUsize, Ordering},
		task::Poll,
	};
	// crates.io
	use parking_lot::Mutex;
	// self
	use crate::{
		auth::{Principal, PrincipalId, Secret, SharedCredential},
		dispatch::{Dispatcher, TaskId},
		error::{AuthFetchError, OperationError},
		operation::{OperationFuture, Receipt, RemoteOperation},
		provider::{CredentialProvider, ProviderFuture},
	};

	/// Returns `Pending` once so sibling futures in the same task get polled.
	pub async fn yield_now() {
		let mut yielded = false;

		futures::future::poll_fn(|cx| {
			if yielded {
				Poll::Ready(())
			} else {
				yielded = true;

				cx.waker().wake_by_ref();

				Poll::Pending
			}
		})
		.await
	}

	/// Principal used by every fake in this module.
	pub fn test_principal() -> Principal {
		Principal::new(
			PrincipalId::new("svc-batch").expect("Test principal identifier should be valid."),
			"svc-password",
		)
	}

	/// Builds a dispatcher around a fresh credential holding `initial_token`.
	pub fn build_test_dispatcher(
		capacity: usize,
		initial_token: &str,
		provider: Arc<FakeProvider>,
	) -> Dispatcher {
		let capacity = NonZeroUsize::new(capacity).expect("Test capacity must be non-zero.");
		let provider: Arc<dyn CredentialProvider> = provider;

		Dispatcher::new(
			capacity,
			SharedCredential::new(Secret::new(initial_token)),
			provider,
			test_principal(),
		)
	}

	/// Credential provider that hands out a scripted sequence of tokens.
	///
	/// Once the script is exhausted the last token is repeated; a provider built with
	/// [`FakeProvider::failing`] rejects every call with the configured status.
	#[derive(Debug, Default)]
	pub struct FakeProvider {
		script: Mutex<VecDeque<Result<String, u16>>>,
		last: Mutex<Option<Result<String, u16>>>,
		calls: AtomicUsize,
	}
	impl FakeProvider {
		/// Issues the provided tokens in order.
		pub fn sequence<I, S>(tokens: I) -> Self
		where
			I: IntoIterator<Item = S>,
			S: Into<String>,
		{
			let script = tokens.into_iter().map(|token| Ok(token.into())).collect();

			Self { script: Mutex::new(script), ..Default::default() }
		}

		/// Fails every call with the given HTTP status.
		pub fn failing(status: u16) -> Self {
			Self { last: Mutex::new(Some(Err(status))), ..Default::default() }
		}

		/// Appends a failure that is returned once the earlier script entries are consumed.
		pub fn then_fail(self, status: u16) -> Self {
			self.script.lock().push_back(Err(status));

			self
		}

		/// Number of `fetch` calls observed so far.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}

		fn next(&self) -> Result<String, u16> {
			let mut last = self.last.lock();

			if let Some(step) = self.script.lock().pop_front() {
				*last = Some(step.clone());

				return step;
			}

			last.clone().unwrap_or(Err(500))
		}
	}
	impl CredentialProvider for FakeProvider {
		fn fetch<'a>(&'a self, _principal: &'a Principal) -> ProviderFuture<'a> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			let step = self.next();

			Box::pin(async move {
				yield_now().await;

				match step {
					Ok(token) => Ok(Secret::new(token)),
					Err(status) =>
						Err(AuthFetchError::Status { status, body: "fake provider failure".into() }),
				}
			})
		}
	}

	/// Scripted response for one invocation of a [`FakeOperation`].
	#[derive(Clone, Copy, Debug, PartialEq, Eq)]
	pub enum Step {
		/// Accept the call.
		Ok,
		/// Reject the attached credential.
		Unauthorized,
		/// Fail with a non-authorization fault.
		Fault,
	}

	/// Instrumented fake of the signing service shared by every task in a batch.
	///
	/// It records the token each invocation carried and the high-water mark of concurrent
	/// invocations. Per-task scripts override the default behavior attempt by attempt; an
	/// accepted token, when set, makes every other token unauthorized.
	#[derive(Debug, Default)]
	pub struct FakeService {
		scripts: Mutex<HashMap<TaskId, VecDeque<Step>>>,
		accepted_token: Mutex<Option<String>>,
		calls: Mutex<Vec<(TaskId, String)>>,
		in_flight: AtomicUsize,
		peak: AtomicUsize,
		yields: usize,
	}
	impl FakeService {
		/// Creates a service that accepts every call.
		pub fn new() -> Self {
			Self { yields: 3, ..Default::default() }
		}

		/// Scripts the responses for a task's successive attempts.
		pub fn script<I>(self, task: usize, steps: I) -> Self
		where
			I: IntoIterator<Item = Step>,
		{
			self.scripts.lock().insert(TaskId::new(task), steps.into_iter().collect());

			self
		}

		/// Only the given token is accepted; any other token is unauthorized.
		pub fn accepting(self, token: impl Into<String>) -> Self {
			*self.accepted_token.lock() = Some(token.into());

			self
		}

		/// Builds the operation a given task will invoke.
		pub fn operation(self: &Arc<Self>, task: TaskId) -> FakeOperation {
			FakeOperation { service: self.clone(), task }
		}

		/// Every `(task, token)` pair observed, in invocation order.
		pub fn calls(&self) -> Vec<(TaskId, String)> {
			self.calls.lock().clone()
		}

		/// Number of invocations observed for one task.
		pub fn calls_for(&self, task: usize) -> usize {
			self.calls.lock().iter().filter(|(id, _)| id.get() == task).count()
		}

		/// Highest number of invocations that were in flight simultaneously.
		pub fn peak_in_flight(&self) -> usize {
			self.peak.load(Ordering::SeqCst)
		}

		fn step_for(&self, task: TaskId, token: &str) -> Step {
			let scripted = self.scripts.lock().get_mut(&task).and_then(VecDeque::pop_front);

			if let Some(step) = scripted {
				return step;
			}

			match self.accepted_token.lock().as_deref() {
				Some(accepted) if accepted != token => Step::Unauthorized,
				_ => Step::Ok,
			}
		}
	}

	/// Per-task handle onto a [`FakeService`].
	#[derive(Debug)]
	pub struct FakeOperation {
		service: Arc<FakeService>,
		task: TaskId,
	}
	impl RemoteOperation for FakeOperation {
		fn invoke<'a>(&'a self, token: &'a Secret) -> OperationFuture<'a> {
			Box::pin(async move {
				let service = &self.service;
				let now = service.in_flight.fetch_add(1, Ordering::SeqCst) + 1;

				service.peak.fetch_max(now, Ordering::SeqCst);
				service.calls.lock().push((self.task, token.expose().to_owned()));

				for _ in 0..service.yields {
					yield_now().await;
				}

				let step = service.step_for(self.task, token.expose());

				service.in_flight.fetch_sub(1, Ordering::SeqCst);

				match step {
					Step::Ok => Ok(Receipt::default()),
					Step::Unauthorized => Err(OperationError::Unauthorized {
						status: Some(401),
						detail: format!("token rejected for {}", self.task),
					}),
					Step::Fault => Err(OperationError::Fault {
						status: Some(500),
						detail: format!("service fault for {}", self.task),
						retry_after: None,
					}),
				}
			})
		}
	}
}

mod _prelude {
	pub use std::{
		collections::BTreeMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		num::NonZeroUsize,
		path::{Path, PathBuf},
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::{Mutex as AsyncMutex, Semaphore};
	pub use parking_lot::RwLock;
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use tokio_util::sync::CancellationToken;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use tokio_util::sync::CancellationToken;
pub use url;
#[cfg(any(test, feature = "cli"))] use color_eyre as _;
#[cfg(test)] use httpmock as _;
#[cfg(test)] use tracing_subscriber as _;
