//! Bounded dispatcher that runs every task of a batch under a shared, renewable credential.
//!
//! [`Dispatcher::stream`] pushes one future per task into a single `FuturesUnordered`. Each task
//! waits for a permit from the limiter, invokes its [`RemoteOperation`] with the current token
//! and, when the service rejects that token, renews the shared credential through the
//! [`CredentialProvider`] and retries exactly once while still holding its permit. The permit
//! is released before the task's [`TaskReport`] is yielded, and reports arrive in completion
//! order with a monotonically increasing `completed` count.

mod metrics;
mod report;
mod state;

pub use metrics::DispatchMetrics;
pub use report::*;
pub use state::*;

// std
use std::pin::pin;
// crates.io
use async_lock::SemaphoreGuard;
use futures::{
	Stream, StreamExt,
	future::{self, Either},
	stream::FuturesUnordered,
};
// self
use crate::{
	_prelude::*,
	auth::{Principal, Secret, SharedCredential},
	error::{AuthFetchError, OperationError, TaskError},
	obs::{self, CallKind, CallOutcome, CallSpan},
	operation::{Receipt, RemoteOperation},
	provider::CredentialProvider,
};

/// How concurrent renewals of the shared credential are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalPolicy {
	/// Every failing task renews on its own; duplicate renewals are idempotent.
	#[default]
	PerTask,
	/// Tasks that failed with the same credential generation share one renewal.
	SingleFlight,
}

/// Zero-based index of a task within its batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(usize);
impl TaskId {
	/// Wraps a task index.
	pub const fn new(index: usize) -> Self {
		Self(index)
	}

	/// Returns the task index.
	pub const fn get(self) -> usize {
		self.0
	}
}
impl Display for TaskId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "#{}", self.0)
	}
}

/// Runs batches of remote operations with bounded concurrency and single-retry renewal.
pub struct Dispatcher {
	limiter: Semaphore,
	capacity: NonZeroUsize,
	credential: SharedCredential,
	provider: Arc<dyn CredentialProvider>,
	principal: Principal,
	renewal: RenewalPolicy,
	renewal_guard: AsyncMutex<()>,
	cancellation: CancellationToken,
	metrics: Arc<DispatchMetrics>,
}
impl Dispatcher {
	/// Creates a dispatcher allowing at most `capacity` invocations in flight.
	pub fn new(
		capacity: NonZeroUsize,
		credential: SharedCredential,
		provider: Arc<dyn CredentialProvider>,
		principal: Principal,
	) -> Self {
		Self {
			limiter: Semaphore::new(capacity.get()),
			capacity,
			credential,
			provider,
			principal,
			renewal: RenewalPolicy::default(),
			renewal_guard: AsyncMutex::new(()),
			cancellation: CancellationToken::new(),
			metrics: Default::default(),
		}
	}

	/// Selects how concurrent renewals are coordinated.
	pub fn with_renewal_policy(mut self, policy: RenewalPolicy) -> Self {
		self.renewal = policy;

		self
	}

	/// Tasks still waiting for a permit fail as cancelled once `token` fires.
	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancellation = token;

		self
	}

	/// Shares an externally owned metrics sink.
	pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
		self.metrics = metrics;

		self
	}

	/// Maximum number of concurrent invocations.
	pub fn capacity(&self) -> NonZeroUsize {
		self.capacity
	}

	/// Shared credential every task reads.
	pub fn credential(&self) -> &SharedCredential {
		&self.credential
	}

	/// Active renewal policy.
	pub fn renewal_policy(&self) -> RenewalPolicy {
		self.renewal
	}

	/// Counters collected while dispatching.
	pub fn metrics(&self) -> &Arc<DispatchMetrics> {
		&self.metrics
	}

	/// Starts `task_count` tasks and yields one report per task as each finishes.
	///
	/// `make_operation` is called once per task, up front, with the task's id. Dropping the
	/// stream drops every unfinished task with it.
	pub fn stream<F, O>(
		&self,
		task_count: usize,
		mut make_operation: F,
	) -> impl Stream<Item = TaskReport>
	where
		F: FnMut(TaskId) -> O,
		O: RemoteOperation,
	{
		let tasks = (0..task_count)
			.map(|index| {
				let task = TaskId::new(index);
				let operation = make_operation(task);

				self.execute(task, operation)
			})
			.collect::<FuturesUnordered<_>>();

		tasks.enumerate().map(move |(finished, done)| {
			let report = TaskReport {
				task: done.task,
				completed: finished + 1,
				total: task_count,
				attempts: done.attempts,
				outcome: done.outcome,
			};

			obs::task_finished(&report);
			obs::record_task_outcome(&report);

			report
		})
	}

	/// Runs the batch to completion and returns every outcome.
	pub async fn run<F, O>(&self, task_count: usize, make_operation: F) -> BatchResult
	where
		F: FnMut(TaskId) -> O,
		O: RemoteOperation,
	{
		self.run_with_progress(task_count, make_operation, |_| {}).await
	}

	/// Runs the batch to completion, handing each report to `progress` before recording it.
	pub async fn run_with_progress<F, O, P>(
		&self,
		task_count: usize,
		make_operation: F,
		mut progress: P,
	) -> BatchResult
	where
		F: FnMut(TaskId) -> O,
		O: RemoteOperation,
		P: FnMut(&TaskReport),
	{
		obs::batch_started(task_count, self.capacity.get());

		let mut reports = pin!(self.stream(task_count, make_operation));
		let mut result = BatchResult::with_capacity(task_count);

		while let Some(report) = reports.next().await {
			progress(&report);
			result.push(report);
		}

		obs::batch_finished(result.len(), result.succeeded(), result.failed());

		result
	}

	async fn execute<O>(&self, task: TaskId, operation: O) -> Finished
	where
		O: RemoteOperation,
	{
		let mut state = TaskState::Pending;
		let Some(permit) = self.acquire().await else {
			advance(task, &mut state, TaskState::Failed);

			return Finished {
				task,
				attempts: 0,
				outcome: TaskOutcome::Failed(TaskError::Cancelled),
			};
		};

		advance(task, &mut state, TaskState::Running);

		let snapshot = self.credential.snapshot();
		let mut attempts = 1;
		let outcome = match self.attempt(CallKind::Submit, task, &operation, &snapshot.token).await
		{
			Ok(receipt) => TaskOutcome::Succeeded(receipt),
			Err(unauthorized) if unauthorized.is_unauthorized() => {
				advance(task, &mut state, TaskState::AuthFailed);
				advance(task, &mut state, TaskState::Renewing);

				match self.renew(task, snapshot.generation).await {
					Ok(token) => {
						advance(task, &mut state, TaskState::Retrying);

						attempts = 2;

						match self.attempt(CallKind::Retry, task, &operation, &token).await {
							Ok(receipt) => TaskOutcome::Succeeded(receipt),
							Err(retry) =>
								TaskOutcome::Failed(TaskError::RenewalExhausted { unauthorized, retry }),
						}
					},
					Err(source) =>
						TaskOutcome::Failed(TaskError::RenewalFailed { unauthorized, source }),
				}
			},
			Err(source) => TaskOutcome::Failed(TaskError::Operation { source }),
		};

		drop(permit);

		let terminal = if outcome.is_success() { TaskState::Succeeded } else { TaskState::Failed };

		advance(task, &mut state, terminal);

		Finished { task, attempts, outcome }
	}

	// Cancellation is polled first so a cancelled batch never starts another task, even when a
	// permit is free.
	async fn acquire(&self) -> Option<SemaphoreGuard<'_>> {
		let cancelled = pin!(self.cancellation.cancelled());
		let permit = pin!(self.limiter.acquire());

		match future::select(cancelled, permit).await {
			Either::Left(_) => None,
			Either::Right((permit, _)) => Some(permit),
		}
	}

	async fn attempt<O>(
		&self,
		kind: CallKind,
		task: TaskId,
		operation: &O,
		token: &Secret,
	) -> Result<Receipt, OperationError>
	where
		O: RemoteOperation,
	{
		let span = CallSpan::for_task(kind, "invoke_operation", task);

		obs::record_call_outcome(kind, CallOutcome::Attempt);

		let result = span
			.instrument(async {
				let _in_flight = self.metrics.begin_invocation();

				operation.invoke(token).await
			})
			.await;

		obs::record_call_outcome(kind, CallOutcome::of(&result));

		result
	}

	async fn renew(&self, task: TaskId, failed_generation: u64) -> Result<Secret, AuthFetchError> {
		match self.renewal {
			RenewalPolicy::PerTask => self.fetch_and_install(task).await,
			RenewalPolicy::SingleFlight => {
				let _singleflight = self.renewal_guard.lock().await;
				let current = self.credential.snapshot();

				if current.generation != failed_generation {
					self.metrics.record_coalesced();

					return Ok(current.token);
				}

				self.fetch_and_install(task).await
			},
		}
	}

	async fn fetch_and_install(&self, task: TaskId) -> Result<Secret, AuthFetchError> {
		const KIND: CallKind = CallKind::Renewal;

		let span = CallSpan::for_task(KIND, "renew_credential", task);

		obs::record_call_outcome(KIND, CallOutcome::Attempt);
		self.metrics.record_provider_call();

		let result = span.instrument(self.provider.fetch(&self.principal)).await;

		obs::record_call_outcome(KIND, CallOutcome::of(&result));

		let token = result?;

		self.credential.update(token.clone());

		Ok(token)
	}
}
impl Debug for Dispatcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Dispatcher")
			.field("capacity", &self.capacity)
			.field("credential", &self.credential)
			.field("principal", &self.principal)
			.field("renewal", &self.renewal)
			.field("cancelled", &self.cancellation.is_cancelled())
			.finish()
	}
}

fn advance(task: TaskId, state: &mut TaskState, next: TaskState) {
	let from = *state;

	state.advance(next);
	obs::task_transition(task, from, next);
}

struct Finished {
	task: TaskId,
	attempts: u8,
	outcome: TaskOutcome,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::*;

	fn service() -> Arc<FakeService> {
		Arc::new(FakeService::new())
	}

	#[cfg(feature = "tracing")]
	#[derive(Clone, Default)]
	struct LogCapture(Arc<parking_lot::Mutex<Vec<u8>>>);
	#[cfg(feature = "tracing")]
	impl LogCapture {
		fn contents(&self) -> String {
			String::from_utf8_lossy(&self.0.lock()).into_owned()
		}
	}
	#[cfg(feature = "tracing")]
	impl std::io::Write for LogCapture {
		fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
			self.0.lock().extend_from_slice(buf);

			Ok(buf.len())
		}

		fn flush(&mut self) -> std::io::Result<()> {
			Ok(())
		}
	}
	#[cfg(feature = "tracing")]
	impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
		type Writer = Self;

		fn make_writer(&'a self) -> Self::Writer {
			self.clone()
		}
	}

	#[tokio::test]
	async fn every_task_reports_exactly_once() {
		let provider = Arc::new(FakeProvider::sequence(["unused"]));
		let dispatcher = build_test_dispatcher(4, "t1", provider.clone());
		let service = service();
		let result = dispatcher.run(25, |task| service.operation(task)).await;

		assert!(result.is_complete(25));
		assert_eq!(result.succeeded(), 25);
		assert_eq!(provider.calls(), 0);
		assert_eq!(service.calls().len(), 25);
		assert!(result.reports().iter().all(|r| r.attempts == 1));
	}

	#[tokio::test]
	async fn zero_tasks_yield_an_empty_result() {
		let dispatcher = build_test_dispatcher(2, "t1", Arc::new(FakeProvider::default()));
		let service = service();
		let result = dispatcher.run(0, |task| service.operation(task)).await;

		assert!(result.is_empty());
		assert!(result.is_complete(0));
	}

	#[tokio::test]
	async fn peak_concurrency_never_exceeds_capacity() {
		let dispatcher = build_test_dispatcher(3, "t1", Arc::new(FakeProvider::default()));
		let service = service();
		let result = dispatcher.run(20, |task| service.operation(task)).await;

		assert_eq!(result.succeeded(), 20);
		assert!(service.peak_in_flight() <= 3);
		assert_eq!(service.peak_in_flight(), 3);
		assert_eq!(dispatcher.metrics().peak_in_flight(), 3);
		assert_eq!(dispatcher.metrics().in_flight(), 0);
	}

	#[tokio::test]
	async fn unauthorized_attempt_renews_once_and_retries() {
		let provider = Arc::new(FakeProvider::sequence(["t2"]));
		let dispatcher = build_test_dispatcher(1, "t1", provider.clone());
		let service = Arc::new(FakeService::new().script(0, [Step::Unauthorized]));
		let result = dispatcher.run(1, |task| service.operation(task)).await;
		let report = &result.reports()[0];

		assert!(report.outcome.is_success());
		assert_eq!(report.attempts, 2);
		assert_eq!(provider.calls(), 1);
		assert_eq!(
			service.calls(),
			vec![(TaskId::new(0), "t1".to_owned()), (TaskId::new(0), "t2".to_owned())]
		);
		assert_eq!(dispatcher.credential().token().expose(), "t2");
		assert_eq!(dispatcher.credential().generation(), 1);
	}

	#[tokio::test]
	async fn failed_retry_keeps_both_causes() {
		let provider = Arc::new(FakeProvider::sequence(["t2"]));
		let dispatcher = build_test_dispatcher(1, "t1", provider.clone());
		let service = Arc::new(FakeService::new().script(0, [Step::Unauthorized, Step::Fault]));
		let result = dispatcher.run(1, |task| service.operation(task)).await;
		let err = result.reports()[0].outcome.error().expect("Task should have failed.");

		assert!(matches!(err, TaskError::RenewalExhausted { .. }));
		assert!(err.first_cause().is_some_and(OperationError::is_unauthorized));
		assert_eq!(err.retry_cause().and_then(OperationError::status), Some(500));
		assert_eq!(provider.calls(), 1);
		assert_eq!(service.calls_for(0), 2);
	}

	#[tokio::test]
	async fn second_unauthorized_is_not_retried_again() {
		let provider = Arc::new(FakeProvider::sequence(["t2", "t3"]));
		let dispatcher = build_test_dispatcher(1, "t1", provider.clone());
		let service =
			Arc::new(FakeService::new().script(0, [Step::Unauthorized, Step::Unauthorized]));
		let result = dispatcher.run(1, |task| service.operation(task)).await;
		let err = result.reports()[0].outcome.error().expect("Task should have failed.");

		assert!(err.retry_cause().is_some_and(OperationError::is_unauthorized));
		assert_eq!(provider.calls(), 1);
		assert_eq!(service.calls_for(0), 2);
	}

	#[tokio::test]
	async fn provider_failure_during_renewal_fails_the_task() {
		let provider = Arc::new(FakeProvider::failing(503));
		let dispatcher = build_test_dispatcher(1, "t1", provider.clone());
		let service = Arc::new(FakeService::new().script(0, [Step::Unauthorized]));
		let result = dispatcher.run(1, |task| service.operation(task)).await;
		let report = &result.reports()[0];
		let err = report.outcome.error().expect("Task should have failed.");

		assert!(matches!(err.renewal_cause(), Some(AuthFetchError::Status { status: 503, .. })));
		assert!(err.first_cause().is_some_and(OperationError::is_unauthorized));
		assert_eq!(report.attempts, 1);
		assert_eq!(service.calls_for(0), 1);
		assert_eq!(dispatcher.credential().token().expose(), "t1");
	}

	#[tokio::test]
	async fn non_auth_failure_is_not_retried() {
		let provider = Arc::new(FakeProvider::sequence(["t2"]));
		let dispatcher = build_test_dispatcher(2, "t1", provider.clone());
		let service = Arc::new(FakeService::new().script(1, [Step::Fault]));
		let result = dispatcher.run(3, |task| service.operation(task)).await;
		let failures = result.failures().collect::<Vec<_>>();

		assert_eq!(failures.len(), 1);
		assert_eq!(failures[0].0, TaskId::new(1));
		assert!(matches!(failures[0].1, TaskError::Operation { .. }));
		assert_eq!(provider.calls(), 0);
		assert_eq!(service.calls_for(1), 1);
	}

	#[tokio::test]
	async fn renewed_token_is_visible_to_later_tasks() {
		let provider = Arc::new(FakeProvider::sequence(["t2"]));
		let dispatcher = build_test_dispatcher(1, "t1", provider.clone());
		let service = Arc::new(FakeService::new().accepting("t2"));
		let result = dispatcher.run(4, |task| service.operation(task)).await;
		let calls = service.calls();

		assert_eq!(result.succeeded(), 4);
		assert_eq!(provider.calls(), 1);
		assert_eq!(calls.len(), 5);
		assert_eq!(calls[0].1, "t1");
		assert_eq!(calls[1], (calls[0].0, "t2".to_owned()));
		assert!(calls[1..].iter().all(|(_, token)| token == "t2"));
	}

	#[tokio::test]
	async fn ten_tasks_with_two_rejections() {
		let provider = Arc::new(FakeProvider::sequence(["t2", "t3"]));
		let dispatcher = build_test_dispatcher(3, "t1", provider.clone());
		let service = Arc::new(
			FakeService::new().script(2, [Step::Unauthorized]).script(5, [Step::Unauthorized]),
		);
		let result = dispatcher.run(10, |task| service.operation(task)).await;

		assert!(result.is_complete(10));
		assert_eq!(result.succeeded(), 10);
		assert_eq!(result.failed(), 0);
		assert_eq!(provider.calls(), 2);
		assert!(service.peak_in_flight() <= 3);
		assert_eq!(service.calls_for(2), 2);
		assert_eq!(service.calls_for(5), 2);
		assert_eq!(dispatcher.metrics().invocations(), 12);
	}

	#[tokio::test]
	async fn single_flight_coalesces_concurrent_renewals() {
		let provider = Arc::new(FakeProvider::sequence(["t2"]));
		let dispatcher = build_test_dispatcher(4, "t1", provider.clone())
			.with_renewal_policy(RenewalPolicy::SingleFlight);
		let service = Arc::new(FakeService::new().accepting("t2"));
		let result = dispatcher.run(4, |task| service.operation(task)).await;

		assert_eq!(result.succeeded(), 4);
		assert_eq!(provider.calls(), 1);
		assert_eq!(dispatcher.metrics().coalesced_renewals(), 3);
		assert_eq!(dispatcher.credential().generation(), 1);
	}

	#[tokio::test]
	async fn per_task_renewal_renews_for_every_failure() {
		let provider = Arc::new(FakeProvider::sequence(["t2"]));
		let dispatcher = build_test_dispatcher(4, "t1", provider.clone());
		let service = Arc::new(FakeService::new().accepting("t2"));
		let result = dispatcher.run(4, |task| service.operation(task)).await;

		assert_eq!(result.succeeded(), 4);
		assert_eq!(provider.calls(), 4);
		assert_eq!(dispatcher.metrics().coalesced_renewals(), 0);
		assert_eq!(dispatcher.credential().token().expose(), "t2");
	}

	#[tokio::test]
	async fn cancelled_batch_invokes_nothing() {
		let cancel = CancellationToken::new();
		let dispatcher = build_test_dispatcher(2, "t1", Arc::new(FakeProvider::default()))
			.with_cancellation(cancel.clone());
		let service = service();

		cancel.cancel();

		let result = dispatcher.run(5, |task| service.operation(task)).await;

		assert!(result.is_complete(5));
		assert_eq!(result.cancelled(), 5);
		assert!(result.reports().iter().all(|r| r.attempts == 0));
		assert!(service.calls().is_empty());
	}

	#[tokio::test]
	async fn cancellation_mid_batch_lets_running_tasks_finish() {
		let cancel = CancellationToken::new();
		let dispatcher = build_test_dispatcher(2, "t1", Arc::new(FakeProvider::default()))
			.with_cancellation(cancel.clone());
		let service = service();
		let mut reports = pin!(dispatcher.stream(6, |task| service.operation(task)));
		let first = reports.next().await.expect("First report should arrive.");

		cancel.cancel();

		let mut result = BatchResult::with_capacity(6);

		result.push(first);

		while let Some(report) = reports.next().await {
			result.push(report);
		}

		let started = service.calls().into_iter().map(|(task, _)| task).collect::<Vec<_>>();

		assert!(result.is_complete(6));
		assert_eq!(started.len(), 2);
		assert_eq!(result.succeeded(), 2);
		assert_eq!(result.cancelled(), 4);
		assert_eq!(dispatcher.metrics().invocations(), 2);
		assert_eq!(dispatcher.metrics().in_flight(), 0);

		for report in result.reports() {
			if started.contains(&report.task) {
				assert!(report.outcome.is_success());
				assert_eq!(report.attempts, 1);
			} else {
				assert!(matches!(report.outcome.error(), Some(TaskError::Cancelled)));
				assert_eq!(report.attempts, 0);
			}
		}
	}

	#[cfg(feature = "tracing")]
	#[tokio::test]
	async fn state_transitions_are_logged() {
		let logs = LogCapture::default();
		let subscriber = tracing_subscriber::fmt()
			.with_max_level(tracing::Level::TRACE)
			.with_ansi(false)
			.with_writer(logs.clone())
			.finish();
		let _default = tracing::subscriber::set_default(subscriber);
		let dispatcher = build_test_dispatcher(1, "t1", Arc::new(FakeProvider::sequence(["t2"])));
		let service = Arc::new(FakeService::new().script(0, [Step::Unauthorized]));
		let result = dispatcher.run(1, |task| service.operation(task)).await;
		let logs = logs.contents();

		assert_eq!(result.succeeded(), 1);

		for (from, to) in [
			("pending", "running"),
			("running", "auth_failed"),
			("auth_failed", "renewing"),
			("renewing", "retrying"),
			("retrying", "succeeded"),
		] {
			assert!(logs.contains(&format!("from={from} to={to}")), "missing {from} -> {to}: {logs}");
		}
	}

	#[tokio::test]
	async fn progress_is_incremental_and_monotonic() {
		let dispatcher = build_test_dispatcher(2, "t1", Arc::new(FakeProvider::default()));
		let service = service();
		let mut seen = Vec::new();
		let result = dispatcher
			.run_with_progress(6, |task| service.operation(task), |report| {
				seen.push((report.completed, report.total));
			})
			.await;

		assert_eq!(result.len(), 6);
		assert_eq!(seen, (1..=6).map(|n| (n, 6)).collect::<Vec<_>>());
	}

	#[tokio::test]
	async fn stream_yields_reports_as_tasks_finish() {
		let dispatcher = build_test_dispatcher(1, "t1", Arc::new(FakeProvider::default()));
		let service = service();
		let mut reports = pin!(dispatcher.stream(3, |task| service.operation(task)));
		let first = reports.next().await.expect("First report should arrive.");

		assert_eq!(first.completed, 1);
		assert!(service.calls().len() < 3);
		assert_eq!(reports.count().await, 2);
	}
}
