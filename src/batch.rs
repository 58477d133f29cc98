//! Batch runner: fetch the initial credential, dispatch every task, summarize.

// self
use crate::{
	_prelude::*,
	auth::{Principal, SharedCredential},
	dispatch::{BatchResult, Dispatcher, RenewalPolicy, TaskId, TaskReport},
	obs::{self, CallKind, CallOutcome, CallSpan},
	operation::RemoteOperation,
	provider::CredentialProvider,
};

/// Totals reported once a batch has finished.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
	/// Tasks submitted.
	pub total: usize,
	/// Tasks that succeeded.
	pub succeeded: usize,
	/// Tasks that failed, cancelled ones included.
	pub failed: usize,
	/// Tasks cancelled before they started.
	pub cancelled: usize,
	/// Credential provider calls made to renew the token mid-batch.
	pub renewals: u64,
	/// Renewals satisfied by another task's fresh credential.
	pub coalesced_renewals: u64,
	/// Remote operation invocations, retries included.
	pub invocations: u64,
	/// Highest number of invocations observed in flight at once.
	pub peak_in_flight: usize,
}
impl BatchSummary {
	fn collect(dispatcher: &Dispatcher, task_count: usize, result: &BatchResult) -> Self {
		let metrics = dispatcher.metrics();

		Self {
			total: task_count,
			succeeded: result.succeeded(),
			failed: result.failed(),
			cancelled: result.cancelled(),
			renewals: metrics.provider_calls(),
			coalesced_renewals: metrics.coalesced_renewals(),
			invocations: metrics.invocations(),
			peak_in_flight: metrics.peak_in_flight(),
		}
	}
}

/// Outcomes and totals of one finished batch.
#[derive(Debug)]
pub struct BatchRun {
	/// Per-task outcomes in completion order.
	pub result: BatchResult,
	/// Aggregated totals.
	pub summary: BatchSummary,
}

/// Runs a whole batch: initial credential fetch, bounded dispatch, summary.
///
/// The initial fetch is the only step that can abort the run. Once it succeeds every task
/// reaches a terminal outcome and per-task failures are reported, never raised.
#[derive(Clone)]
pub struct BatchRunner {
	provider: Arc<dyn CredentialProvider>,
	principal: Principal,
	capacity: NonZeroUsize,
	renewal: RenewalPolicy,
	cancellation: CancellationToken,
}
impl BatchRunner {
	/// Creates a runner allowing at most `capacity` concurrent invocations.
	pub fn new(
		provider: Arc<dyn CredentialProvider>,
		principal: Principal,
		capacity: NonZeroUsize,
	) -> Self {
		Self {
			provider,
			principal,
			capacity,
			renewal: RenewalPolicy::default(),
			cancellation: CancellationToken::new(),
		}
	}

	/// Selects how concurrent renewals are coordinated.
	pub fn with_renewal_policy(mut self, policy: RenewalPolicy) -> Self {
		self.renewal = policy;

		self
	}

	/// Wires a cancellation token through to the dispatcher.
	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancellation = token;

		self
	}

	/// Fetches the initial credential and builds the dispatcher around it.
	pub async fn start(&self) -> Result<Dispatcher> {
		const KIND: CallKind = CallKind::TokenFetch;

		let span = CallSpan::new(KIND, "start_batch");

		obs::record_call_outcome(KIND, CallOutcome::Attempt);

		let result = span.instrument(self.provider.fetch(&self.principal)).await;

		obs::record_call_outcome(KIND, CallOutcome::of(&result));

		let token = result.map_err(Error::Startup)?;

		Ok(Dispatcher::new(
			self.capacity,
			SharedCredential::new(token),
			self.provider.clone(),
			self.principal.clone(),
		)
		.with_renewal_policy(self.renewal)
		.with_cancellation(self.cancellation.clone()))
	}

	/// Runs `task_count` tasks built by `make_operation`.
	pub async fn run<F, O>(&self, task_count: usize, make_operation: F) -> Result<BatchRun>
	where
		F: FnMut(TaskId) -> O,
		O: RemoteOperation,
	{
		self.run_with_progress(task_count, make_operation, |_| {}).await
	}

	/// Runs `task_count` tasks, forwarding each finished task's report to `progress`.
	pub async fn run_with_progress<F, O, P>(
		&self,
		task_count: usize,
		make_operation: F,
		progress: P,
	) -> Result<BatchRun>
	where
		F: FnMut(TaskId) -> O,
		O: RemoteOperation,
		P: FnMut(&TaskReport),
	{
		let dispatcher = self.start().await?;
		let result = dispatcher.run_with_progress(task_count, make_operation, progress).await;
		let summary = BatchSummary::collect(&dispatcher, task_count, &result);

		Ok(BatchRun { result, summary })
	}
}
impl Debug for BatchRunner {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BatchRunner")
			.field("principal", &self.principal)
			.field("capacity", &self.capacity)
			.field("renewal", &self.renewal)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, error::AuthFetchError};

	fn runner(provider: Arc<FakeProvider>, capacity: usize) -> BatchRunner {
		BatchRunner::new(
			provider,
			test_principal(),
			NonZeroUsize::new(capacity).expect("Test capacity must be non-zero."),
		)
	}

	#[tokio::test]
	async fn startup_failure_runs_no_tasks() {
		let provider = Arc::new(FakeProvider::failing(401));
		let service = Arc::new(FakeService::new());
		let mut built = 0;
		let err = runner(provider.clone(), 2)
			.run(5, |task| {
				built += 1;

				service.operation(task)
			})
			.await
			.expect_err("Initial fetch failure must abort the batch.");

		assert!(matches!(err, Error::Startup(AuthFetchError::Status { status: 401, .. })));
		assert_eq!(built, 0);
		assert!(service.calls().is_empty());
		assert_eq!(provider.calls(), 1);
	}

	#[tokio::test]
	async fn summary_counts_renewals_and_invocations() {
		let provider = Arc::new(FakeProvider::sequence(["t1", "t2", "t3"]));
		let service = Arc::new(
			FakeService::new().script(2, [Step::Unauthorized]).script(5, [Step::Unauthorized]),
		);
		let mut progress = Vec::new();
		let run = runner(provider.clone(), 3)
			.run_with_progress(10, |task| service.operation(task), |report| {
				progress.push(report.completed)
			})
			.await
			.expect("Batch should start with the first scripted token.");

		assert_eq!(
			run.summary,
			BatchSummary {
				total: 10,
				succeeded: 10,
				failed: 0,
				cancelled: 0,
				renewals: 2,
				coalesced_renewals: 0,
				invocations: 12,
				peak_in_flight: 3,
			}
		);
		assert_eq!(progress, (1..=10).collect::<Vec<_>>());
		assert_eq!(provider.calls(), 3);
		assert!(run.result.is_complete(10));
		assert_eq!(service.calls().len(), 12);
	}

	#[tokio::test]
	async fn cancellation_is_forwarded_to_the_dispatcher() {
		let cancel = CancellationToken::new();
		let service = Arc::new(FakeService::new());

		cancel.cancel();

		let run = runner(Arc::new(FakeProvider::sequence(["t1"])), 2)
			.with_cancellation(cancel)
			.run(3, |task| service.operation(task))
			.await
			.expect("Batch should start before observing cancellation.");

		assert_eq!(run.summary.cancelled, 3);
		assert_eq!(run.summary.invocations, 0);
	}
}
