// self
#[cfg(feature = "tracing")] use crate::dispatch::TaskOutcome;
use crate::{
	_prelude::*,
	dispatch::{TaskId, TaskReport, TaskState},
	obs::CallKind,
};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedCall<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedCall<F> = F;

/// Span wrapping one outbound call.
#[derive(Clone, Debug)]
pub struct CallSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl CallSpan {
	/// Creates a span for a call that is not tied to a task (the initial token fetch).
	pub fn new(kind: CallKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("signing_batch.call", call = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Creates a span for a call made on behalf of `task`.
	pub fn for_task(kind: CallKind, stage: &'static str, task: TaskId) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"signing_batch.call",
				call = kind.as_str(),
				stage,
				task = task.get()
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage, task);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedCall<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits one event per finished task: debug for successes, warn for failures.
pub fn task_finished(report: &TaskReport) {
	#[cfg(feature = "tracing")]
	{
		match &report.outcome {
			TaskOutcome::Succeeded(_) => tracing::debug!(
				task = report.task.get(),
				completed = report.completed,
				total = report.total,
				attempts = report.attempts,
				"signing task succeeded"
			),
			TaskOutcome::Failed(err) => tracing::warn!(
				task = report.task.get(),
				completed = report.completed,
				total = report.total,
				attempts = report.attempts,
				error = %err,
				cause = ?err.first_cause(),
				"signing task failed"
			),
		}
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = report;
	}
}

/// Emits one trace event per task state change.
pub fn task_transition(task: TaskId, from: TaskState, to: TaskState) {
	#[cfg(feature = "tracing")]
	{
		tracing::trace!(task = task.get(), from = %from, to = %to, "task state changed");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (task, from, to);
	}
}

/// Emits the batch start event.
pub fn batch_started(total: usize, capacity: usize) {
	#[cfg(feature = "tracing")]
	{
		tracing::info!(total, capacity, "signing batch started");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (total, capacity);
	}
}

/// Emits the batch completion event.
pub fn batch_finished(total: usize, succeeded: usize, failed: usize) {
	#[cfg(feature = "tracing")]
	{
		tracing::info!(total, succeeded, failed, "signing batch finished");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (total, succeeded, failed);
	}
}
