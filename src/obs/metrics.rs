// self
use crate::{
	dispatch::{TaskOutcome, TaskReport},
	obs::{CallKind, CallOutcome},
};

/// Records a call outcome via the global metrics recorder (when enabled).
pub fn record_call_outcome(kind: CallKind, outcome: CallOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"signing_batch_call_total",
			"call" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Records one finished task, labeled by its outcome and by how its first attempt failed.
pub fn record_task_outcome(report: &TaskReport) {
	let (outcome, first_attempt) = task_labels(report);

	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"signing_batch_task_total",
			"outcome" => outcome,
			"first_attempt" => first_attempt
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (outcome, first_attempt);
	}
}

// A success after one attempt has no failure to report; after two, the first was unauthorized.
fn task_labels(report: &TaskReport) -> (&'static str, &'static str) {
	match &report.outcome {
		TaskOutcome::Succeeded(_) if report.attempts > 1 => ("succeeded", "unauthorized"),
		TaskOutcome::Succeeded(_) => ("succeeded", "ok"),
		TaskOutcome::Failed(err) => (
			err.as_str(),
			err.first_cause().map_or("not_started", |cause| cause.kind().as_str()),
		),
	}
}
