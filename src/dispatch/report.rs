// std
use std::collections::HashSet;
// self
use crate::{
	_prelude::*,
	dispatch::TaskId,
	error::TaskError,
	operation::Receipt,
};

/// Terminal outcome of one task.
#[derive(Debug)]
pub enum TaskOutcome {
	/// The first attempt or the post-renewal retry succeeded.
	Succeeded(Receipt),
	/// The task failed; the error carries every cause.
	Failed(TaskError),
}
impl TaskOutcome {
	/// Returns `true` for [`TaskOutcome::Succeeded`].
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Succeeded(_))
	}

	/// Failure details, when the task failed.
	pub fn error(&self) -> Option<&TaskError> {
		match self {
			Self::Failed(err) => Some(err),
			Self::Succeeded(_) => None,
		}
	}
}

/// Progress record yielded once per task, in completion order.
#[derive(Debug)]
pub struct TaskReport {
	/// Task that finished.
	pub task: TaskId,
	/// Number of tasks finished so far, this one included.
	pub completed: usize,
	/// Number of tasks in the batch.
	pub total: usize,
	/// Remote operation invocations made by this task (0, 1 or 2).
	pub attempts: u8,
	/// Terminal outcome.
	pub outcome: TaskOutcome,
}

/// Per-task outcomes of one batch, in completion order.
#[derive(Debug, Default)]
pub struct BatchResult {
	reports: Vec<TaskReport>,
}
impl BatchResult {
	/// Creates an empty result sized for `capacity` tasks.
	pub fn with_capacity(capacity: usize) -> Self {
		Self { reports: Vec::with_capacity(capacity) }
	}

	/// Records one finished task.
	pub fn push(&mut self, report: TaskReport) {
		self.reports.push(report);
	}

	/// Number of recorded outcomes.
	pub fn len(&self) -> usize {
		self.reports.len()
	}

	/// Returns `true` when no outcome has been recorded.
	pub fn is_empty(&self) -> bool {
		self.reports.is_empty()
	}

	/// Number of succeeded tasks.
	pub fn succeeded(&self) -> usize {
		self.reports.iter().filter(|r| r.outcome.is_success()).count()
	}

	/// Number of failed tasks, cancelled ones included.
	pub fn failed(&self) -> usize {
		self.len() - self.succeeded()
	}

	/// Number of tasks cancelled before they started.
	pub fn cancelled(&self) -> usize {
		self.failures().filter(|(_, err)| matches!(err, TaskError::Cancelled)).count()
	}

	/// Reports in completion order.
	pub fn reports(&self) -> &[TaskReport] {
		&self.reports
	}

	/// Failed tasks with their errors, in completion order.
	pub fn failures(&self) -> impl Iterator<Item = (TaskId, &TaskError)> {
		self.reports.iter().filter_map(|r| r.outcome.error().map(|err| (r.task, err)))
	}

	/// Outcome recorded for `task`, if any.
	pub fn outcome(&self, task: TaskId) -> Option<&TaskOutcome> {
		self.reports.iter().find(|r| r.task == task).map(|r| &r.outcome)
	}

	/// Consumes the result, returning the reports.
	pub fn into_reports(self) -> Vec<TaskReport> {
		self.reports
	}

	/// Returns `true` when tasks `0..task_count` each have exactly one outcome.
	pub fn is_complete(&self, task_count: usize) -> bool {
		let mut seen = HashSet::with_capacity(self.len());

		self.len() == task_count
			&& self.reports.iter().all(|r| r.task.get() < task_count && seen.insert(r.task))
	}
}
