//! Optional observability helpers for credential and signing calls.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit spans named `signing_batch.call` with the `call` and `stage`
//!   fields, plus one event per finished task.
//! - Enable `metrics` to increment the `signing_batch_call_total` counter for every
//!   attempt/success/failure, labeled by `call` + `outcome`, and the `signing_batch_task_total`
//!   counter once per finished task, labeled by `outcome` + `first_attempt`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Outbound calls observed by the dispatcher and the batch runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
	/// Initial credential fetch before any task starts.
	TokenFetch,
	/// Credential fetch triggered by an unauthorized attempt.
	Renewal,
	/// First attempt of a task.
	Submit,
	/// Second attempt of a task, after renewal.
	Retry,
}
impl CallKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallKind::TokenFetch => "token_fetch",
			CallKind::Renewal => "renewal",
			CallKind::Submit => "submit",
			CallKind::Retry => "retry",
		}
	}
}
impl Display for CallKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallOutcome {
	/// The call is about to be made.
	Attempt,
	/// The call succeeded.
	Success,
	/// The call failed.
	Failure,
}
impl CallOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallOutcome::Attempt => "attempt",
			CallOutcome::Success => "success",
			CallOutcome::Failure => "failure",
		}
	}

	/// Maps a call result onto its outcome label.
	pub fn of<T, E>(result: &Result<T, E>) -> Self {
		if result.is_ok() { CallOutcome::Success } else { CallOutcome::Failure }
	}
}
impl Display for CallOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
