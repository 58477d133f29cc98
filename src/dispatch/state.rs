// self
use crate::_prelude::*;

/// Lifecycle of one task inside the dispatcher.
///
/// ```text
/// Pending -> Running -> Succeeded
///                    -> Failed
///                    -> AuthFailed -> Renewing -> Failed
///                                              -> Retrying -> Succeeded | Failed
/// Pending -> Failed (cancelled before a permit was acquired)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
	/// Waiting for a permit.
	Pending,
	/// First attempt in progress.
	Running,
	/// First attempt was rejected as unauthorized.
	AuthFailed,
	/// Credential renewal in progress.
	Renewing,
	/// Second attempt in progress with the renewed credential.
	Retrying,
	/// Terminal success.
	Succeeded,
	/// Terminal failure.
	Failed,
}
impl TaskState {
	/// Returns `true` for states that accept no further transitions.
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Succeeded | Self::Failed)
	}

	/// Returns `true` when moving from `self` to `next` is a legal step.
	pub const fn can_transition(self, next: Self) -> bool {
		matches!(
			(self, next),
			(Self::Pending, Self::Running | Self::Failed)
				| (Self::Running, Self::Succeeded | Self::AuthFailed | Self::Failed)
				| (Self::AuthFailed, Self::Renewing)
				| (Self::Renewing, Self::Retrying | Self::Failed)
				| (Self::Retrying, Self::Succeeded | Self::Failed)
		)
	}

	/// Validates and performs one step.
	pub fn transition(self, next: Self) -> Result<Self, InvalidTransition> {
		if self.can_transition(next) { Ok(next) } else { Err(InvalidTransition { from: self, to: next }) }
	}

	pub(crate) fn advance(&mut self, next: Self) {
		debug_assert!(self.can_transition(next), "illegal task transition {self:?} -> {next:?}");

		*self = next;
	}

	/// Stable label used in logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Running => "running",
			Self::AuthFailed => "auth_failed",
			Self::Renewing => "renewing",
			Self::Retrying => "retrying",
			Self::Succeeded => "succeeded",
			Self::Failed => "failed",
		}
	}
}
impl Display for TaskState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Rejected [`TaskState`] step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ThisError)]
#[error("Task cannot move from {from} to {to}.")]
pub struct InvalidTransition {
	/// State the task was in.
	pub from: TaskState,
	/// Requested state.
	pub to: TaskState,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn renewal_path_is_legal() {
		let state = TaskState::Pending
			.transition(TaskState::Running)
			.and_then(|s| s.transition(TaskState::AuthFailed))
			.and_then(|s| s.transition(TaskState::Renewing))
			.and_then(|s| s.transition(TaskState::Retrying))
			.and_then(|s| s.transition(TaskState::Succeeded))
			.expect("Renew-and-retry path should be accepted.");

		assert!(state.is_terminal());
	}

	#[test]
	fn terminal_states_reject_everything() {
		for next in [TaskState::Pending, TaskState::Running, TaskState::Retrying, TaskState::Failed] {
			assert_eq!(
				TaskState::Succeeded.transition(next),
				Err(InvalidTransition { from: TaskState::Succeeded, to: next })
			);
			assert!(TaskState::Failed.transition(next).is_err());
		}
	}

	#[test]
	fn retry_requires_renewal_first() {
		assert!(!TaskState::Running.can_transition(TaskState::Retrying));
		assert!(!TaskState::AuthFailed.can_transition(TaskState::Retrying));
		assert!(!TaskState::Retrying.can_transition(TaskState::Renewing));
		assert!(TaskState::Pending.can_transition(TaskState::Failed));
		assert_eq!(
			TaskState::Running.transition(TaskState::Retrying).map_err(|e| e.to_string()),
			Err("Task cannot move from running to retrying.".into())
		);
	}
}
