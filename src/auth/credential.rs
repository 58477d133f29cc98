//! Shared bearer credential that every in-flight task reads and the renewal path rewrites.
//!
//! A [`SharedCredential`] is cloned into each task; all clones point at the same cell, so a
//! renewal performed by one task is observed by every task that reads the cell afterwards.
//! Writes replace the whole token under an exclusive lock, so readers see either the old or
//! the new value and never a mix. Each write bumps a generation counter which lets the
//! single-flight renewal policy detect that another task already renewed.

// self
use crate::{_prelude::*, auth::Secret};

#[derive(Debug)]
struct CredentialState {
	token: Secret,
	generation: u64,
}

/// Point-in-time copy of the credential taken before an outbound call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialSnapshot {
	/// Token attached to the call.
	pub token: Secret,
	/// Generation the token belongs to; `0` is the token the batch started with.
	pub generation: u64,
}

/// Shared, in-place renewable bearer credential.
#[derive(Clone)]
pub struct SharedCredential(Arc<RwLock<CredentialState>>);
impl SharedCredential {
	/// Creates a cell holding the batch's initial token.
	pub fn new(token: Secret) -> Self {
		Self(Arc::new(RwLock::new(CredentialState { token, generation: 0 })))
	}

	/// Copies the current token and generation.
	pub fn snapshot(&self) -> CredentialSnapshot {
		let state = self.0.read();

		CredentialSnapshot { token: state.token.clone(), generation: state.generation }
	}

	/// Returns the current token.
	pub fn token(&self) -> Secret {
		self.0.read().token.clone()
	}

	/// Returns how many times the token has been replaced.
	pub fn generation(&self) -> u64 {
		self.0.read().generation
	}

	/// Replaces the token in place and returns the new generation.
	///
	/// Installing the same or a newer token more than once is harmless; every call simply
	/// becomes the latest generation.
	pub fn update(&self, token: Secret) -> u64 {
		let mut state = self.0.write();

		state.token = token;
		state.generation += 1;

		state.generation
	}

	/// Returns `true` when both handles point at the same cell.
	pub fn same_cell(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}
impl Debug for SharedCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SharedCredential")
			.field("token", &"<redacted>")
			.field("generation", &self.generation())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::thread;
	// self
	use super::*;

	#[test]
	fn clones_observe_updates() {
		let credential = SharedCredential::new(Secret::new("t1"));
		let holder = credential.clone();

		assert!(holder.same_cell(&credential));
		assert_eq!(holder.snapshot(), CredentialSnapshot { token: Secret::new("t1"), generation: 0 });
		assert_eq!(credential.update(Secret::new("t2")), 1);
		assert_eq!(holder.token().expose(), "t2");
		assert_eq!(holder.generation(), 1);
	}

	#[test]
	fn repeated_updates_are_idempotent_for_readers() {
		let credential = SharedCredential::new(Secret::new("t1"));

		credential.update(Secret::new("t2"));
		credential.update(Secret::new("t2"));

		assert_eq!(credential.token().expose(), "t2");
		assert_eq!(credential.generation(), 2);
	}

	#[test]
	fn concurrent_readers_never_see_partial_tokens() {
		let old = "a".repeat(512);
		let new = "b".repeat(512);
		let credential = SharedCredential::new(Secret::new(old.clone()));
		let readers = (0..4)
			.map(|_| {
				let credential = credential.clone();
				let (old, new) = (old.clone(), new.clone());

				thread::spawn(move || {
					for _ in 0..1_000 {
						let token = credential.token();

						assert!(token.expose() == old || token.expose() == new);
					}
				})
			})
			.collect::<Vec<_>>();

		for _ in 0..100 {
			credential.update(Secret::new(new.clone()));
		}
		for reader in readers {
			reader.join().expect("Reader thread should not panic.");
		}

		assert_eq!(credential.generation(), 100);
	}

	#[test]
	fn debug_redacts_token() {
		let credential = SharedCredential::new(Secret::new("secret-token"));

		assert!(!format!("{credential:?}").contains("secret-token"));
	}
}
