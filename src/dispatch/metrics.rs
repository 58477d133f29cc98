// std
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Thread-safe counters describing one dispatcher's work.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
	invocations: AtomicU64,
	provider_calls: AtomicU64,
	coalesced_renewals: AtomicU64,
	in_flight: AtomicUsize,
	peak_in_flight: AtomicUsize,
}
impl DispatchMetrics {
	/// Returns the number of remote operation invocations, retries included.
	pub fn invocations(&self) -> u64 {
		self.invocations.load(Ordering::Relaxed)
	}

	/// Returns the number of renewal calls made to the credential provider.
	pub fn provider_calls(&self) -> u64 {
		self.provider_calls.load(Ordering::Relaxed)
	}

	/// Returns the number of renewals satisfied by another task's fresh credential.
	pub fn coalesced_renewals(&self) -> u64 {
		self.coalesced_renewals.load(Ordering::Relaxed)
	}

	/// Returns the number of invocations currently in flight.
	pub fn in_flight(&self) -> usize {
		self.in_flight.load(Ordering::SeqCst)
	}

	/// Returns the highest number of invocations observed in flight at once.
	pub fn peak_in_flight(&self) -> usize {
		self.peak_in_flight.load(Ordering::SeqCst)
	}

	pub(crate) fn record_provider_call(&self) {
		self.provider_calls.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_coalesced(&self) {
		self.coalesced_renewals.fetch_add(1, Ordering::Relaxed);
	}

	/// Counts an invocation and tracks it as in flight until the guard drops.
	pub(crate) fn begin_invocation(&self) -> InFlightGuard<'_> {
		self.invocations.fetch_add(1, Ordering::Relaxed);

		let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;

		self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

		InFlightGuard { metrics: self }
	}
}

pub(crate) struct InFlightGuard<'a> {
	metrics: &'a DispatchMetrics,
}
impl Drop for InFlightGuard<'_> {
	fn drop(&mut self) {
		self.metrics.in_flight.fetch_sub(1, Ordering::SeqCst);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn in_flight_guard_tracks_peak() {
		let metrics = DispatchMetrics::default();
		let first = metrics.begin_invocation();
		let second = metrics.begin_invocation();

		assert_eq!(metrics.in_flight(), 2);

		drop(first);
		drop(second);

		let _third = metrics.begin_invocation();

		assert_eq!(metrics.in_flight(), 1);
		assert_eq!(metrics.peak_in_flight(), 2);
		assert_eq!(metrics.invocations(), 3);
	}
}
