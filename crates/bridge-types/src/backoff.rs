//! Bounded retry policy used by every polling loop in the pipeline.
//!
//! Polling (signature status, receipts, attestations) is a bounded loop with
//! an explicit policy and a hard ceiling, never a recursive timer chain.
//! Exceeding the ceiling surfaces as a retryable failure to the caller.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with a cap and a maximum attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
	/// Delay before the second attempt.
	pub initial: Duration,
	/// Multiplier applied per attempt.
	pub multiplier: f64,
	/// Hard cap on any single delay.
	pub max_interval: Duration,
	/// Total number of attempts before giving up.
	pub max_attempts: u32,
}

impl BackoffPolicy {
	/// Fixed-interval variant, used where the remote service polls on a
	/// known cadence (attestation APIs).
	pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
		Self {
			initial: interval,
			multiplier: 1.0,
			max_interval: interval,
			max_attempts,
		}
	}

	/// Delay to wait after the given zero-based attempt, or None once the
	/// attempt budget is exhausted.
	pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
		if attempt + 1 >= self.max_attempts {
			return None;
		}
		let factor = self.multiplier.powi(attempt as i32);
		let delay = self.initial.mul_f64(factor);
		Some(delay.min(self.max_interval))
	}
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self {
			initial: Duration::from_secs(1),
			multiplier: 2.0,
			max_interval: Duration::from_secs(30),
			max_attempts: 5,
		}
	}
}
