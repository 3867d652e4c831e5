//! Quote types for the route-selection step.

use serde::{Deserialize, Serialize};

use crate::{now_secs, Address};

/// Request sent to solver backends when pricing an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
	pub source_chain: String,
	pub source_asset: String,
	pub source_amount: u128,
	pub destination_chain_id: u64,
	pub destination_address: Option<Address>,
}

/// A candidate execution path returned by a solver backend.
///
/// Quotes are advisory and time-limited: an expired quote must never be
/// executed, the caller has to re-quote first. The service does not
/// re-validate staleness itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
	/// Solver/protocol identifier, e.g. "near-intents" or "cctp".
	pub solver: String,
	/// Estimated fee in source-asset smallest units.
	pub fee: u128,
	/// Estimated amount delivered on the destination chain.
	pub destination_amount: u128,
	/// Estimated time to completion, seconds.
	pub eta_secs: u64,
	/// Historical success rate of this solver, 0.0..=1.0.
	pub reliability: f64,
	/// Seconds after `quoted_at` during which the quote may be executed.
	pub time_limit_secs: u64,
	/// Unix timestamp at which the quote was issued.
	pub quoted_at: u64,
}

impl Quote {
	/// Whether the quote's time limit has elapsed at `now`.
	pub fn is_expired_at(&self, now: u64) -> bool {
		now > self.quoted_at.saturating_add(self.time_limit_secs)
	}

	pub fn is_expired(&self) -> bool {
		self.is_expired_at(now_secs())
	}
}
