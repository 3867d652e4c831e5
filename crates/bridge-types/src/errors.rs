//! The bridge failure taxonomy.
//!
//! Component failures cross boundaries as values of [`BridgeError`] so the
//! state machine can decide retryability uniformly; only programming errors
//! propagate as panics.

use thiserror::Error;

use crate::{BridgeStage, RetryCheckpoint};

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
	/// Remote key service unreachable or returned malformed key material.
	/// Retryable unless `malformed`, which is terminal for that
	/// (account, path) pairing.
	#[error("Address derivation failed: {reason}")]
	DerivationFailed { reason: String, malformed: bool },

	/// Invalid or incomplete intent data. Requires caller correction.
	#[error("Transaction build failed: {0}")]
	BuildFailed(String),

	/// Polling ceiling reached while the remote signer may still complete
	/// out-of-band; the handle supports re-attachment.
	#[error("Signature request {handle} timed out")]
	SignatureTimeout { handle: String },

	/// Explicit rejection by the signer; terminal for the attempt.
	#[error("Signature rejected: {0}")]
	SignatureRejected(String),

	/// The signer returned a signature that does not recover to the expected
	/// address. Distinct from rejection and never silently retried with the
	/// same inputs.
	#[error("Signature does not recover to expected signer {expected}")]
	InvalidSignature { expected: String },

	/// Network/RPC failure while submitting; retryable after the
	/// idempotent-resume check.
	#[error("Broadcast failed: {0}")]
	BroadcastFailed(String),

	/// On-chain execution reverted; a blind retry would revert again.
	#[error("Transaction {tx_hash} reverted on-chain")]
	TransactionReverted { tx_hash: String },

	/// Attestation did not arrive within the polling ceiling. The burn
	/// message is checkpointed; retry resumes without re-burning.
	#[error("Attestation not available after {polls} polls")]
	AttestationTimeout { polls: u32 },

	#[error("Insufficient liquidity: need {needed}, have {available}")]
	InsufficientLiquidity { needed: u128, available: u128 },

	#[error("Insufficient allowance: need {needed}, approved {approved}")]
	InsufficientAllowance { needed: u128, approved: u128 },

	/// The selected quote's time limit elapsed before execution.
	#[error("Quote from {solver} expired")]
	QuoteExpired { solver: String },

	/// A stage-log append observed a predecessor other than the expected one.
	#[error("Invalid transition from {from} to {to}")]
	InvalidTransition { from: BridgeStage, to: BridgeStage },

	/// The stored intent moved on since the caller observed it; another
	/// pipeline owns it and the caller must not advance it.
	#[error("Stale stage: expected {expected}, found {found}")]
	StaleStage { expected: String, found: String },

	#[error("Intent not found")]
	IntentNotFound,

	/// Cancellation requested after a side effect had already occurred.
	#[error("Cannot cancel intent in stage {stage}")]
	CancellationRefused { stage: BridgeStage },

	#[error("Storage error: {0}")]
	Storage(String),

	#[error("Configuration error: {0}")]
	Config(String),

	#[error("Network error: {0}")]
	Network(String),

	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

impl BridgeError {
	/// Whether the failure can be retried without caller intervention.
	pub fn is_retryable(&self) -> bool {
		match self {
			BridgeError::DerivationFailed { malformed, .. } => !malformed,
			BridgeError::SignatureTimeout { .. }
			| BridgeError::BroadcastFailed(_)
			| BridgeError::AttestationTimeout { .. }
			| BridgeError::QuoteExpired { .. }
			| BridgeError::Network(_) => true,
			_ => false,
		}
	}

	/// Where a retry of this failure resumes, if it resumes at all.
	///
	/// User-actionable failures (liquidity, allowance) restart from quoting
	/// once the user has corrected the condition; signature and broadcast
	/// failures rebuild the transaction; attestation timeouts resume at
	/// minting with the persisted checkpoint.
	pub fn retry_checkpoint(&self) -> Option<RetryCheckpoint> {
		match self {
			BridgeError::DerivationFailed { malformed: false, .. } => {
				Some(RetryCheckpoint::Quoting)
			}
			BridgeError::SignatureTimeout { .. }
			| BridgeError::SignatureRejected(_)
			| BridgeError::InvalidSignature { .. }
			| BridgeError::BroadcastFailed(_)
			| BridgeError::TransactionReverted { .. } => Some(RetryCheckpoint::Building),
			BridgeError::AttestationTimeout { .. } => Some(RetryCheckpoint::Minting),
			BridgeError::QuoteExpired { .. }
			| BridgeError::InsufficientLiquidity { .. }
			| BridgeError::InsufficientAllowance { .. } => Some(RetryCheckpoint::Quoting),
			BridgeError::Network(_) => Some(RetryCheckpoint::Building),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn malformed_key_is_terminal() {
		let err = BridgeError::DerivationFailed {
			reason: "key length 33".into(),
			malformed: true,
		};
		assert!(!err.is_retryable());
		assert!(err.retry_checkpoint().is_none());
	}

	#[test]
	fn attestation_timeout_resumes_at_minting() {
		let err = BridgeError::AttestationTimeout { polls: 10 };
		assert!(err.is_retryable());
		assert_eq!(err.retry_checkpoint(), Some(RetryCheckpoint::Minting));
	}

	#[test]
	fn signature_rejection_needs_fresh_attempt() {
		let err = BridgeError::SignatureRejected("user declined".into());
		assert!(!err.is_retryable());
		// A fresh attempt rebuilds and re-signs.
		assert_eq!(err.retry_checkpoint(), Some(RetryCheckpoint::Building));
	}

	#[test]
	fn expired_quote_restarts_from_quoting() {
		let err = BridgeError::QuoteExpired { solver: "x".into() };
		assert_eq!(err.retry_checkpoint(), Some(RetryCheckpoint::Quoting));
	}
}
