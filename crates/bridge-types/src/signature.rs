//! Remote signing types.
//!
//! The signer service boundary is request = {digest, derivation path, key
//! version}, response = {r, s, v} or a pending/rejected status. These types
//! mirror that boundary without assuming a particular MPC network.

use alloy_primitives::{PrimitiveSignature, U256};
use serde::{Deserialize, Serialize};

/// Handle to an outstanding remote signing request.
///
/// Handles are stable across process restarts so a coordinator can re-attach
/// to a request it issued earlier instead of asking the signer to authorize
/// the same digest twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestHandle(pub String);

impl std::fmt::Display for RequestHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Output of a completed remote signing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResult {
	/// 32-byte big-endian r component.
	pub r: [u8; 32],
	/// 32-byte big-endian s component.
	pub s: [u8; 32],
	/// Recovery id, 0 or 1.
	pub recovery_id: u8,
}

impl SignatureResult {
	/// Converts to the alloy signature form used for transaction assembly
	/// and address recovery.
	pub fn to_primitive(&self) -> PrimitiveSignature {
		PrimitiveSignature::new(
			U256::from_be_bytes(self.r),
			U256::from_be_bytes(self.s),
			self.recovery_id == 1,
		)
	}
}

/// Status of a signing request as reported by the remote signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignaturePoll {
	/// The signer has not yet produced a signature.
	Pending,
	/// Signing completed.
	Complete(SignatureResult),
	/// The signer (or the user behind it) declined the request.
	Rejected(String),
}
