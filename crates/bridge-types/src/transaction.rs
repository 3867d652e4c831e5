//! Destination-chain transaction types.
//!
//! An [`UnsignedTransaction`] is the fully-specified skeleton whose digest is
//! sent to the remote signer. The digest itself is computed by the builder
//! crate; this module only defines the data carried between pipeline stages.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::Address;

/// Fee parameters for an EIP-1559 transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
	pub max_fee_per_gas: u128,
	pub max_priority_fee_per_gas: u128,
}

/// Destination-chain transaction skeleton.
///
/// Every field participates in the signing digest; changing any of them
/// invalidates a previously requested signature, so retries that need fresh
/// gas parameters must rebuild and re-sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
	pub to: Address,
	pub value: U256,
	pub data: Vec<u8>,
	pub gas_limit: u64,
	pub fees: FeeEstimate,
	pub nonce: u64,
	pub chain_id: u64,
	/// Canonical signing digest over all of the above (EIP-2718 signing hash).
	pub digest: [u8; 32],
}

/// Transaction hash, raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub Vec<u8>);

impl std::fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "0x{}", hex::encode(&self.0))
	}
}

/// Receipt for a transaction included in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	/// The hash of the transaction.
	pub hash: TransactionHash,
	/// The block number where the transaction was included.
	pub block_number: u64,
	/// Whether the transaction executed successfully.
	pub success: bool,
}
