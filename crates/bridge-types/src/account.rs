//! Account and address types shared across the bridge pipeline.
//!
//! Addresses are kept as raw bytes so the same type can carry source-chain
//! identities (NEAR account ids hash to nothing useful here) and 20-byte
//! destination-chain addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Destination-chain address stored as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub Vec<u8>);

impl Address {
	/// Parses a 20-byte EVM address from a hex string, with or without
	/// the 0x prefix.
	pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
		let bytes = hex::decode(s.trim_start_matches("0x"))?;
		Ok(Address(bytes))
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn is_evm(&self) -> bool {
		self.0.len() == 20
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(&self.0))
	}
}

/// Source-chain account identity, e.g. "alice.near" or a Stacks principal.
///
/// Kept as an opaque string; the derivation service treats it as part of the
/// key-derivation input and never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceIdentity(pub String);

impl fmt::Display for SourceIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// MPC derivation path, one per destination chain and purpose (e.g. "base-1").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivationPath(pub String);

impl fmt::Display for DerivationPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A destination-chain address derived from an MPC public key.
///
/// Deterministic for a fixed (account, path) pair; the checksummed form is
/// what gets surfaced to callers and embedded in transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAddress {
	/// The source identity the key was derived for.
	pub account_id: SourceIdentity,
	/// The derivation path used.
	pub path: DerivationPath,
	/// The resulting 20-byte destination address.
	pub address: Address,
	/// EIP-55 checksummed string form of the address.
	pub checksummed: String,
}
