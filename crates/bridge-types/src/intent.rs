//! Intent lifecycle types.
//!
//! An intent is a user's request to move value across chains and trigger a
//! destination action (a ticket purchase, or a mint of bridged funds). Its
//! status advances monotonically through one of two pipelines; the only way
//! back is an explicit retry that resets to a well-defined checkpoint.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Address, SourceIdentity, TransactionHash};

/// Which pipeline an intent executes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeRoute {
	/// Derive a destination address via MPC, sign the destination transaction
	/// remotely, broadcast it directly.
	ChainSignature,
	/// Burn on the source chain, wait for an attestation, mint on the
	/// destination chain.
	BurnAndMint,
}

/// Pipeline stage of an intent.
///
/// The chain-signature route walks `Created → Quoting → AddressDerived →
/// Building → Signing → Broadcasting → Confirming → Completed`; the
/// burn-and-mint route walks `Created → Quoting → Approving → Burning →
/// WaitingAttestation → AttestationReady → Minting → Completed`. `Failed` is
/// reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStage {
	Created,
	Quoting,
	AddressDerived,
	Building,
	Signing,
	Broadcasting,
	Confirming,
	Approving,
	Burning,
	WaitingAttestation,
	AttestationReady,
	Minting,
	Completed,
	Failed,
}

impl BridgeStage {
	/// Terminal stages accept no further transitions.
	pub fn is_terminal(&self) -> bool {
		matches!(self, BridgeStage::Completed | BridgeStage::Failed)
	}

	/// Cancellation is only honored before any on-chain or remote-signing
	/// side effect has occurred.
	pub fn is_cancellable(&self) -> bool {
		matches!(self, BridgeStage::Created | BridgeStage::Quoting)
	}

	/// Forward successors for the given route. `Failed` is always a legal
	/// successor of a non-terminal stage and is not listed here.
	pub fn successors(&self, route: BridgeRoute) -> &'static [BridgeStage] {
		use BridgeStage::*;
		match (self, route) {
			(Created, _) => &[Quoting],
			(Quoting, BridgeRoute::ChainSignature) => &[Quoting, AddressDerived],
			(Quoting, BridgeRoute::BurnAndMint) => &[Quoting, Approving],
			(AddressDerived, _) => &[Building],
			(Building, _) => &[Signing],
			(Signing, _) => &[Broadcasting],
			(Broadcasting, _) => &[Confirming, Completed],
			(Confirming, _) => &[Completed],
			(Approving, _) => &[Burning],
			(Burning, _) => &[WaitingAttestation],
			(WaitingAttestation, _) => &[AttestationReady],
			(AttestationReady, _) => &[Minting],
			(Minting, _) => &[Completed],
			(Completed, _) | (Failed, _) => &[],
		}
	}

	/// Whether moving to `next` is a legal forward transition on `route`.
	pub fn allows(&self, next: BridgeStage, route: BridgeRoute) -> bool {
		if self.is_terminal() {
			return false;
		}
		if next == BridgeStage::Failed {
			return true;
		}
		self.successors(route).contains(&next)
	}
}

impl fmt::Display for BridgeStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			BridgeStage::Created => "created",
			BridgeStage::Quoting => "quoting",
			BridgeStage::AddressDerived => "address_derived",
			BridgeStage::Building => "building",
			BridgeStage::Signing => "signing",
			BridgeStage::Broadcasting => "broadcasting",
			BridgeStage::Confirming => "confirming",
			BridgeStage::Approving => "approving",
			BridgeStage::Burning => "burning",
			BridgeStage::WaitingAttestation => "waiting_attestation",
			BridgeStage::AttestationReady => "attestation_ready",
			BridgeStage::Minting => "minting",
			BridgeStage::Completed => "completed",
			BridgeStage::Failed => "failed",
		};
		write!(f, "{}", s)
	}
}

/// Checkpoint a retried intent resets to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCheckpoint {
	/// Re-quote before committing anything (original quote expired, or the
	/// failure is user-actionable and execution starts over).
	Quoting,
	/// Rebuild and re-sign the destination transaction.
	Building,
	/// Burn succeeded and the attestation is persisted; resume at minting.
	Minting,
}

impl RetryCheckpoint {
	pub fn stage(&self) -> BridgeStage {
		match self {
			RetryCheckpoint::Quoting => BridgeStage::Quoting,
			RetryCheckpoint::Building => BridgeStage::Building,
			RetryCheckpoint::Minting => BridgeStage::Minting,
		}
	}
}

/// What the destination transaction does once funds arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDescriptor {
	/// Number of lottery tickets to purchase.
	pub ticket_count: u32,
	/// Optional syndicate/cause the purchase is attributed to.
	pub syndicate_id: Option<String>,
	/// Referrer recorded by the lottery contract.
	pub referrer: Option<Address>,
}

/// A user's request to move value and trigger a destination action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
	/// Opaque unique identifier.
	pub id: String,
	pub source_chain: String,
	pub destination_chain_id: u64,
	/// Source-chain identity of the user.
	pub user_address: SourceIdentity,
	/// Destination address, derived or supplied. None until derived.
	pub destination_address: Option<Address>,
	/// Amount in the smallest unit of the bridged asset.
	pub amount: u128,
	pub payload: PayloadDescriptor,
	pub route: BridgeRoute,
	/// Current pipeline stage.
	pub status: BridgeStage,
	/// Attempt counter; bumped by retry, never by forward progress.
	pub attempt: u32,
	pub created_at: u64,
	pub updated_at: u64,
	/// Human-readable description of the most recent failure, if any.
	pub last_error: Option<String>,
}

/// One entry of the append-only stage log attached to an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
	pub stage: BridgeStage,
	pub timestamp: u64,
	/// Free-form diagnostic info (tx hash, error text, solver id).
	pub info: Option<String>,
}

impl StageEntry {
	pub fn new(stage: BridgeStage) -> Self {
		Self {
			stage,
			timestamp: now_secs(),
			info: None,
		}
	}

	pub fn with_info(stage: BridgeStage, info: impl Into<String>) -> Self {
		Self {
			stage,
			timestamp: now_secs(),
			info: Some(info.into()),
		}
	}
}

/// Persisted state of a burn-and-mint run past the point of no return.
///
/// Written after the burn confirms and updated as the attestation service
/// reports progress, so an interrupted run resumes at minting with the exact
/// bytes it obtained earlier instead of burning again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnCheckpoint {
	pub intent_id: String,
	pub burn_tx_hash: TransactionHash,
	/// The burn message emitted on the source chain, once known.
	pub message: Option<Vec<u8>>,
	/// The attestation over the message, once available.
	pub attestation: Option<Vec<u8>>,
}

/// Current Unix timestamp in seconds.
pub fn now_secs() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn terminal_stages_allow_nothing() {
		for stage in [BridgeStage::Completed, BridgeStage::Failed] {
			assert!(!stage.allows(BridgeStage::Quoting, BridgeRoute::ChainSignature));
			assert!(!stage.allows(BridgeStage::Failed, BridgeRoute::ChainSignature));
		}
	}

	#[test]
	fn failed_reachable_from_any_non_terminal_stage() {
		let stages = [
			BridgeStage::Created,
			BridgeStage::Quoting,
			BridgeStage::Building,
			BridgeStage::Signing,
			BridgeStage::WaitingAttestation,
			BridgeStage::Minting,
		];
		for stage in stages {
			assert!(stage.allows(BridgeStage::Failed, BridgeRoute::ChainSignature));
		}
	}

	#[test]
	fn routes_diverge_after_quoting() {
		assert!(BridgeStage::Quoting.allows(BridgeStage::AddressDerived, BridgeRoute::ChainSignature));
		assert!(!BridgeStage::Quoting.allows(BridgeStage::Approving, BridgeRoute::ChainSignature));
		assert!(BridgeStage::Quoting.allows(BridgeStage::Approving, BridgeRoute::BurnAndMint));
		assert!(!BridgeStage::Quoting.allows(BridgeStage::AddressDerived, BridgeRoute::BurnAndMint));
	}

	#[test]
	fn requoting_is_legal() {
		assert!(BridgeStage::Quoting.allows(BridgeStage::Quoting, BridgeRoute::ChainSignature));
	}

	#[test]
	fn cancellation_window() {
		assert!(BridgeStage::Created.is_cancellable());
		assert!(BridgeStage::Quoting.is_cancellable());
		assert!(!BridgeStage::Building.is_cancellable());
		assert!(!BridgeStage::Approving.is_cancellable());
		assert!(!BridgeStage::Completed.is_cancellable());
	}

	#[test]
	fn skipping_stages_is_illegal() {
		assert!(!BridgeStage::Created.allows(BridgeStage::Signing, BridgeRoute::ChainSignature));
		assert!(!BridgeStage::Burning.allows(BridgeStage::Minting, BridgeRoute::BurnAndMint));
	}
}
