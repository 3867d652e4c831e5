//! Destination-chain transaction broadcasting.
//!
//! Submits signed transactions over per-chain RPC providers, waits for
//! confirmation, and resolves the "already known" / "nonce too low" family
//! of responses by checking whether the logically-equivalent transaction
//! already succeeded before concluding failure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use bridge_types::{
	Address, BackoffPolicy, BridgeError, FeeEstimate, Result, TransactionHash, TransactionReceipt,
};

pub mod implementations {
	pub mod rpc;
}

/// Outcome of a raw-transaction submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
	/// The node accepted the transaction into its pool.
	Accepted(TransactionHash),
	/// The node reported the transaction (or its nonce) as already used:
	/// "already known", "nonce too low", or an equivalent. The transaction
	/// may have been mined previously.
	AlreadyKnown,
}

/// Per-chain RPC boundary.
#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	fn chain_id(&self) -> u64;

	/// Pending-state transaction count for the sender, i.e. the next nonce.
	async fn transaction_count(&self, address: &Address) -> Result<u64>;

	/// Current fee parameters of the chain.
	async fn fee_estimate(&self) -> Result<FeeEstimate>;

	/// Latest block number.
	async fn block_number(&self) -> Result<u64>;

	/// Submits a raw signed transaction.
	async fn send_raw(&self, raw: &[u8]) -> Result<SubmitOutcome>;

	/// Receipt lookup; `None` while the transaction is unmined or unknown.
	async fn receipt(&self, hash: &TransactionHash) -> Result<Option<TransactionReceipt>>;
}

/// Broadcast service over a registry of per-chain providers.
pub struct DeliveryService {
	providers: HashMap<u64, Arc<dyn DeliveryInterface>>,
	confirmations: u64,
	policy: BackoffPolicy,
}

impl DeliveryService {
	pub fn new(
		providers: HashMap<u64, Arc<dyn DeliveryInterface>>,
		confirmations: u64,
		policy: BackoffPolicy,
	) -> Self {
		Self {
			providers,
			confirmations,
			policy,
		}
	}

	fn provider(&self, chain_id: u64) -> Result<&Arc<dyn DeliveryInterface>> {
		self.providers.get(&chain_id).ok_or_else(|| {
			BridgeError::BroadcastFailed(format!("no provider for chain {}", chain_id))
		})
	}

	/// Next nonce for the sender on the given chain.
	pub async fn next_nonce(&self, chain_id: u64, sender: &Address) -> Result<u64> {
		self.provider(chain_id)?.transaction_count(sender).await
	}

	/// Current fee parameters for the given chain.
	pub async fn fees(&self, chain_id: u64) -> Result<FeeEstimate> {
		self.provider(chain_id)?.fee_estimate().await
	}

	/// Broadcasts a signed transaction and waits for its confirmed receipt.
	///
	/// `expected_hash` is the hash precomputed at assembly time and
	/// `tx_nonce` the nonce baked into the transaction; both drive the
	/// idempotent-resume check when the node reports the transaction as
	/// already known.
	pub async fn broadcast(
		&self,
		chain_id: u64,
		raw: &[u8],
		expected_hash: &TransactionHash,
		sender: &Address,
		tx_nonce: u64,
	) -> Result<TransactionReceipt> {
		let provider = self.provider(chain_id)?;

		match provider.send_raw(raw).await? {
			SubmitOutcome::Accepted(hash) => {
				debug!(%hash, chain_id, "transaction accepted");
				self.wait_for_receipt(chain_id, &hash).await
			}
			SubmitOutcome::AlreadyKnown => {
				info!(hash = %expected_hash, chain_id, "transaction already known, resuming");
				self.resume_known(provider, expected_hash, sender, tx_nonce)
					.await
			}
		}
	}

	/// Idempotent resume: the submission was refused as a duplicate, so the
	/// logically-equivalent transaction may already be on-chain. Re-derive
	/// the actual nonce state and look for the receipt before concluding
	/// failure.
	async fn resume_known(
		&self,
		provider: &Arc<dyn DeliveryInterface>,
		expected_hash: &TransactionHash,
		sender: &Address,
		tx_nonce: u64,
	) -> Result<TransactionReceipt> {
		if let Some(receipt) = provider.receipt(expected_hash).await? {
			return self.check_receipt(receipt);
		}

		let on_chain_nonce = provider.transaction_count(sender).await?;
		if on_chain_nonce > tx_nonce {
			// The nonce was consumed but not by this transaction; a blind
			// retry with the same nonce can never land.
			warn!(
				hash = %expected_hash,
				tx_nonce,
				on_chain_nonce,
				"nonce consumed by a different transaction"
			);
			return Err(BridgeError::BroadcastFailed(format!(
				"nonce {} consumed by a different transaction",
				tx_nonce
			)));
		}

		// Still pending in the pool under the same hash.
		self.wait_for_receipt(provider.chain_id(), expected_hash).await
	}

	/// Polls for a receipt with the configured bounded policy, then waits
	/// for the configured number of confirmations.
	pub async fn wait_for_receipt(
		&self,
		chain_id: u64,
		hash: &TransactionHash,
	) -> Result<TransactionReceipt> {
		let provider = self.provider(chain_id)?;
		let mut attempt: u32 = 0;

		let receipt = loop {
			if let Some(receipt) = provider.receipt(hash).await? {
				break receipt;
			}
			match self.policy.delay_for(attempt) {
				Some(delay) => {
					tokio::time::sleep(delay).await;
					attempt += 1;
				}
				None => {
					return Err(BridgeError::BroadcastFailed(format!(
						"no receipt for {} within polling budget",
						hash
					)))
				}
			}
		};

		if self.confirmations > 0 {
			let target = receipt.block_number + self.confirmations;
			let mut attempt: u32 = 0;
			while provider.block_number().await? < target {
				match self.policy.delay_for(attempt) {
					Some(delay) => {
						tokio::time::sleep(delay).await;
						attempt += 1;
					}
					None => {
						return Err(BridgeError::BroadcastFailed(format!(
							"{} not confirmed within polling budget",
							hash
						)))
					}
				}
			}
		}

		self.check_receipt(receipt)
	}

	fn check_receipt(&self, receipt: TransactionReceipt) -> Result<TransactionReceipt> {
		if receipt.success {
			Ok(receipt)
		} else {
			Err(BridgeError::TransactionReverted {
				tx_hash: receipt.hash.to_string(),
			})
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;
	use std::time::Duration;

	struct MockProvider {
		chain: u64,
		nonce: u64,
		submit_results: Mutex<Vec<Result<SubmitOutcome>>>,
		receipts: Mutex<HashMap<Vec<u8>, TransactionReceipt>>,
		block: u64,
	}

	impl MockProvider {
		fn new(chain: u64) -> Self {
			Self {
				chain,
				nonce: 0,
				submit_results: Mutex::new(Vec::new()),
				receipts: Mutex::new(HashMap::new()),
				block: 100,
			}
		}

		fn with_receipt(self, hash: &TransactionHash, success: bool) -> Self {
			self.receipts.lock().unwrap().insert(
				hash.0.clone(),
				TransactionReceipt {
					hash: hash.clone(),
					block_number: 90,
					success,
				},
			);
			self
		}

		fn with_submit(self, outcome: Result<SubmitOutcome>) -> Self {
			self.submit_results.lock().unwrap().push(outcome);
			self
		}

		fn with_nonce(mut self, nonce: u64) -> Self {
			self.nonce = nonce;
			self
		}
	}

	#[async_trait]
	impl DeliveryInterface for MockProvider {
		fn chain_id(&self) -> u64 {
			self.chain
		}

		async fn transaction_count(&self, _address: &Address) -> Result<u64> {
			Ok(self.nonce)
		}

		async fn fee_estimate(&self) -> Result<FeeEstimate> {
			Ok(FeeEstimate {
				max_fee_per_gas: 1_000_000_000,
				max_priority_fee_per_gas: 100_000_000,
			})
		}

		async fn block_number(&self) -> Result<u64> {
			Ok(self.block)
		}

		async fn send_raw(&self, _raw: &[u8]) -> Result<SubmitOutcome> {
			let mut results = self.submit_results.lock().unwrap();
			if results.is_empty() {
				Ok(SubmitOutcome::AlreadyKnown)
			} else {
				results.remove(0)
			}
		}

		async fn receipt(&self, hash: &TransactionHash) -> Result<Option<TransactionReceipt>> {
			Ok(self.receipts.lock().unwrap().get(&hash.0).cloned())
		}
	}

	fn fast_policy() -> BackoffPolicy {
		BackoffPolicy::fixed(Duration::from_millis(1), 3)
	}

	fn service(provider: MockProvider) -> DeliveryService {
		let mut providers: HashMap<u64, Arc<dyn DeliveryInterface>> = HashMap::new();
		providers.insert(provider.chain, Arc::new(provider));
		DeliveryService::new(providers, 0, fast_policy())
	}

	fn hash() -> TransactionHash {
		TransactionHash(vec![0xaa; 32])
	}

	fn sender() -> Address {
		Address(vec![0x01; 20])
	}

	#[tokio::test]
	async fn accepted_transaction_confirms() {
		let provider = MockProvider::new(8453)
			.with_submit(Ok(SubmitOutcome::Accepted(hash())))
			.with_receipt(&hash(), true);
		let svc = service(provider);

		let receipt = svc
			.broadcast(8453, &[0x02], &hash(), &sender(), 5)
			.await
			.unwrap();
		assert!(receipt.success);
	}

	#[tokio::test]
	async fn nonce_too_low_with_mined_receipt_resolves_to_success() {
		// The transaction was mined in a previous attempt; the node refuses
		// the resubmission but the receipt exists.
		let provider = MockProvider::new(8453)
			.with_submit(Ok(SubmitOutcome::AlreadyKnown))
			.with_receipt(&hash(), true)
			.with_nonce(6);
		let svc = service(provider);

		let receipt = svc
			.broadcast(8453, &[0x02], &hash(), &sender(), 5)
			.await
			.unwrap();
		assert!(receipt.success);
	}

	#[tokio::test]
	async fn nonce_consumed_by_other_transaction_fails() {
		let provider = MockProvider::new(8453)
			.with_submit(Ok(SubmitOutcome::AlreadyKnown))
			.with_nonce(6);
		let svc = service(provider);

		let err = svc
			.broadcast(8453, &[0x02], &hash(), &sender(), 5)
			.await
			.unwrap_err();
		assert!(matches!(err, BridgeError::BroadcastFailed(_)));
	}

	#[tokio::test]
	async fn reverted_transaction_is_terminal() {
		let provider = MockProvider::new(8453)
			.with_submit(Ok(SubmitOutcome::Accepted(hash())))
			.with_receipt(&hash(), false);
		let svc = service(provider);

		let err = svc
			.broadcast(8453, &[0x02], &hash(), &sender(), 5)
			.await
			.unwrap_err();
		assert!(matches!(err, BridgeError::TransactionReverted { .. }));
		assert!(!err.is_retryable());
	}

	#[tokio::test]
	async fn missing_receipt_times_out_as_retryable() {
		let provider =
			MockProvider::new(8453).with_submit(Ok(SubmitOutcome::Accepted(hash())));
		let svc = service(provider);

		let err = svc
			.broadcast(8453, &[0x02], &hash(), &sender(), 5)
			.await
			.unwrap_err();
		assert!(matches!(err, BridgeError::BroadcastFailed(_)));
		assert!(err.is_retryable());
	}

	#[tokio::test]
	async fn unknown_chain_is_an_error() {
		let svc = service(MockProvider::new(8453));
		assert!(svc.next_nonce(1, &sender()).await.is_err());
	}
}
