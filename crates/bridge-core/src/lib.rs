//! The bridge state machine.
//!
//! [`BridgeEngine`] drives each intent through one of two pipelines. The
//! chain-signature pipeline derives a destination address, builds and remotely
//! signs the destination transaction, and broadcasts it. The burn-and-mint
//! pipeline approves and burns on the source chain, waits for the attestation,
//! and mints on the destination chain.
//!
//! Every transition is appended to the durable stage log before the next
//! stage starts, failures record a retry checkpoint, and the burn checkpoint
//! guarantees a resumed run never burns twice.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use bridge_attestation::AttestationService;
use bridge_builder::{assemble_signed, TransactionBuilder};
use bridge_delivery::DeliveryService;
use bridge_derivation::DerivationService;
use bridge_quotes::QuoteService;
use bridge_signer::SignatureCoordinator;
use bridge_storage::{IntentStore, StorageError};
use bridge_types::{
	now_secs, Address, BridgeError, BridgeEvent, BridgeRoute, BridgeStage, BurnCheckpoint,
	DerivationPath, EventBus, Intent, PayloadDescriptor, Quote, QuoteRequest, Result,
	RetryCheckpoint, SourceIdentity, StageEntry, TransactionReceipt, UnsignedTransaction,
};

mod builder;

pub use builder::{EngineBuilder, EngineConfig};

/// Submission payload for a new intent.
#[derive(Debug, Clone)]
pub struct IntentRequest {
	pub source_chain: String,
	pub destination_chain_id: u64,
	pub user_address: SourceIdentity,
	/// Destination address when the user supplies one; derived otherwise.
	pub destination_address: Option<Address>,
	pub amount: u128,
	pub payload: PayloadDescriptor,
	pub route: BridgeRoute,
}

pub struct BridgeEngine {
	pub(crate) config: EngineConfig,
	pub(crate) store: Arc<IntentStore>,
	pub(crate) derivation: Arc<DerivationService>,
	pub(crate) builder: Arc<TransactionBuilder>,
	pub(crate) signer: Arc<SignatureCoordinator>,
	pub(crate) delivery: Arc<DeliveryService>,
	pub(crate) attestation: Arc<AttestationService>,
	pub(crate) quotes: Arc<QuoteService>,
	pub(crate) events: EventBus,
}

fn store_err(e: StorageError) -> BridgeError {
	match e {
		StorageError::NotFound => BridgeError::IntentNotFound,
		StorageError::StaleStage { expected, found } => {
			BridgeError::StaleStage { expected, found }
		}
		other => BridgeError::Storage(other.to_string()),
	}
}

/// Whether the error means another pipeline advanced the intent first. The
/// loser of that race must leave the intent alone.
fn lost_ownership(error: &BridgeError) -> bool {
	matches!(
		error,
		BridgeError::InvalidTransition { .. } | BridgeError::StaleStage { .. }
	)
}

impl BridgeEngine {
	/// Persists a new intent in `created`.
	pub async fn submit(&self, request: IntentRequest) -> Result<Intent> {
		if request.amount == 0 {
			return Err(BridgeError::BuildFailed("intent amount is zero".into()));
		}

		let now = now_secs();
		let intent = Intent {
			id: Uuid::new_v4().to_string(),
			source_chain: request.source_chain,
			destination_chain_id: request.destination_chain_id,
			user_address: request.user_address,
			destination_address: request.destination_address,
			amount: request.amount,
			payload: request.payload,
			route: request.route,
			status: BridgeStage::Created,
			attempt: 0,
			created_at: now,
			updated_at: now,
			last_error: None,
		};

		self.store.save_new(&intent).await.map_err(store_err)?;
		self.events
			.publish(BridgeEvent::IntentCreated {
				intent_id: intent.id.clone(),
			})
			.ok();
		info!(intent_id = %intent.id, route = ?intent.route, "intent submitted");
		Ok(intent)
	}

	/// Drives an intent from its current stage to `completed` or `failed`.
	///
	/// The error is also recorded on the intent (stage log entry, last_error,
	/// retry checkpoint) before it is returned, except when the run lost the
	/// intent to a concurrent pipeline, which leaves the intent untouched.
	pub async fn execute(&self, id: &str) -> Result<Intent> {
		let intent = self.store.load(id).await.map_err(store_err)?;

		if intent.status == BridgeStage::Completed {
			return Ok(intent);
		}
		if intent.status == BridgeStage::Failed {
			return Err(BridgeError::InvalidTransition {
				from: BridgeStage::Failed,
				to: BridgeStage::Quoting,
			});
		}

		let result = match intent.route {
			BridgeRoute::ChainSignature => self.run_chain_signature(intent.clone()).await,
			BridgeRoute::BurnAndMint => self.run_burn_and_mint(intent.clone()).await,
		};

		match result {
			Ok(done) => Ok(done),
			Err(error) => {
				if !lost_ownership(&error) {
					self.record_failure(&intent, &error).await;
				}
				Err(error)
			}
		}
	}

	/// Resets a failed intent to its recorded checkpoint and re-executes it.
	pub async fn retry(&self, id: &str) -> Result<Intent> {
		let intent = self.store.load(id).await.map_err(store_err)?;
		if intent.status != BridgeStage::Failed {
			return Err(BridgeError::InvalidTransition {
				from: intent.status,
				to: BridgeStage::Quoting,
			});
		}

		let checkpoint = self
			.store
			.load_retry_plan(id)
			.await
			.map_err(store_err)?
			.unwrap_or(RetryCheckpoint::Quoting);

		self.store
			.reset_for_retry(id, checkpoint)
			.await
			.map_err(store_err)?;
		self.store.clear_retry_plan(id).await.map_err(store_err)?;
		info!(intent_id = %id, checkpoint = ?checkpoint, "retrying intent");
		self.execute(id).await
	}

	/// Cancels an intent, honored only before any side effect has occurred.
	pub async fn cancel(&self, id: &str) -> Result<Intent> {
		let intent = self.store.load(id).await.map_err(store_err)?;
		if !intent.status.is_cancellable() {
			return Err(BridgeError::CancellationRefused {
				stage: intent.status,
			});
		}

		let cancelled = self
			.store
			.append_stage(
				id,
				intent.status,
				StageEntry::with_info(BridgeStage::Failed, "cancelled by user"),
			)
			.await
			.map_err(store_err)?;
		self.events
			.publish(BridgeEvent::IntentCancelled {
				intent_id: id.to_string(),
			})
			.ok();
		Ok(cancelled)
	}

	/// Current intent state plus its full stage log.
	pub async fn status(&self, id: &str) -> Result<(Intent, Vec<StageEntry>)> {
		let intent = self.store.load(id).await.map_err(store_err)?;
		let stages = self.store.load_stages(id).await.map_err(store_err)?;
		Ok((intent, stages))
	}

	pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BridgeEvent> {
		self.events.subscribe()
	}

	// ---- chain-signature pipeline ----

	async fn run_chain_signature(&self, mut intent: Intent) -> Result<Intent> {
		let mut quote = None;

		if intent.status == BridgeStage::Created {
			intent = self
				.advance(&intent, StageEntry::new(BridgeStage::Quoting))
				.await?;
		}

		if intent.status == BridgeStage::Quoting {
			let (updated, selected) = self.obtain_quote(&intent).await?;
			intent = self.ensure_destination(&updated).await?;
			let address_info = intent
				.destination_address
				.as_ref()
				.map(|a| a.to_string())
				.unwrap_or_default();
			intent = self
				.advance(
					&intent,
					StageEntry::with_info(BridgeStage::AddressDerived, address_info),
				)
				.await?;
			intent = self
				.advance(&intent, StageEntry::new(BridgeStage::Building))
				.await?;
			quote = Some(selected);
		}

		if intent.status != BridgeStage::Building {
			return Err(BridgeError::InvalidTransition {
				from: intent.status,
				to: BridgeStage::Building,
			});
		}

		self.execute_purchase(intent, quote).await
	}

	async fn execute_purchase(&self, mut intent: Intent, quote: Option<Quote>) -> Result<Intent> {
		let chain_id = intent.destination_chain_id;
		let sender = intent
			.destination_address
			.clone()
			.ok_or_else(|| BridgeError::BuildFailed("intent has no destination address".into()))?;
		let path = self.config.path_for(chain_id)?.clone();

		let nonce = self.delivery.next_nonce(chain_id, &sender).await?;
		let fees = self.delivery.fees(chain_id).await?;
		let tx = self.builder.build_purchase(&intent, nonce, fees)?;

		// Last check before authorizing a signature: an expired quote must
		// never be executed.
		if let Some(q) = &quote {
			if q.is_expired() {
				return Err(BridgeError::QuoteExpired {
					solver: q.solver.clone(),
				});
			}
		}

		intent = self
			.advance(&intent, StageEntry::new(BridgeStage::Signing))
			.await?;

		let handle = self.signer.request_signature(tx.digest, &path).await?;
		self.events
			.publish(BridgeEvent::SignatureRequested {
				intent_id: intent.id.clone(),
				handle: handle.0.clone(),
			})
			.ok();
		let signature = self.signer.await_signature(tx.digest, &handle, &sender).await?;

		let (raw, hash) = assemble_signed(&tx, &signature)?;
		intent = self
			.advance(
				&intent,
				StageEntry::with_info(BridgeStage::Broadcasting, hash.to_string()),
			)
			.await?;
		self.events
			.publish(BridgeEvent::TransactionPending {
				intent_id: intent.id.clone(),
				tx_hash: hash.clone(),
			})
			.ok();

		let receipt = self
			.delivery
			.broadcast(chain_id, &raw, &hash, &sender, nonce)
			.await?;

		intent = self
			.advance(
				&intent,
				StageEntry::with_info(BridgeStage::Confirming, hash.to_string()),
			)
			.await?;
		self.events
			.publish(BridgeEvent::TransactionConfirmed {
				intent_id: intent.id.clone(),
				tx_hash: receipt.hash.clone(),
				block_number: receipt.block_number,
			})
			.ok();

		self.complete(intent).await
	}

	// ---- burn-and-mint pipeline ----

	async fn run_burn_and_mint(&self, mut intent: Intent) -> Result<Intent> {
		if intent.status == BridgeStage::Created {
			intent = self
				.advance(&intent, StageEntry::new(BridgeStage::Quoting))
				.await?;
		}

		if intent.status == BridgeStage::Quoting {
			let (updated, quote) = self.obtain_quote(&intent).await?;
			intent = self.ensure_destination(&updated).await?;
			// The approve is the first side effect of this route; refuse to
			// start it on a stale quote.
			if quote.is_expired() {
				return Err(BridgeError::QuoteExpired {
					solver: quote.solver,
				});
			}
			intent = self
				.advance(&intent, StageEntry::new(BridgeStage::Approving))
				.await?;
		}

		if intent.status == BridgeStage::Approving {
			let (sender, path) = self.source_signer(&intent).await?;
			let chain_id = self.config.burn_source_chain_id;
			let nonce = self.delivery.next_nonce(chain_id, &sender).await?;
			let fees = self.delivery.fees(chain_id).await?;
			let tx = self.builder.build_approve(intent.amount, chain_id, nonce, fees)?;
			self.sign_and_send(&intent, tx, &path, &sender).await?;
			intent = self
				.advance(&intent, StageEntry::new(BridgeStage::Burning))
				.await?;
		}

		if intent.status == BridgeStage::Burning {
			let (sender, path) = self.source_signer(&intent).await?;
			let chain_id = self.config.burn_source_chain_id;
			let nonce = self.delivery.next_nonce(chain_id, &sender).await?;
			let fees = self.delivery.fees(chain_id).await?;
			let tx = self.builder.build_burn(
				&intent,
				chain_id,
				self.config.destination_domain,
				nonce,
				fees,
			)?;
			let receipt = self.sign_and_send(&intent, tx, &path, &sender).await?;

			// Point of no return: the burn is on-chain. Checkpoint it before
			// anything else so no resume path can burn again.
			self.store
				.save_checkpoint(&BurnCheckpoint {
					intent_id: intent.id.clone(),
					burn_tx_hash: receipt.hash.clone(),
					message: None,
					attestation: None,
				})
				.await
				.map_err(store_err)?;

			intent = self
				.advance(
					&intent,
					StageEntry::with_info(BridgeStage::WaitingAttestation, receipt.hash.to_string()),
				)
				.await?;
		}

		if intent.status == BridgeStage::WaitingAttestation {
			intent = self.await_attestation(intent).await?;
		}

		if intent.status == BridgeStage::AttestationReady {
			intent = self
				.advance(&intent, StageEntry::new(BridgeStage::Minting))
				.await?;
		}

		if intent.status != BridgeStage::Minting {
			return Err(BridgeError::InvalidTransition {
				from: intent.status,
				to: BridgeStage::Minting,
			});
		}

		self.execute_mint(intent).await
	}

	async fn await_attestation(&self, intent: Intent) -> Result<Intent> {
		let mut checkpoint = self.load_burn_checkpoint(&intent.id).await?;
		let mut partial = checkpoint.message.clone();

		match self
			.attestation
			.wait_for_attestation(&checkpoint.burn_tx_hash, &mut partial)
			.await
		{
			Ok(attested) => {
				checkpoint.message = Some(attested.message);
				checkpoint.attestation = Some(attested.attestation);
				self.store
					.save_checkpoint(&checkpoint)
					.await
					.map_err(store_err)?;
				self.advance(&intent, StageEntry::new(BridgeStage::AttestationReady))
					.await
			}
			Err(e) => {
				// Keep whatever the service reported so far; a retry resumes
				// polling with the same burn hash instead of burning again.
				checkpoint.message = partial;
				self.store
					.save_checkpoint(&checkpoint)
					.await
					.map_err(store_err)?;
				Err(e)
			}
		}
	}

	async fn execute_mint(&self, intent: Intent) -> Result<Intent> {
		let mut checkpoint = self.load_burn_checkpoint(&intent.id).await?;

		// A resume after an attestation timeout lands here with the burn hash
		// (and possibly the message) but no attestation yet.
		if checkpoint.attestation.is_none() {
			let mut partial = checkpoint.message.clone();
			match self
				.attestation
				.wait_for_attestation(&checkpoint.burn_tx_hash, &mut partial)
				.await
			{
				Ok(attested) => {
					checkpoint.message = Some(attested.message);
					checkpoint.attestation = Some(attested.attestation);
					self.store
						.save_checkpoint(&checkpoint)
						.await
						.map_err(store_err)?;
				}
				Err(e) => {
					checkpoint.message = partial;
					self.store
						.save_checkpoint(&checkpoint)
						.await
						.map_err(store_err)?;
					return Err(e);
				}
			}
		}

		let message = checkpoint
			.message
			.clone()
			.ok_or_else(|| BridgeError::Storage("burn checkpoint has no message".into()))?;
		let attestation = checkpoint
			.attestation
			.clone()
			.ok_or_else(|| BridgeError::Storage("burn checkpoint has no attestation".into()))?;

		let chain_id = intent.destination_chain_id;
		let sender = intent
			.destination_address
			.clone()
			.ok_or_else(|| BridgeError::BuildFailed("intent has no destination address".into()))?;
		let path = self.config.path_for(chain_id)?.clone();

		let nonce = self.delivery.next_nonce(chain_id, &sender).await?;
		let fees = self.delivery.fees(chain_id).await?;
		let tx = self
			.builder
			.build_mint(&message, &attestation, chain_id, nonce, fees)?;
		let receipt = self.sign_and_send(&intent, tx, &path, &sender).await?;

		self.store
			.clear_checkpoint(&intent.id)
			.await
			.map_err(store_err)?;

		let intent = self
			.advance(
				&intent,
				StageEntry::with_info(BridgeStage::Completed, receipt.hash.to_string()),
			)
			.await?;
		self.events
			.publish(BridgeEvent::IntentCompleted {
				intent_id: intent.id.clone(),
			})
			.ok();
		Ok(intent)
	}

	// ---- shared steps ----

	async fn obtain_quote(&self, intent: &Intent) -> Result<(Intent, Quote)> {
		let request = QuoteRequest {
			source_chain: intent.source_chain.clone(),
			source_asset: self.config.asset.clone(),
			source_amount: intent.amount,
			destination_chain_id: intent.destination_chain_id,
			destination_address: intent.destination_address.clone(),
		};

		let quote = self.quotes.get_quote(&request).await?.ok_or(
			BridgeError::InsufficientLiquidity {
				needed: intent.amount,
				available: 0,
			},
		)?;

		let updated = self
			.advance(
				intent,
				StageEntry::with_info(
					BridgeStage::Quoting,
					format!("quote from {} fee {}", quote.solver, quote.fee),
				),
			)
			.await?;
		self.events
			.publish(BridgeEvent::QuoteSelected {
				intent_id: intent.id.clone(),
				solver: quote.solver.clone(),
				fee: quote.fee,
			})
			.ok();
		Ok((updated, quote))
	}

	/// Makes sure the intent carries a destination address, deriving one for
	/// the destination chain when the user did not supply it.
	async fn ensure_destination(&self, intent: &Intent) -> Result<Intent> {
		if intent.destination_address.is_some() {
			return Ok(intent.clone());
		}

		let path = self.config.path_for(intent.destination_chain_id)?;
		let derived = self
			.derivation
			.derive_address(&intent.user_address, path)
			.await?;
		self.store
			.set_destination_address(&intent.id, derived.address)
			.await
			.map_err(store_err)
	}

	/// Sender address and derivation path on the burn source chain.
	async fn source_signer(&self, intent: &Intent) -> Result<(Address, DerivationPath)> {
		let path = self.config.path_for(self.config.burn_source_chain_id)?.clone();
		let derived = self
			.derivation
			.derive_address(&intent.user_address, &path)
			.await?;
		Ok((derived.address, path))
	}

	/// Signs a built transaction with the remote signer and broadcasts it.
	async fn sign_and_send(
		&self,
		intent: &Intent,
		tx: UnsignedTransaction,
		path: &DerivationPath,
		sender: &Address,
	) -> Result<TransactionReceipt> {
		let handle = self.signer.request_signature(tx.digest, path).await?;
		self.events
			.publish(BridgeEvent::SignatureRequested {
				intent_id: intent.id.clone(),
				handle: handle.0.clone(),
			})
			.ok();
		let signature = self.signer.await_signature(tx.digest, &handle, sender).await?;

		let (raw, hash) = assemble_signed(&tx, &signature)?;
		self.events
			.publish(BridgeEvent::TransactionPending {
				intent_id: intent.id.clone(),
				tx_hash: hash.clone(),
			})
			.ok();

		let receipt = self
			.delivery
			.broadcast(tx.chain_id, &raw, &hash, sender, tx.nonce)
			.await?;
		self.events
			.publish(BridgeEvent::TransactionConfirmed {
				intent_id: intent.id.clone(),
				tx_hash: receipt.hash.clone(),
				block_number: receipt.block_number,
			})
			.ok();
		Ok(receipt)
	}

	async fn advance(&self, intent: &Intent, entry: StageEntry) -> Result<Intent> {
		let from = intent.status;
		let to = entry.stage;
		let updated = self
			.store
			.append_stage(&intent.id, from, entry)
			.await
			.map_err(store_err)?;
		self.events
			.publish(BridgeEvent::StageChanged {
				intent_id: intent.id.clone(),
				from,
				to,
			})
			.ok();
		Ok(updated)
	}

	async fn complete(&self, intent: Intent) -> Result<Intent> {
		let intent = self
			.advance(&intent, StageEntry::new(BridgeStage::Completed))
			.await?;
		self.events
			.publish(BridgeEvent::IntentCompleted {
				intent_id: intent.id.clone(),
			})
			.ok();
		info!(intent_id = %intent.id, attempt = intent.attempt, "intent completed");
		Ok(intent)
	}

	async fn load_burn_checkpoint(&self, id: &str) -> Result<BurnCheckpoint> {
		self.store
			.load_checkpoint(id)
			.await
			.map_err(store_err)?
			.ok_or_else(|| BridgeError::Storage(format!("no burn checkpoint for intent {}", id)))
	}

	/// Records a failure on the intent: Failed stage entry, retry checkpoint
	/// (when the error is resumable), and an event. Best-effort; a storage
	/// failure here must not mask the original error.
	async fn record_failure(&self, intent: &Intent, error: &BridgeError) {
		let Ok(current) = self.store.load(&intent.id).await else {
			return;
		};
		if current.status.is_terminal() {
			return;
		}

		let stage = current.status;
		warn!(intent_id = %intent.id, %stage, error = %error, "intent failed");

		if self
			.store
			.append_stage(
				&intent.id,
				stage,
				StageEntry::with_info(BridgeStage::Failed, error.to_string()),
			)
			.await
			.is_err()
		{
			return;
		}

		if let Some(checkpoint) = self.retry_plan_for(&current, error).await {
			let _ = self.store.save_retry_plan(&intent.id, checkpoint).await;
		}

		self.events
			.publish(BridgeEvent::IntentFailed {
				intent_id: intent.id.clone(),
				stage,
				error: error.to_string(),
			})
			.ok();
	}

	/// Maps an error's checkpoint onto the intent's route. The burn-and-mint
	/// route has no building stage: transaction-level failures resume at
	/// minting when the burn is already checkpointed and start over from
	/// quoting otherwise.
	async fn retry_plan_for(
		&self,
		intent: &Intent,
		error: &BridgeError,
	) -> Option<RetryCheckpoint> {
		let base = error.retry_checkpoint()?;
		if intent.route == BridgeRoute::BurnAndMint && base == RetryCheckpoint::Building {
			return match self.store.load_checkpoint(&intent.id).await {
				Ok(Some(_)) => Some(RetryCheckpoint::Minting),
				_ => Some(RetryCheckpoint::Quoting),
			};
		}
		Some(base)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;
	use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
	use std::sync::Mutex;
	use std::time::Duration;

	use alloy_primitives::keccak256;
	use async_trait::async_trait;

	use bridge_attestation::{AttestationInterface, AttestationStatus};
	use bridge_builder::ContractSet;
	use bridge_delivery::{DeliveryInterface, SubmitOutcome};
	use bridge_derivation::{address_from_public_key, KeyInterface};
	use bridge_quotes::{CostOptimized, QuoteBackend, QuoteService};
	use bridge_signer::implementations::local::LocalSigner;
	use bridge_signer::{SignatureCoordinator, SignerInterface};
	use bridge_storage::implementations::memory::MemoryStorage;
	use bridge_storage::StorageService;
	use bridge_types::{
		BackoffPolicy, FeeEstimate, RequestHandle, SignaturePoll, TransactionHash,
	};

	const PRIV_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

	fn test_pubkey() -> Vec<u8> {
		let sk = k256::ecdsa::SigningKey::from_slice(&hex::decode(PRIV_KEY).unwrap()).unwrap();
		sk.verifying_key()
			.to_encoded_point(false)
			.as_bytes()
			.to_vec()
	}

	fn signer_address() -> Address {
		address_from_public_key(&test_pubkey()).unwrap()
	}

	/// RPC mock that accepts everything and mines instantly.
	struct MockChain {
		chain: u64,
		sent: AtomicU64,
	}

	impl MockChain {
		fn new(chain: u64) -> Arc<Self> {
			Arc::new(Self {
				chain,
				sent: AtomicU64::new(0),
			})
		}

		fn sent(&self) -> u64 {
			self.sent.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl DeliveryInterface for MockChain {
		fn chain_id(&self) -> u64 {
			self.chain
		}

		async fn transaction_count(&self, _address: &Address) -> Result<u64> {
			Ok(self.sent.load(Ordering::SeqCst))
		}

		async fn fee_estimate(&self) -> Result<FeeEstimate> {
			Ok(FeeEstimate {
				max_fee_per_gas: 2_000_000_000,
				max_priority_fee_per_gas: 100_000_000,
			})
		}

		async fn block_number(&self) -> Result<u64> {
			Ok(100)
		}

		async fn send_raw(&self, raw: &[u8]) -> Result<SubmitOutcome> {
			self.sent.fetch_add(1, Ordering::SeqCst);
			Ok(SubmitOutcome::Accepted(TransactionHash(
				keccak256(raw).to_vec(),
			)))
		}

		async fn receipt(&self, hash: &TransactionHash) -> Result<Option<TransactionReceipt>> {
			Ok(Some(TransactionReceipt {
				hash: hash.clone(),
				block_number: 90,
				success: true,
			}))
		}
	}

	struct FixedKeyClient {
		key: Vec<u8>,
	}

	#[async_trait]
	impl KeyInterface for FixedKeyClient {
		async fn derived_public_key(
			&self,
			_account_id: &SourceIdentity,
			_path: &DerivationPath,
		) -> Result<Vec<u8>> {
			Ok(self.key.clone())
		}
	}

	struct ScriptedAttestation {
		script: Mutex<Vec<AttestationStatus>>,
	}

	#[async_trait]
	impl AttestationInterface for ScriptedAttestation {
		async fn fetch(&self, _hash: &TransactionHash) -> Result<AttestationStatus> {
			let mut script = self.script.lock().unwrap();
			if script.is_empty() {
				Ok(AttestationStatus::Unknown)
			} else {
				Ok(script.remove(0))
			}
		}
	}

	/// Quote backend returning scripted responses, then a fallback.
	struct ScriptedQuotes {
		script: Mutex<Vec<Option<Quote>>>,
		fallback: Option<Quote>,
	}

	#[async_trait]
	impl QuoteBackend for ScriptedQuotes {
		fn name(&self) -> &str {
			"scripted"
		}

		async fn quote(&self, _request: &QuoteRequest) -> Result<Option<Quote>> {
			let mut script = self.script.lock().unwrap();
			if script.is_empty() {
				Ok(self.fallback.clone())
			} else {
				Ok(script.remove(0))
			}
		}
	}

	/// Signer whose first `pending_checks` polls report pending, then behaves
	/// like a local signer. Used to exhaust the polling budget.
	struct DeferredSigner {
		inner: LocalSigner,
		checks: AtomicUsize,
		pending_checks: usize,
	}

	#[async_trait]
	impl SignerInterface for DeferredSigner {
		async fn request(&self, digest: [u8; 32], path: &DerivationPath) -> Result<RequestHandle> {
			self.inner.request(digest, path).await
		}

		async fn check(&self, handle: &RequestHandle) -> Result<SignaturePoll> {
			if self.checks.fetch_add(1, Ordering::SeqCst) < self.pending_checks {
				Ok(SignaturePoll::Pending)
			} else {
				self.inner.check(handle).await
			}
		}
	}

	/// Signer that parks the first poll until released, holding its pipeline
	/// in the signing stage.
	struct GatedSigner {
		inner: LocalSigner,
		entered: Arc<tokio::sync::Notify>,
		release: Arc<tokio::sync::Notify>,
		gated: AtomicBool,
	}

	#[async_trait]
	impl SignerInterface for GatedSigner {
		async fn request(&self, digest: [u8; 32], path: &DerivationPath) -> Result<RequestHandle> {
			self.inner.request(digest, path).await
		}

		async fn check(&self, handle: &RequestHandle) -> Result<SignaturePoll> {
			if self.gated.swap(false, Ordering::SeqCst) {
				self.entered.notify_one();
				self.release.notified().await;
			}
			self.inner.check(handle).await
		}
	}

	fn fresh_quote() -> Quote {
		Quote {
			solver: "near-intents".into(),
			fee: 100,
			destination_amount: 4_999_900,
			eta_secs: 30,
			reliability: 0.99,
			time_limit_secs: 300,
			quoted_at: now_secs(),
		}
	}

	fn expired_quote() -> Quote {
		Quote {
			quoted_at: 0,
			time_limit_secs: 0,
			..fresh_quote()
		}
	}

	fn contracts() -> ContractSet {
		ContractSet {
			megapot: Address::from_hex("0x1111111111111111111111111111111111111111").unwrap(),
			token: Address::from_hex("0x2222222222222222222222222222222222222222").unwrap(),
			token_messenger: Address::from_hex("0x3333333333333333333333333333333333333333")
				.unwrap(),
			message_transmitter: Address::from_hex(
				"0x4444444444444444444444444444444444444444",
			)
			.unwrap(),
			default_referrer: Address::from_hex("0x5555555555555555555555555555555555555555")
				.unwrap(),
		}
	}

	struct Rig {
		engine: BridgeEngine,
		store: Arc<IntentStore>,
		source: Arc<MockChain>,
		dest: Arc<MockChain>,
	}

	fn rig(
		signer: Box<dyn SignerInterface>,
		quotes: Box<dyn QuoteBackend>,
		attestation_script: Vec<AttestationStatus>,
	) -> Rig {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let store = Arc::new(IntentStore::new(storage));

		let source = MockChain::new(1);
		let dest = MockChain::new(8453);
		let mut providers: HashMap<u64, Arc<dyn DeliveryInterface>> = HashMap::new();
		providers.insert(1, source.clone());
		providers.insert(8453, dest.clone());

		let engine = EngineBuilder::new()
			.with_config(EngineConfig {
				asset: "usdc".into(),
				derivation_paths: HashMap::from([
					(1, DerivationPath("eth-1".into())),
					(8453, DerivationPath("base-1".into())),
				]),
				burn_source_chain_id: 1,
				destination_domain: 6,
			})
			.with_store(store.clone())
			.with_derivation(Arc::new(DerivationService::new(Box::new(FixedKeyClient {
				key: test_pubkey(),
			}))))
			.with_builder(Arc::new(TransactionBuilder::new(contracts())))
			.with_signer(Arc::new(SignatureCoordinator::new(
				signer,
				SignatureCoordinator::test_policy(),
			)))
			.with_delivery(Arc::new(DeliveryService::new(
				providers,
				0,
				BackoffPolicy::fixed(Duration::from_millis(1), 3),
			)))
			.with_attestation(Arc::new(AttestationService::new(
				Box::new(ScriptedAttestation {
					script: Mutex::new(attestation_script),
				}),
				BackoffPolicy::fixed(Duration::from_millis(1), 3),
			)))
			.with_quotes(Arc::new(QuoteService::new(
				vec![quotes],
				Box::new(CostOptimized),
			)))
			.build()
			.unwrap();

		Rig {
			engine,
			store,
			source,
			dest,
		}
	}

	fn quotes(script: Vec<Option<Quote>>, fallback: Option<Quote>) -> Box<dyn QuoteBackend> {
		Box::new(ScriptedQuotes {
			script: Mutex::new(script),
			fallback,
		})
	}

	fn local_signer() -> Box<dyn SignerInterface> {
		Box::new(LocalSigner::new(PRIV_KEY).unwrap())
	}

	fn request(route: BridgeRoute) -> IntentRequest {
		IntentRequest {
			source_chain: "near".into(),
			destination_chain_id: 8453,
			user_address: SourceIdentity("alice.near".into()),
			destination_address: None,
			amount: 5_000_000,
			payload: PayloadDescriptor {
				ticket_count: 5,
				syndicate_id: None,
				referrer: None,
			},
			route,
		}
	}

	fn stage_sequence(stages: &[StageEntry]) -> Vec<BridgeStage> {
		stages.iter().map(|s| s.stage).collect()
	}

	#[tokio::test]
	async fn chain_signature_pipeline_completes() {
		let rig = rig(local_signer(), quotes(vec![], Some(fresh_quote())), vec![]);
		let intent = rig
			.engine
			.submit(request(BridgeRoute::ChainSignature))
			.await
			.unwrap();

		let done = rig.engine.execute(&intent.id).await.unwrap();
		assert_eq!(done.status, BridgeStage::Completed);
		assert_eq!(done.destination_address, Some(signer_address()));
		assert_eq!(rig.dest.sent(), 1);
		assert_eq!(rig.source.sent(), 0);

		let (_, stages) = rig.engine.status(&intent.id).await.unwrap();
		assert_eq!(
			stage_sequence(&stages),
			vec![
				BridgeStage::Created,
				BridgeStage::Quoting,
				BridgeStage::Quoting,
				BridgeStage::AddressDerived,
				BridgeStage::Building,
				BridgeStage::Signing,
				BridgeStage::Broadcasting,
				BridgeStage::Confirming,
				BridgeStage::Completed,
			]
		);
	}

	#[tokio::test]
	async fn pipeline_publishes_events() {
		let rig = rig(local_signer(), quotes(vec![], Some(fresh_quote())), vec![]);
		let mut rx = rig.engine.subscribe();

		let intent = rig
			.engine
			.submit(request(BridgeRoute::ChainSignature))
			.await
			.unwrap();
		rig.engine.execute(&intent.id).await.unwrap();

		let mut saw_quote = false;
		let mut saw_completed = false;
		while let Ok(event) = rx.try_recv() {
			match event {
				BridgeEvent::QuoteSelected { solver, .. } => {
					assert_eq!(solver, "near-intents");
					saw_quote = true;
				}
				BridgeEvent::IntentCompleted { intent_id } => {
					assert_eq!(intent_id, intent.id);
					saw_completed = true;
				}
				_ => {}
			}
		}
		assert!(saw_quote);
		assert!(saw_completed);
	}

	#[tokio::test]
	async fn supplied_destination_address_is_kept() {
		let rig = rig(local_signer(), quotes(vec![], Some(fresh_quote())), vec![]);
		let mut req = request(BridgeRoute::ChainSignature);
		req.destination_address = Some(signer_address());

		let intent = rig.engine.submit(req).await.unwrap();
		let done = rig.engine.execute(&intent.id).await.unwrap();
		assert_eq!(done.status, BridgeStage::Completed);
		assert_eq!(done.destination_address, Some(signer_address()));
	}

	#[tokio::test]
	async fn no_quote_is_a_user_actionable_failure() {
		let rig = rig(local_signer(), quotes(vec![], None), vec![]);
		let intent = rig
			.engine
			.submit(request(BridgeRoute::ChainSignature))
			.await
			.unwrap();

		let err = rig.engine.execute(&intent.id).await.unwrap_err();
		assert!(matches!(err, BridgeError::InsufficientLiquidity { .. }));

		let (current, _) = rig.engine.status(&intent.id).await.unwrap();
		assert_eq!(current.status, BridgeStage::Failed);
		assert!(current.last_error.is_some());
		assert_eq!(
			rig.store.load_retry_plan(&intent.id).await.unwrap(),
			Some(RetryCheckpoint::Quoting)
		);
	}

	#[tokio::test]
	async fn expired_quote_is_rejected_and_retry_requotes() {
		let rig = rig(
			local_signer(),
			quotes(vec![Some(expired_quote())], Some(fresh_quote())),
			vec![],
		);
		let intent = rig
			.engine
			.submit(request(BridgeRoute::ChainSignature))
			.await
			.unwrap();

		let err = rig.engine.execute(&intent.id).await.unwrap_err();
		assert!(matches!(err, BridgeError::QuoteExpired { .. }));
		assert_eq!(
			rig.store.load_retry_plan(&intent.id).await.unwrap(),
			Some(RetryCheckpoint::Quoting)
		);
		assert_eq!(rig.dest.sent(), 0);

		let done = rig.engine.retry(&intent.id).await.unwrap();
		assert_eq!(done.status, BridgeStage::Completed);
		assert_eq!(done.attempt, 1);
		assert_eq!(rig.dest.sent(), 1);
	}

	#[tokio::test]
	async fn signature_timeout_retries_from_building() {
		// 8 pending polls: the first attempt exhausts its 5-poll budget, the
		// retry completes within its own.
		let rig = rig(
			Box::new(DeferredSigner {
				inner: LocalSigner::new(PRIV_KEY).unwrap(),
				checks: AtomicUsize::new(0),
				pending_checks: 8,
			}),
			quotes(vec![], Some(fresh_quote())),
			vec![],
		);
		let intent = rig
			.engine
			.submit(request(BridgeRoute::ChainSignature))
			.await
			.unwrap();

		let err = rig.engine.execute(&intent.id).await.unwrap_err();
		assert!(matches!(err, BridgeError::SignatureTimeout { .. }));
		assert!(err.is_retryable());
		assert_eq!(
			rig.store.load_retry_plan(&intent.id).await.unwrap(),
			Some(RetryCheckpoint::Building)
		);

		let done = rig.engine.retry(&intent.id).await.unwrap();
		assert_eq!(done.status, BridgeStage::Completed);
		assert_eq!(done.attempt, 1);

		// The retry rebuilt and re-signed without re-deriving the address.
		let (_, stages) = rig.engine.status(&intent.id).await.unwrap();
		let derivations = stages
			.iter()
			.filter(|s| s.stage == BridgeStage::AddressDerived)
			.count();
		assert_eq!(derivations, 1);
	}

	#[tokio::test]
	async fn burn_and_mint_pipeline_completes() {
		let rig = rig(
			local_signer(),
			quotes(vec![], Some(fresh_quote())),
			vec![
				AttestationStatus::Unknown,
				AttestationStatus::Complete {
					message: vec![1, 2, 3],
					attestation: vec![9, 9],
				},
			],
		);
		let intent = rig
			.engine
			.submit(request(BridgeRoute::BurnAndMint))
			.await
			.unwrap();

		let done = rig.engine.execute(&intent.id).await.unwrap();
		assert_eq!(done.status, BridgeStage::Completed);
		// Approve + burn on the source chain, mint on the destination chain.
		assert_eq!(rig.source.sent(), 2);
		assert_eq!(rig.dest.sent(), 1);
		// The checkpoint is consumed on completion.
		assert_eq!(rig.store.load_checkpoint(&intent.id).await.unwrap(), None);

		let (_, stages) = rig.engine.status(&intent.id).await.unwrap();
		assert_eq!(
			stage_sequence(&stages),
			vec![
				BridgeStage::Created,
				BridgeStage::Quoting,
				BridgeStage::Quoting,
				BridgeStage::Approving,
				BridgeStage::Burning,
				BridgeStage::WaitingAttestation,
				BridgeStage::AttestationReady,
				BridgeStage::Minting,
				BridgeStage::Completed,
			]
		);
	}

	#[tokio::test]
	async fn attestation_timeout_resumes_at_minting_without_reburn() {
		// First run: message appears but never attests within 3 polls.
		// Retry: one more unknown, then complete.
		let rig = rig(
			local_signer(),
			quotes(vec![], Some(fresh_quote())),
			vec![
				AttestationStatus::MessageReady {
					message: vec![7, 7],
				},
				AttestationStatus::Unknown,
				AttestationStatus::Unknown,
				AttestationStatus::Unknown,
				AttestationStatus::Complete {
					message: vec![7, 7],
					attestation: vec![8],
				},
			],
		);
		let intent = rig
			.engine
			.submit(request(BridgeRoute::BurnAndMint))
			.await
			.unwrap();

		let err = rig.engine.execute(&intent.id).await.unwrap_err();
		assert!(matches!(err, BridgeError::AttestationTimeout { .. }));
		assert_eq!(rig.source.sent(), 2);

		// The burn message survived the timeout.
		let checkpoint = rig
			.store
			.load_checkpoint(&intent.id)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(checkpoint.message, Some(vec![7, 7]));
		assert_eq!(checkpoint.attestation, None);
		assert_eq!(
			rig.store.load_retry_plan(&intent.id).await.unwrap(),
			Some(RetryCheckpoint::Minting)
		);

		let done = rig.engine.retry(&intent.id).await.unwrap();
		assert_eq!(done.status, BridgeStage::Completed);
		// No second approve or burn on the source chain.
		assert_eq!(rig.source.sent(), 2);
		assert_eq!(rig.dest.sent(), 1);
	}

	#[tokio::test]
	async fn cancellation_honored_only_before_side_effects() {
		let rig = rig(local_signer(), quotes(vec![], Some(fresh_quote())), vec![]);

		// Freshly created: cancellable.
		let intent = rig
			.engine
			.submit(request(BridgeRoute::ChainSignature))
			.await
			.unwrap();
		let cancelled = rig.engine.cancel(&intent.id).await.unwrap();
		assert_eq!(cancelled.status, BridgeStage::Failed);
		assert_eq!(cancelled.last_error.as_deref(), Some("cancelled by user"));

		// Completed: refused.
		let other = rig
			.engine
			.submit(request(BridgeRoute::ChainSignature))
			.await
			.unwrap();
		rig.engine.execute(&other.id).await.unwrap();
		let err = rig.engine.cancel(&other.id).await.unwrap_err();
		assert!(matches!(
			err,
			BridgeError::CancellationRefused {
				stage: BridgeStage::Completed
			}
		));
	}

	#[tokio::test]
	async fn completed_intents_are_immutable() {
		let rig = rig(local_signer(), quotes(vec![], Some(fresh_quote())), vec![]);
		let intent = rig
			.engine
			.submit(request(BridgeRoute::ChainSignature))
			.await
			.unwrap();
		rig.engine.execute(&intent.id).await.unwrap();

		// Re-executing a completed intent is a no-op.
		let again = rig.engine.execute(&intent.id).await.unwrap();
		assert_eq!(again.status, BridgeStage::Completed);

		// Retrying one is an error.
		let err = rig.engine.retry(&intent.id).await.unwrap_err();
		assert!(matches!(err, BridgeError::InvalidTransition { .. }));
	}

	#[tokio::test]
	async fn failed_intents_require_retry_not_execute() {
		let rig = rig(local_signer(), quotes(vec![], None), vec![]);
		let intent = rig
			.engine
			.submit(request(BridgeRoute::ChainSignature))
			.await
			.unwrap();
		rig.engine.execute(&intent.id).await.unwrap_err();

		let err = rig.engine.execute(&intent.id).await.unwrap_err();
		assert!(matches!(err, BridgeError::InvalidTransition { .. }));
	}

	#[tokio::test]
	async fn concurrent_execute_loser_leaves_the_intent_alone() {
		let entered = Arc::new(tokio::sync::Notify::new());
		let release = Arc::new(tokio::sync::Notify::new());
		let rig = rig(
			Box::new(GatedSigner {
				inner: LocalSigner::new(PRIV_KEY).unwrap(),
				entered: entered.clone(),
				release: release.clone(),
				gated: AtomicBool::new(true),
			}),
			quotes(vec![], Some(fresh_quote())),
			vec![],
		);
		let intent = rig
			.engine
			.submit(request(BridgeRoute::ChainSignature))
			.await
			.unwrap();

		let engine = Arc::new(rig.engine);
		let winner = tokio::spawn({
			let engine = engine.clone();
			let id = intent.id.clone();
			async move { engine.execute(&id).await }
		});

		// The first run is parked in signing; a second run of the same intent
		// must fail without touching it.
		entered.notified().await;
		let err = engine.execute(&intent.id).await.unwrap_err();
		assert!(matches!(err, BridgeError::InvalidTransition { .. }));
		let (current, _) = engine.status(&intent.id).await.unwrap();
		assert_eq!(current.status, BridgeStage::Signing);
		assert_eq!(rig.store.load_retry_plan(&intent.id).await.unwrap(), None);

		// The parked run finishes untouched once released.
		release.notify_one();
		let done = winner.await.unwrap().unwrap();
		assert_eq!(done.status, BridgeStage::Completed);
		assert_eq!(rig.dest.sent(), 1);

		let (_, stages) = engine.status(&intent.id).await.unwrap();
		assert!(stages.iter().all(|s| s.stage != BridgeStage::Failed));
	}

	#[tokio::test]
	async fn resume_at_attestation_ready_mints_from_persisted_bytes() {
		// Empty attestation script: any poll would report unknown and time
		// out, so reaching completed proves the persisted bytes were used
		// without re-fetching.
		let rig = rig(local_signer(), quotes(vec![], Some(fresh_quote())), vec![]);
		let intent = rig
			.engine
			.submit(request(BridgeRoute::BurnAndMint))
			.await
			.unwrap();
		rig.store
			.set_destination_address(&intent.id, signer_address())
			.await
			.unwrap();

		let mut current = rig.store.load(&intent.id).await.unwrap();
		for stage in [
			BridgeStage::Quoting,
			BridgeStage::Approving,
			BridgeStage::Burning,
			BridgeStage::WaitingAttestation,
			BridgeStage::AttestationReady,
		] {
			current = rig
				.store
				.append_stage(&intent.id, current.status, StageEntry::new(stage))
				.await
				.unwrap();
		}
		rig.store
			.save_checkpoint(&BurnCheckpoint {
				intent_id: intent.id.clone(),
				burn_tx_hash: TransactionHash(vec![0xcc; 32]),
				message: Some(vec![7, 7]),
				attestation: Some(vec![8]),
			})
			.await
			.unwrap();

		let done = rig.engine.execute(&intent.id).await.unwrap();
		assert_eq!(done.status, BridgeStage::Completed);
		// Mint only; the recorded burn is not repeated.
		assert_eq!(rig.source.sent(), 0);
		assert_eq!(rig.dest.sent(), 1);
		assert_eq!(rig.store.load_checkpoint(&intent.id).await.unwrap(), None);
	}

	#[tokio::test]
	async fn zero_amount_is_rejected_at_submission() {
		let rig = rig(local_signer(), quotes(vec![], Some(fresh_quote())), vec![]);
		let mut req = request(BridgeRoute::ChainSignature);
		req.amount = 0;
		assert!(matches!(
			rig.engine.submit(req).await.unwrap_err(),
			BridgeError::BuildFailed(_)
		));
	}
}
