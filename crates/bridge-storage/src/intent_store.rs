//! Typed repository for intents, their stage logs, and burn checkpoints.
//!
//! The stage log is append-only and every append is guarded twice: a
//! per-intent lock keeps concurrent pipelines from interleaving writes, and
//! an optimistic check rejects the append if the observed current stage no
//! longer matches the expected predecessor. Terminal intents accept no
//! further appends.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use bridge_types::{
	now_secs, Address, BridgeStage, BurnCheckpoint, Intent, RetryCheckpoint, StageEntry,
};

use crate::{StorageError, StorageService};

const NS_INTENTS: &str = "intents";
const NS_STAGES: &str = "stages";
const NS_CHECKPOINTS: &str = "checkpoints";
const NS_RETRIES: &str = "retries";

pub struct IntentStore {
	storage: Arc<StorageService>,
	/// One lock per intent id; at most one writer advances an intent.
	locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IntentStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			storage,
			locks: DashMap::new(),
		}
	}

	fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
		self.locks
			.entry(id.to_string())
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone()
	}

	/// Persists a newly created intent and seeds its stage log.
	pub async fn save_new(&self, intent: &Intent) -> Result<(), StorageError> {
		let lock = self.lock_for(&intent.id);
		let _guard = lock.lock().await;

		self.storage.store(NS_INTENTS, &intent.id, intent).await?;
		let log = vec![StageEntry::new(intent.status)];
		self.storage.store(NS_STAGES, &intent.id, &log).await
	}

	pub async fn load(&self, id: &str) -> Result<Intent, StorageError> {
		self.storage.retrieve(NS_INTENTS, id).await
	}

	pub async fn load_stages(&self, id: &str) -> Result<Vec<StageEntry>, StorageError> {
		self.storage.retrieve(NS_STAGES, id).await
	}

	/// Appends a stage transition, enforcing the expected predecessor.
	///
	/// Returns `StaleStage` when the stored intent has moved on since the
	/// caller observed `expected`, which means another pipeline advanced it.
	pub async fn append_stage(
		&self,
		id: &str,
		expected: BridgeStage,
		entry: StageEntry,
	) -> Result<Intent, StorageError> {
		let lock = self.lock_for(id);
		let _guard = lock.lock().await;

		let mut intent: Intent = self.storage.retrieve(NS_INTENTS, id).await?;

		if intent.status != expected {
			return Err(StorageError::StaleStage {
				expected: expected.to_string(),
				found: intent.status.to_string(),
			});
		}
		if intent.status.is_terminal() {
			return Err(StorageError::StaleStage {
				expected: expected.to_string(),
				found: format!("{} (terminal)", intent.status),
			});
		}
		if !intent.status.allows(entry.stage, intent.route) {
			return Err(StorageError::StaleStage {
				expected: expected.to_string(),
				found: format!("{} does not precede {}", intent.status, entry.stage),
			});
		}

		debug!(intent_id = %id, from = %intent.status, to = %entry.stage, "stage transition");

		let mut log: Vec<StageEntry> = self.storage.retrieve(NS_STAGES, id).await?;
		log.push(entry.clone());

		intent.status = entry.stage;
		intent.updated_at = now_secs();
		if entry.stage == BridgeStage::Failed {
			intent.last_error = entry.info.clone();
		}

		self.storage.store(NS_STAGES, id, &log).await?;
		self.storage.store(NS_INTENTS, id, &intent).await?;
		Ok(intent)
	}

	/// Resets a failed intent to a retry checkpoint and bumps its attempt
	/// counter. The reset is itself recorded in the stage log, so the audit
	/// trail shows the full history including every retry.
	pub async fn reset_for_retry(
		&self,
		id: &str,
		checkpoint: RetryCheckpoint,
	) -> Result<Intent, StorageError> {
		let lock = self.lock_for(id);
		let _guard = lock.lock().await;

		let mut intent: Intent = self.storage.retrieve(NS_INTENTS, id).await?;
		if intent.status != BridgeStage::Failed {
			return Err(StorageError::StaleStage {
				expected: BridgeStage::Failed.to_string(),
				found: intent.status.to_string(),
			});
		}

		let mut log: Vec<StageEntry> = self.storage.retrieve(NS_STAGES, id).await?;
		log.push(StageEntry::with_info(
			checkpoint.stage(),
			format!("retry attempt {}", intent.attempt + 1),
		));

		intent.status = checkpoint.stage();
		intent.attempt += 1;
		intent.updated_at = now_secs();
		intent.last_error = None;

		self.storage.store(NS_STAGES, id, &log).await?;
		self.storage.store(NS_INTENTS, id, &intent).await?;
		Ok(intent)
	}

	/// Persists the destination address on an intent once it is known,
	/// whether supplied by the user or derived.
	pub async fn set_destination_address(
		&self,
		id: &str,
		address: Address,
	) -> Result<Intent, StorageError> {
		let lock = self.lock_for(id);
		let _guard = lock.lock().await;

		let mut intent: Intent = self.storage.retrieve(NS_INTENTS, id).await?;
		intent.destination_address = Some(address);
		intent.updated_at = now_secs();
		self.storage.store(NS_INTENTS, id, &intent).await?;
		Ok(intent)
	}

	/// Records where a retry of this intent should resume. Written when the
	/// intent fails, consumed by the retry operation.
	pub async fn save_retry_plan(
		&self,
		id: &str,
		checkpoint: RetryCheckpoint,
	) -> Result<(), StorageError> {
		self.storage.store(NS_RETRIES, id, &checkpoint).await
	}

	pub async fn load_retry_plan(&self, id: &str) -> Result<Option<RetryCheckpoint>, StorageError> {
		match self.storage.retrieve(NS_RETRIES, id).await {
			Ok(cp) => Ok(Some(cp)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn clear_retry_plan(&self, id: &str) -> Result<(), StorageError> {
		self.storage.remove(NS_RETRIES, id).await
	}

	/// Persists or updates the burn checkpoint for an intent.
	pub async fn save_checkpoint(&self, checkpoint: &BurnCheckpoint) -> Result<(), StorageError> {
		self.storage
			.store(NS_CHECKPOINTS, &checkpoint.intent_id, checkpoint)
			.await
	}

	pub async fn load_checkpoint(&self, id: &str) -> Result<Option<BurnCheckpoint>, StorageError> {
		match self.storage.retrieve(NS_CHECKPOINTS, id).await {
			Ok(cp) => Ok(Some(cp)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn clear_checkpoint(&self, id: &str) -> Result<(), StorageError> {
		self.storage.remove(NS_CHECKPOINTS, id).await
	}
}
