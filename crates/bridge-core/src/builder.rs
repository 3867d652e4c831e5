//! Engine composition root.

use std::collections::HashMap;
use std::sync::Arc;

use bridge_attestation::AttestationService;
use bridge_builder::TransactionBuilder;
use bridge_delivery::DeliveryService;
use bridge_derivation::DerivationService;
use bridge_quotes::QuoteService;
use bridge_signer::SignatureCoordinator;
use bridge_storage::IntentStore;
use bridge_types::{BridgeError, DerivationPath, EventBus, Result};

use crate::BridgeEngine;

/// Static routing knowledge the engine needs beyond its injected services.
#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// Symbol of the bridged asset, used when requesting quotes.
	pub asset: String,
	/// MPC derivation path per chain id.
	pub derivation_paths: HashMap<u64, DerivationPath>,
	/// Chain the burn executes on (burn-and-mint route).
	pub burn_source_chain_id: u64,
	/// Attestation-bridge domain of the destination chain.
	pub destination_domain: u32,
}

impl EngineConfig {
	pub fn path_for(&self, chain_id: u64) -> Result<&DerivationPath> {
		self.derivation_paths.get(&chain_id).ok_or_else(|| {
			BridgeError::Config(format!("no derivation path for chain {}", chain_id))
		})
	}
}

/// Builds a [`BridgeEngine`] from injected services.
#[derive(Default)]
pub struct EngineBuilder {
	config: Option<EngineConfig>,
	store: Option<Arc<IntentStore>>,
	derivation: Option<Arc<DerivationService>>,
	builder: Option<Arc<TransactionBuilder>>,
	signer: Option<Arc<SignatureCoordinator>>,
	delivery: Option<Arc<DeliveryService>>,
	attestation: Option<Arc<AttestationService>>,
	quotes: Option<Arc<QuoteService>>,
	events: Option<EventBus>,
}

impl EngineBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_config(mut self, config: EngineConfig) -> Self {
		self.config = Some(config);
		self
	}

	pub fn with_store(mut self, store: Arc<IntentStore>) -> Self {
		self.store = Some(store);
		self
	}

	pub fn with_derivation(mut self, derivation: Arc<DerivationService>) -> Self {
		self.derivation = Some(derivation);
		self
	}

	pub fn with_builder(mut self, builder: Arc<TransactionBuilder>) -> Self {
		self.builder = Some(builder);
		self
	}

	pub fn with_signer(mut self, signer: Arc<SignatureCoordinator>) -> Self {
		self.signer = Some(signer);
		self
	}

	pub fn with_delivery(mut self, delivery: Arc<DeliveryService>) -> Self {
		self.delivery = Some(delivery);
		self
	}

	pub fn with_attestation(mut self, attestation: Arc<AttestationService>) -> Self {
		self.attestation = Some(attestation);
		self
	}

	pub fn with_quotes(mut self, quotes: Arc<QuoteService>) -> Self {
		self.quotes = Some(quotes);
		self
	}

	pub fn with_events(mut self, events: EventBus) -> Self {
		self.events = Some(events);
		self
	}

	pub fn build(self) -> Result<BridgeEngine> {
		fn missing<T>(part: Option<T>, name: &str) -> Result<T> {
			part.ok_or_else(|| BridgeError::Config(format!("engine builder missing {}", name)))
		}

		Ok(BridgeEngine {
			config: missing(self.config, "config")?,
			store: missing(self.store, "intent store")?,
			derivation: missing(self.derivation, "derivation service")?,
			builder: missing(self.builder, "transaction builder")?,
			signer: missing(self.signer, "signature coordinator")?,
			delivery: missing(self.delivery, "delivery service")?,
			attestation: missing(self.attestation, "attestation service")?,
			quotes: missing(self.quotes, "quote service")?,
			events: self.events.unwrap_or_else(|| EventBus::new(256)),
		})
	}
}
