//! Builds the engine and its services from configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use bridge_attestation::{implementations::http::HttpAttestationClient, AttestationService};
use bridge_builder::{ContractSet, TransactionBuilder};
use bridge_config::{BridgeConfig, SignerConfig, StorageConfig, StrategyKind};
use bridge_core::{BridgeEngine, EngineBuilder, EngineConfig};
use bridge_delivery::{
	implementations::rpc::RpcProvider, DeliveryInterface, DeliveryService,
};
use bridge_derivation::{implementations::http::HttpKeyClient, DerivationService};
use bridge_quotes::{
	implementations::http::HttpQuoteBackend, CostOptimized, DefaultStrategy, PerformanceOptimized,
	QuoteBackend, QuoteService, ReliabilityOptimized, SelectionStrategy,
};
use bridge_signer::{
	implementations::{http::HttpSignerClient, local::LocalSigner},
	SignatureCoordinator, SignerInterface,
};
use bridge_storage::{
	implementations::{file::FileStorage, memory::MemoryStorage},
	IntentStore, StorageInterface, StorageService,
};
use bridge_types::{BackoffPolicy, DerivationPath, EventBus};

pub fn build_engine(config: &BridgeConfig) -> Result<BridgeEngine> {
	let backoff = backoff_policy(config);

	let storage: Box<dyn StorageInterface> = match &config.storage {
		StorageConfig::Memory => Box::new(MemoryStorage::new()),
		StorageConfig::File { path } => Box::new(FileStorage::new(PathBuf::from(path))),
	};
	let store = Arc::new(IntentStore::new(Arc::new(StorageService::new(storage))));

	let derivation = Arc::new(DerivationService::new(Box::new(HttpKeyClient::new(
		config.derivation.url.clone(),
	))));

	let signer: Box<dyn SignerInterface> = match &config.signer {
		SignerConfig::Remote { url, key_version } => {
			Box::new(HttpSignerClient::new(url.clone(), *key_version))
		}
		SignerConfig::Local { private_key } => Box::new(
			LocalSigner::new(private_key)
				.map_err(|e| anyhow::anyhow!("signer config: {}", e))?,
		),
	};
	let coordinator = Arc::new(SignatureCoordinator::new(signer, backoff.clone()));

	let builder = Arc::new(TransactionBuilder::new(ContractSet {
		megapot: config.contracts.megapot_address()?,
		token: config.contracts.token_address()?,
		token_messenger: config.contracts.token_messenger_address()?,
		message_transmitter: config.contracts.message_transmitter_address()?,
		default_referrer: config.contracts.default_referrer_address()?,
	}));

	let mut providers: HashMap<u64, Arc<dyn DeliveryInterface>> = HashMap::new();
	let mut confirmations = 0;
	for chain in &config.chains {
		providers.insert(
			chain.chain_id,
			Arc::new(RpcProvider::new(chain.url.clone(), chain.chain_id)),
		);
		confirmations = confirmations.max(chain.confirmations);
	}
	let delivery = Arc::new(DeliveryService::new(providers, confirmations, backoff.clone()));

	let attestation = Arc::new(AttestationService::new(
		Box::new(HttpAttestationClient::new(
			config.attestation.url.clone(),
			config.attestation.source_domain,
		)),
		backoff,
	));

	let backends: Vec<Box<dyn QuoteBackend>> = config
		.quotes
		.backends
		.iter()
		.map(|b| {
			Box::new(HttpQuoteBackend::new(b.name.clone(), b.url.clone())) as Box<dyn QuoteBackend>
		})
		.collect();
	let strategy: Box<dyn SelectionStrategy> = match config.quotes.strategy {
		StrategyKind::Default => Box::new(DefaultStrategy::new(config.quotes.amount_threshold)),
		StrategyKind::Cost => Box::new(CostOptimized),
		StrategyKind::Performance => Box::new(PerformanceOptimized),
		StrategyKind::Reliability => Box::new(ReliabilityOptimized),
	};
	let quotes = Arc::new(QuoteService::new(backends, strategy));

	let derivation_paths = config
		.routing
		.paths_by_chain_id()?
		.into_iter()
		.map(|(chain_id, path)| (chain_id, DerivationPath(path)))
		.collect();

	EngineBuilder::new()
		.with_config(EngineConfig {
			asset: config.service.asset.clone(),
			derivation_paths,
			burn_source_chain_id: config.routing.burn_source_chain_id,
			destination_domain: config.routing.destination_domain,
		})
		.with_store(store)
		.with_derivation(derivation)
		.with_builder(builder)
		.with_signer(coordinator)
		.with_delivery(delivery)
		.with_attestation(attestation)
		.with_quotes(quotes)
		.with_events(EventBus::new(256))
		.build()
		.map_err(|e| anyhow::anyhow!("{}", e))
		.context("failed to assemble bridge engine")
}

fn backoff_policy(config: &BridgeConfig) -> BackoffPolicy {
	BackoffPolicy {
		initial: Duration::from_millis(config.retry.initial_ms),
		multiplier: config.retry.multiplier,
		max_interval: Duration::from_millis(config.retry.max_interval_ms),
		max_attempts: config.retry.max_attempts,
	}
}
