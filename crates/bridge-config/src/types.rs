//! Configuration schema for the bridge service.

use std::collections::HashMap;

use serde::Deserialize;

use bridge_types::Address;

use crate::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
	pub service: ServiceConfig,
	pub storage: StorageConfig,
	pub derivation: DerivationConfig,
	pub signer: SignerConfig,
	pub attestation: AttestationConfig,
	pub contracts: ContractsConfig,
	pub routing: RoutingConfig,
	#[serde(default)]
	pub chains: Vec<ChainConfig>,
	pub quotes: QuotesConfig,
	#[serde(default)]
	pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
	#[serde(default = "default_log_level")]
	pub log_level: String,
	#[serde(default = "default_http_port")]
	pub http_port: u16,
	/// Symbol of the bridged asset, used in quote requests.
	#[serde(default = "default_asset")]
	pub asset: String,
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_http_port() -> u16 {
	8080
}

fn default_asset() -> String {
	"usdc".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
	Memory,
	File { path: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DerivationConfig {
	/// Base URL of the MPC/threshold key service.
	pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignerConfig {
	/// Remote MPC signing service.
	Remote {
		url: String,
		#[serde(default)]
		key_version: u32,
	},
	/// In-process private key; development only.
	Local { private_key: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttestationConfig {
	pub url: String,
	/// Attestation-bridge domain of the burn source chain.
	pub source_domain: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractsConfig {
	pub megapot: String,
	pub token: String,
	pub token_messenger: String,
	pub message_transmitter: String,
	pub default_referrer: String,
}

impl ContractsConfig {
	fn parse_address(name: &str, value: &str) -> Result<Address, ConfigError> {
		let address = Address::from_hex(value)
			.map_err(|e| ConfigError::Validation(format!("contracts.{}: {}", name, e)))?;
		if !address.is_evm() {
			return Err(ConfigError::Validation(format!(
				"contracts.{}: {} is not a 20-byte address",
				name, value
			)));
		}
		Ok(address)
	}

	pub fn megapot_address(&self) -> Result<Address, ConfigError> {
		Self::parse_address("megapot", &self.megapot)
	}

	pub fn token_address(&self) -> Result<Address, ConfigError> {
		Self::parse_address("token", &self.token)
	}

	pub fn token_messenger_address(&self) -> Result<Address, ConfigError> {
		Self::parse_address("token_messenger", &self.token_messenger)
	}

	pub fn message_transmitter_address(&self) -> Result<Address, ConfigError> {
		Self::parse_address("message_transmitter", &self.message_transmitter)
	}

	pub fn default_referrer_address(&self) -> Result<Address, ConfigError> {
		Self::parse_address("default_referrer", &self.default_referrer)
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
	/// Chain the burn executes on for the burn-and-mint route.
	pub burn_source_chain_id: u64,
	/// Attestation-bridge domain of the destination chain.
	pub destination_domain: u32,
	/// MPC derivation path per chain id. TOML table keys are strings.
	pub derivation_paths: HashMap<String, String>,
}

impl RoutingConfig {
	pub fn paths_by_chain_id(&self) -> Result<HashMap<u64, String>, ConfigError> {
		self.derivation_paths
			.iter()
			.map(|(k, v)| {
				let chain_id = k.parse::<u64>().map_err(|_| {
					ConfigError::Validation(format!(
						"routing.derivation_paths: {} is not a chain id",
						k
					))
				})?;
				Ok((chain_id, v.clone()))
			})
			.collect()
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
	pub chain_id: u64,
	pub url: String,
	#[serde(default)]
	pub confirmations: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotesConfig {
	#[serde(default = "default_strategy")]
	pub strategy: StrategyKind,
	/// Amount at or above which the default strategy prefers reliability.
	#[serde(default = "default_amount_threshold")]
	pub amount_threshold: u128,
	pub backends: Vec<QuoteBackendConfig>,
}

fn default_strategy() -> StrategyKind {
	StrategyKind::Default
}

fn default_amount_threshold() -> u128 {
	1_000_000_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
	Default,
	Cost,
	Performance,
	Reliability,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteBackendConfig {
	pub name: String,
	pub url: String,
}

/// Bounded polling parameters shared by the signer, delivery, and attestation
/// pollers.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
	#[serde(default = "default_initial_ms")]
	pub initial_ms: u64,
	#[serde(default = "default_multiplier")]
	pub multiplier: f64,
	#[serde(default = "default_max_interval_ms")]
	pub max_interval_ms: u64,
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
}

fn default_initial_ms() -> u64 {
	1_000
}

fn default_multiplier() -> f64 {
	2.0
}

fn default_max_interval_ms() -> u64 {
	30_000
}

fn default_max_attempts() -> u32 {
	10
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			initial_ms: default_initial_ms(),
			multiplier: default_multiplier(),
			max_interval_ms: default_max_interval_ms(),
			max_attempts: default_max_attempts(),
		}
	}
}
