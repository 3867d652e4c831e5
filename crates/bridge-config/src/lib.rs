//! TOML configuration loading.
//!
//! Configuration is a TOML file with `${VAR}` environment substitution, a
//! small set of `BRIDGE_`-prefixed environment overrides, and validation
//! before anything is constructed from it.

use std::env;
use std::path::Path;

use thiserror::Error;

mod types;

pub use types::{
	AttestationConfig, BridgeConfig, ChainConfig, ContractsConfig, DerivationConfig,
	QuoteBackendConfig, QuotesConfig, RetryConfig, RoutingConfig, ServiceConfig, SignerConfig,
	StorageConfig, StrategyKind,
};

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	Parse(String),

	#[error("Validation error: {0}")]
	Validation(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

/// Configuration loader with environment variable substitution.
#[derive(Default)]
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "BRIDGE_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<BridgeConfig, ConfigError> {
		let file_path = self
			.file_path
			.as_ref()
			.ok_or_else(|| ConfigError::FileNotFound("no configuration file specified".into()))?;

		let content = tokio::fs::read_to_string(file_path).await?;
		let substituted = self.substitute_env_vars(&content)?;
		let mut config: BridgeConfig =
			toml::from_str(&substituted).map_err(|e| ConfigError::Parse(e.to_string()))?;

		self.apply_env_overrides(&mut config)?;
		self.validate(&config)?;
		Ok(config)
	}

	/// Replaces `${VAR_NAME}` patterns with the environment variable's value.
	fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
		let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::Parse(e.to_string()))?;

		let mut result = content.to_string();
		for cap in re.captures_iter(content) {
			let full_match = &cap[0];
			let var_name = &cap[1];
			let value = env::var(var_name)
				.map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
			result = result.replace(full_match, &value);
		}
		Ok(result)
	}

	fn apply_env_overrides(&self, config: &mut BridgeConfig) -> Result<(), ConfigError> {
		if let Ok(log_level) = env::var(format!("{}LOG_LEVEL", self.env_prefix)) {
			config.service.log_level = log_level;
		}

		if let Ok(http_port) = env::var(format!("{}HTTP_PORT", self.env_prefix)) {
			config.service.http_port = http_port
				.parse()
				.map_err(|e| ConfigError::Validation(format!("invalid HTTP port: {}", e)))?;
		}

		Ok(())
	}

	fn validate(&self, config: &BridgeConfig) -> Result<(), ConfigError> {
		if config.chains.is_empty() {
			return Err(ConfigError::Validation(
				"at least one RPC chain must be configured".into(),
			));
		}
		if config.quotes.backends.is_empty() {
			return Err(ConfigError::Validation(
				"at least one quote backend must be configured".into(),
			));
		}

		// Contract addresses must parse now, not at first use.
		config.contracts.megapot_address()?;
		config.contracts.token_address()?;
		config.contracts.token_messenger_address()?;
		config.contracts.message_transmitter_address()?;
		config.contracts.default_referrer_address()?;

		let paths = config.routing.paths_by_chain_id()?;
		for chain in &config.chains {
			if !paths.contains_key(&chain.chain_id) {
				return Err(ConfigError::Validation(format!(
					"no derivation path configured for chain {}",
					chain.chain_id
				)));
			}
		}
		if !config
			.chains
			.iter()
			.any(|c| c.chain_id == config.routing.burn_source_chain_id)
		{
			return Err(ConfigError::Validation(format!(
				"burn source chain {} has no RPC configured",
				config.routing.burn_source_chain_id
			)));
		}

		if config.retry.max_attempts == 0 {
			return Err(ConfigError::Validation(
				"retry.max_attempts must be at least 1".into(),
			));
		}

		Ok(())
	}
}
