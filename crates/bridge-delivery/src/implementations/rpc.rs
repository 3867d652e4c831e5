//! JSON-RPC provider over HTTP.
//!
//! Speaks the standard `eth_*` namespace via reqwest. Node responses that
//! indicate the transaction or its nonce was already used are normalized to
//! [`SubmitOutcome::AlreadyKnown`] so the service layer can run its
//! idempotent-resume check.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use bridge_types::{
	Address, BridgeError, FeeEstimate, Result, TransactionHash, TransactionReceipt,
};

use crate::{DeliveryInterface, SubmitOutcome};

pub struct RpcProvider {
	client: reqwest::Client,
	url: String,
	chain_id: u64,
}

impl RpcProvider {
	pub fn new(url: impl Into<String>, chain_id: u64) -> Self {
		Self {
			client: reqwest::Client::new(),
			url: url.into(),
			chain_id,
		}
	}

	async fn call(&self, method: &str, params: Value) -> Result<Value> {
		let body = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": method,
			"params": params,
		});

		let response = self
			.client
			.post(&self.url)
			.json(&body)
			.send()
			.await
			.map_err(|e| BridgeError::BroadcastFailed(format!("rpc unreachable: {}", e)))?;

		let envelope: RpcEnvelope = response
			.json()
			.await
			.map_err(|e| BridgeError::BroadcastFailed(format!("invalid rpc response: {}", e)))?;

		if let Some(error) = envelope.error {
			return Err(BridgeError::BroadcastFailed(format!(
				"rpc error {}: {}",
				error.code, error.message
			)));
		}
		envelope
			.result
			.ok_or_else(|| BridgeError::BroadcastFailed("rpc response missing result".into()))
	}
}

#[derive(Deserialize)]
struct RpcEnvelope {
	result: Option<Value>,
	error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
	code: i64,
	message: String,
}

#[derive(Deserialize)]
struct RpcReceipt {
	#[serde(rename = "transactionHash")]
	transaction_hash: String,
	#[serde(rename = "blockNumber")]
	block_number: String,
	status: String,
}

fn parse_quantity(s: &str) -> Result<u64> {
	u64::from_str_radix(s.trim_start_matches("0x"), 16)
		.map_err(|e| BridgeError::BroadcastFailed(format!("invalid quantity {}: {}", s, e)))
}

fn parse_u128(s: &str) -> Result<u128> {
	u128::from_str_radix(s.trim_start_matches("0x"), 16)
		.map_err(|e| BridgeError::BroadcastFailed(format!("invalid quantity {}: {}", s, e)))
}

/// Node phrasings that mean "this transaction or nonce was already seen".
fn is_already_known(message: &str) -> bool {
	let lower = message.to_lowercase();
	lower.contains("already known")
		|| lower.contains("known transaction")
		|| lower.contains("nonce too low")
		|| lower.contains("replacement transaction underpriced")
}

#[async_trait]
impl DeliveryInterface for RpcProvider {
	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	async fn transaction_count(&self, address: &Address) -> Result<u64> {
		let result = self
			.call(
				"eth_getTransactionCount",
				json!([address.to_string(), "pending"]),
			)
			.await?;
		let s = result
			.as_str()
			.ok_or_else(|| BridgeError::BroadcastFailed("non-string nonce".into()))?;
		parse_quantity(s)
	}

	async fn fee_estimate(&self) -> Result<FeeEstimate> {
		let gas_price = self.call("eth_gasPrice", json!([])).await?;
		let base = parse_u128(
			gas_price
				.as_str()
				.ok_or_else(|| BridgeError::BroadcastFailed("non-string gas price".into()))?,
		)?;

		let priority = match self.call("eth_maxPriorityFeePerGas", json!([])).await {
			Ok(v) => v.as_str().map(parse_u128).transpose()?.unwrap_or(base / 10),
			// Older nodes; fall back to a tenth of the gas price.
			Err(_) => base / 10,
		};

		Ok(FeeEstimate {
			max_fee_per_gas: base * 2 + priority,
			max_priority_fee_per_gas: priority,
		})
	}

	async fn block_number(&self) -> Result<u64> {
		let result = self.call("eth_blockNumber", json!([])).await?;
		let s = result
			.as_str()
			.ok_or_else(|| BridgeError::BroadcastFailed("non-string block number".into()))?;
		parse_quantity(s)
	}

	async fn send_raw(&self, raw: &[u8]) -> Result<SubmitOutcome> {
		let param = format!("0x{}", hex::encode(raw));
		match self.call("eth_sendRawTransaction", json!([param])).await {
			Ok(result) => {
				let s = result
					.as_str()
					.ok_or_else(|| BridgeError::BroadcastFailed("non-string tx hash".into()))?;
				let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|e| {
					BridgeError::BroadcastFailed(format!("invalid tx hash: {}", e))
				})?;
				Ok(SubmitOutcome::Accepted(TransactionHash(bytes)))
			}
			Err(BridgeError::BroadcastFailed(message)) if is_already_known(&message) => {
				debug!(%message, "node reported transaction as already known");
				Ok(SubmitOutcome::AlreadyKnown)
			}
			Err(e) => Err(e),
		}
	}

	async fn receipt(&self, hash: &TransactionHash) -> Result<Option<TransactionReceipt>> {
		let result = self
			.call("eth_getTransactionReceipt", json!([hash.to_string()]))
			.await?;
		if result.is_null() {
			return Ok(None);
		}

		let receipt: RpcReceipt = serde_json::from_value(result)
			.map_err(|e| BridgeError::BroadcastFailed(format!("invalid receipt: {}", e)))?;
		let hash_bytes = hex::decode(receipt.transaction_hash.trim_start_matches("0x"))
			.map_err(|e| BridgeError::BroadcastFailed(format!("invalid receipt hash: {}", e)))?;

		Ok(Some(TransactionReceipt {
			hash: TransactionHash(hash_bytes),
			block_number: parse_quantity(&receipt.block_number)?,
			success: receipt.status == "0x1",
		}))
	}
}
