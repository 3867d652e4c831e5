//! HTTP attestation client.
//!
//! Polls a Circle-style message API: given a burn transaction hash, the
//! service eventually returns the burn message and its attestation.

use async_trait::async_trait;
use serde::Deserialize;

use bridge_types::{BridgeError, Result, TransactionHash};

use crate::{AttestationInterface, AttestationStatus};

pub struct HttpAttestationClient {
	client: reqwest::Client,
	base_url: String,
	source_domain: u32,
}

impl HttpAttestationClient {
	pub fn new(base_url: impl Into<String>, source_domain: u32) -> Self {
		Self {
			client: reqwest::Client::new(),
			base_url: base_url.into(),
			source_domain,
		}
	}
}

#[derive(Deserialize)]
struct MessagesResponse {
	messages: Vec<MessageEntry>,
}

#[derive(Deserialize)]
struct MessageEntry {
	message: String,
	attestation: Option<String>,
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
	hex::decode(s.trim_start_matches("0x"))
		.map_err(|e| BridgeError::Network(format!("invalid hex from attestation service: {}", e)))
}

#[async_trait]
impl AttestationInterface for HttpAttestationClient {
	async fn fetch(&self, burn_tx_hash: &TransactionHash) -> Result<AttestationStatus> {
		let url = format!(
			"{}/v1/messages/{}/{}",
			self.base_url, self.source_domain, burn_tx_hash
		);
		let response = self
			.client
			.get(&url)
			.send()
			.await
			.map_err(|e| BridgeError::Network(format!("attestation service unreachable: {}", e)))?;

		// 404 means the burn has not been indexed yet.
		if response.status() == reqwest::StatusCode::NOT_FOUND {
			return Ok(AttestationStatus::Unknown);
		}
		if !response.status().is_success() {
			return Err(BridgeError::Network(format!(
				"attestation service returned {}",
				response.status()
			)));
		}

		let body: MessagesResponse = response
			.json()
			.await
			.map_err(|e| BridgeError::Network(format!("invalid attestation response: {}", e)))?;

		let Some(entry) = body.messages.into_iter().next() else {
			return Ok(AttestationStatus::Unknown);
		};

		let message = decode_hex(&entry.message)?;
		match entry.attestation {
			Some(att) if !att.is_empty() && att != "PENDING" => {
				Ok(AttestationStatus::Complete {
					message,
					attestation: decode_hex(&att)?,
				})
			}
			_ => Ok(AttestationStatus::MessageReady { message }),
		}
	}
}
