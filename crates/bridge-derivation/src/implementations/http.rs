//! HTTP client for the remote MPC key service.
//!
//! The service exposes derived public keys over a small JSON API; this
//! client fetches the key bytes and leaves validation to the derivation
//! service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bridge_types::{BridgeError, DerivationPath, Result, SourceIdentity};

use crate::KeyInterface;

pub struct HttpKeyClient {
	client: reqwest::Client,
	base_url: String,
}

impl HttpKeyClient {
	pub fn new(base_url: impl Into<String>) -> Self {
		Self {
			client: reqwest::Client::new(),
			base_url: base_url.into(),
		}
	}
}

#[derive(Serialize)]
struct DerivedKeyRequest<'a> {
	account_id: &'a str,
	path: &'a str,
}

#[derive(Deserialize)]
struct DerivedKeyResponse {
	/// Hex-encoded uncompressed public key, with or without the 0x prefix.
	public_key: String,
}

#[async_trait]
impl KeyInterface for HttpKeyClient {
	async fn derived_public_key(
		&self,
		account_id: &SourceIdentity,
		path: &DerivationPath,
	) -> Result<Vec<u8>> {
		let url = format!("{}/v1/derived_public_key", self.base_url);
		let response = self
			.client
			.post(&url)
			.json(&DerivedKeyRequest {
				account_id: &account_id.0,
				path: &path.0,
			})
			.send()
			.await
			.map_err(|e| BridgeError::DerivationFailed {
				reason: format!("key service unreachable: {}", e),
				malformed: false,
			})?;

		if !response.status().is_success() {
			return Err(BridgeError::DerivationFailed {
				reason: format!("key service returned {}", response.status()),
				malformed: false,
			});
		}

		let body: DerivedKeyResponse =
			response
				.json()
				.await
				.map_err(|e| BridgeError::DerivationFailed {
					reason: format!("invalid key service response: {}", e),
					malformed: false,
				})?;

		hex::decode(body.public_key.trim_start_matches("0x")).map_err(|e| {
			BridgeError::DerivationFailed {
				reason: format!("public key is not valid hex: {}", e),
				malformed: true,
			}
		})
	}
}
