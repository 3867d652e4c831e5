//! HTTP client for the remote MPC signing service.
//!
//! Submits {digest, path, key version} and polls request status by handle.
//! Handles returned by the service are stable, so a coordinator can resume
//! polling a request issued before a restart.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bridge_types::{
	BridgeError, DerivationPath, RequestHandle, Result, SignaturePoll, SignatureResult,
};

use crate::SignerInterface;

pub struct HttpSignerClient {
	client: reqwest::Client,
	base_url: String,
	key_version: u32,
}

impl HttpSignerClient {
	pub fn new(base_url: impl Into<String>, key_version: u32) -> Self {
		Self {
			client: reqwest::Client::new(),
			base_url: base_url.into(),
			key_version,
		}
	}
}

#[derive(Serialize)]
struct SignRequest<'a> {
	/// Hex-encoded 32-byte digest.
	payload: String,
	path: &'a str,
	key_version: u32,
}

#[derive(Deserialize)]
struct SignRequestResponse {
	request_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
enum SignStatusResponse {
	Pending,
	Complete {
		r: String,
		s: String,
		recovery_id: u8,
	},
	Rejected {
		reason: String,
	},
}

fn decode_component(hex_str: &str) -> Result<[u8; 32]> {
	let bytes = hex::decode(hex_str.trim_start_matches("0x"))
		.map_err(|e| BridgeError::Network(format!("invalid signature component: {}", e)))?;
	bytes
		.try_into()
		.map_err(|_| BridgeError::Network("signature component is not 32 bytes".into()))
}

#[async_trait]
impl SignerInterface for HttpSignerClient {
	async fn request(&self, digest: [u8; 32], path: &DerivationPath) -> Result<RequestHandle> {
		let url = format!("{}/v1/sign", self.base_url);
		let response = self
			.client
			.post(&url)
			.json(&SignRequest {
				payload: hex::encode(digest),
				path: &path.0,
				key_version: self.key_version,
			})
			.send()
			.await
			.map_err(|e| BridgeError::Network(format!("signer unreachable: {}", e)))?;

		if !response.status().is_success() {
			return Err(BridgeError::Network(format!(
				"signer returned {}",
				response.status()
			)));
		}

		let body: SignRequestResponse = response
			.json()
			.await
			.map_err(|e| BridgeError::Network(format!("invalid signer response: {}", e)))?;
		Ok(RequestHandle(body.request_id))
	}

	async fn check(&self, handle: &RequestHandle) -> Result<SignaturePoll> {
		let url = format!("{}/v1/sign/{}", self.base_url, handle.0);
		let response = self
			.client
			.get(&url)
			.send()
			.await
			.map_err(|e| BridgeError::Network(format!("signer unreachable: {}", e)))?;

		if !response.status().is_success() {
			return Err(BridgeError::Network(format!(
				"signer returned {}",
				response.status()
			)));
		}

		let body: SignStatusResponse = response
			.json()
			.await
			.map_err(|e| BridgeError::Network(format!("invalid signer response: {}", e)))?;

		Ok(match body {
			SignStatusResponse::Pending => SignaturePoll::Pending,
			SignStatusResponse::Complete { r, s, recovery_id } => {
				SignaturePoll::Complete(SignatureResult {
					r: decode_component(&r)?,
					s: decode_component(&s)?,
					recovery_id,
				})
			}
			SignStatusResponse::Rejected { reason } => SignaturePoll::Rejected(reason),
		})
	}
}
