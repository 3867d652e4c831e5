//! Local private-key signer.
//!
//! Signs digests immediately with an in-process key. Used in development and
//! tests where standing up an MPC network is overkill; the coordinator sees
//! a request that completes on the first poll.

use alloy_primitives::B256;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use dashmap::DashMap;

use bridge_types::{
	Address, BridgeError, DerivationPath, RequestHandle, Result, SignaturePoll, SignatureResult,
};

use crate::SignerInterface;

pub struct LocalSigner {
	signer: PrivateKeySigner,
	completed: DashMap<String, SignatureResult>,
}

impl LocalSigner {
	/// Creates a signer from a hex-encoded private key, with or without the
	/// 0x prefix.
	pub fn new(private_key_hex: &str) -> Result<Self> {
		let signer = private_key_hex
			.parse::<PrivateKeySigner>()
			.map_err(|e| BridgeError::Config(format!("invalid private key: {}", e)))?;
		Ok(Self {
			signer,
			completed: DashMap::new(),
		})
	}

	pub fn random() -> Self {
		Self {
			signer: PrivateKeySigner::random(),
			completed: DashMap::new(),
		}
	}

	/// The address signatures from this signer recover to.
	pub fn address(&self) -> Address {
		Address(self.signer.address().as_slice().to_vec())
	}
}

#[async_trait]
impl SignerInterface for LocalSigner {
	async fn request(&self, digest: [u8; 32], _path: &DerivationPath) -> Result<RequestHandle> {
		let signature = self
			.signer
			.sign_hash_sync(&B256::from(digest))
			.map_err(|e| BridgeError::SignatureRejected(format!("signing failed: {}", e)))?;

		let result = SignatureResult {
			r: signature.r().to_be_bytes::<32>(),
			s: signature.s().to_be_bytes::<32>(),
			recovery_id: if signature.v() { 1 } else { 0 },
		};
		let handle = RequestHandle(format!("local-{}", hex::encode(&digest[..8])));
		self.completed.insert(handle.0.clone(), result);
		Ok(handle)
	}

	async fn check(&self, handle: &RequestHandle) -> Result<SignaturePoll> {
		match self.completed.get(&handle.0) {
			Some(result) => Ok(SignaturePoll::Complete(result.clone())),
			None => Ok(SignaturePoll::Rejected("unknown request handle".into())),
		}
	}
}
