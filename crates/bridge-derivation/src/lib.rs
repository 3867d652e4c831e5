//! Destination-chain address derivation.
//!
//! Derives a deterministic EVM address for a (source account, derivation
//! path) pair by querying the remote MPC/threshold key service for the
//! derived public key and applying the standard Keccak address computation.
//! Results are cached per session; the remote read is the only side effect,
//! so retries are always safe.

use async_trait::async_trait;
use dashmap::DashMap;
use sha3::{Digest, Keccak256};
use tracing::debug;

use bridge_types::{
	Address, BridgeError, DerivationPath, DerivedAddress, Result, SourceIdentity,
};

pub mod implementations {
	pub mod http;
}

/// Remote MPC/threshold key service boundary.
///
/// Implementations return the uncompressed secp256k1 public key derived for
/// the given account and path. The service never signs anything here.
#[async_trait]
pub trait KeyInterface: Send + Sync {
	/// Fetches the derived public key bytes for (account, path).
	///
	/// The returned bytes are expected to be a 64-byte uncompressed key or a
	/// 65-byte key with the 0x04 prefix; validation happens in the caller.
	async fn derived_public_key(
		&self,
		account_id: &SourceIdentity,
		path: &DerivationPath,
	) -> Result<Vec<u8>>;
}

/// Address derivation service with a per-session cache.
pub struct DerivationService {
	client: Box<dyn KeyInterface>,
	cache: DashMap<(SourceIdentity, DerivationPath), DerivedAddress>,
}

impl DerivationService {
	pub fn new(client: Box<dyn KeyInterface>) -> Self {
		Self {
			client,
			cache: DashMap::new(),
		}
	}

	/// Derives the destination address for (account, path).
	///
	/// Deterministic: the same pair always yields the same address, and a
	/// cached result is returned without touching the remote service.
	pub async fn derive_address(
		&self,
		account_id: &SourceIdentity,
		path: &DerivationPath,
	) -> Result<DerivedAddress> {
		let cache_key = (account_id.clone(), path.clone());
		if let Some(hit) = self.cache.get(&cache_key) {
			return Ok(hit.clone());
		}

		let key_bytes = self.client.derived_public_key(account_id, path).await?;
		let address = address_from_public_key(&key_bytes)?;
		let derived = DerivedAddress {
			account_id: account_id.clone(),
			path: path.clone(),
			checksummed: to_checksummed(&address),
			address,
		};

		debug!(account = %account_id, path = %path, address = %derived.checksummed, "derived address");
		self.cache.insert(cache_key, derived.clone());
		Ok(derived)
	}
}

/// Computes the EVM address from an uncompressed secp256k1 public key.
///
/// Accepts exactly 64 bytes (x || y) or 65 bytes with the 0x04 prefix; any
/// other shape is a hard, non-retryable failure rather than a silent
/// fallback.
pub fn address_from_public_key(key: &[u8]) -> Result<Address> {
	let raw = match key.len() {
		64 => key,
		65 if key[0] == 0x04 => &key[1..],
		65 => {
			return Err(BridgeError::DerivationFailed {
				reason: format!("unsupported key prefix 0x{:02x}", key[0]),
				malformed: true,
			})
		}
		n => {
			return Err(BridgeError::DerivationFailed {
				reason: format!("public key length {} (expected 64 or 65)", n),
				malformed: true,
			})
		}
	};

	let hash = Keccak256::digest(raw);
	Ok(Address(hash[12..].to_vec()))
}

/// EIP-55 checksummed string form of a 20-byte address.
pub fn to_checksummed(address: &Address) -> String {
	let lower = hex::encode(&address.0);
	let hash = Keccak256::digest(lower.as_bytes());
	let mut out = String::with_capacity(42);
	out.push_str("0x");
	for (i, c) in lower.chars().enumerate() {
		let nibble = (hash[i / 2] >> (4 * (1 - i % 2))) & 0x0f;
		if c.is_ascii_alphabetic() && nibble >= 8 {
			out.push(c.to_ascii_uppercase());
		} else {
			out.push(c);
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use std::sync::Arc;

	struct FixedKeyClient {
		key: Vec<u8>,
		calls: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl KeyInterface for FixedKeyClient {
		async fn derived_public_key(
			&self,
			_account_id: &SourceIdentity,
			_path: &DerivationPath,
		) -> Result<Vec<u8>> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(self.key.clone())
		}
	}

	fn service(key: Vec<u8>) -> DerivationService {
		DerivationService::new(Box::new(FixedKeyClient {
			key,
			calls: Arc::new(AtomicUsize::new(0)),
		}))
	}

	#[tokio::test]
	async fn derivation_is_deterministic() {
		let svc = service(vec![0xab; 64]);
		let account = SourceIdentity("alice.near".into());
		let path = DerivationPath("base-1".into());

		let a = svc.derive_address(&account, &path).await.unwrap();
		let b = svc.derive_address(&account, &path).await.unwrap();
		assert_eq!(a, b);
		assert_eq!(a.address.0.len(), 20);
	}

	#[tokio::test]
	async fn second_derivation_hits_cache() {
		let calls = Arc::new(AtomicUsize::new(0));
		let svc = DerivationService::new(Box::new(FixedKeyClient {
			key: vec![0xab; 64],
			calls: calls.clone(),
		}));
		let account = SourceIdentity("alice.near".into());
		let path = DerivationPath("base-1".into());

		svc.derive_address(&account, &path).await.unwrap();
		svc.derive_address(&account, &path).await.unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn prefixed_and_raw_keys_agree() {
		let raw = vec![0xab; 64];
		let mut prefixed = vec![0x04];
		prefixed.extend_from_slice(&raw);
		assert_eq!(
			address_from_public_key(&raw).unwrap(),
			address_from_public_key(&prefixed).unwrap()
		);
	}

	#[tokio::test]
	async fn malformed_key_lengths_are_terminal() {
		for len in [0usize, 20, 33, 63, 66] {
			let err = address_from_public_key(&vec![0u8; len]).unwrap_err();
			match err {
				BridgeError::DerivationFailed { malformed, .. } => assert!(malformed),
				other => panic!("unexpected error: {:?}", other),
			}
		}
	}

	#[tokio::test]
	async fn wrong_prefix_is_terminal() {
		let mut key = vec![0x02];
		key.extend_from_slice(&[0xab; 64]);
		let err = address_from_public_key(&key).unwrap_err();
		assert!(!err.is_retryable());
	}

	#[test]
	fn checksum_matches_known_vector() {
		// EIP-55 reference vector.
		let addr = Address(hex::decode("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap());
		assert_eq!(
			to_checksummed(&addr),
			"0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
		);
	}

	#[test]
	fn known_key_yields_known_address() {
		// Fixed 64-byte key of 0xAB repeated; address is the keccak tail.
		let derived = address_from_public_key(&[0xab; 64]).unwrap();
		let hash = Keccak256::digest([0xab; 64]);
		assert_eq!(derived.0, hash[12..].to_vec());
	}
}
