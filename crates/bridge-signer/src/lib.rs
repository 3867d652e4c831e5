//! Remote signature coordination.
//!
//! The coordinator drives one intent attempt through
//! `digest_ready → signature_requested → signature_polling →
//! signature_complete | signature_failed`, with two hard guarantees: a digest
//! is never submitted to the remote signer twice while a request is in
//! flight, and a completed signature is validated by address recovery before
//! it is released to the caller.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use alloy_primitives::B256;

use bridge_types::{
	Address, BackoffPolicy, BridgeError, DerivationPath, RequestHandle, Result, SignaturePoll,
	SignatureResult,
};

pub mod implementations {
	pub mod http;
	pub mod local;
}

/// Remote signing service boundary.
///
/// Request = {digest, derivation path, key version}; response = a signature
/// or a pending/rejected status. The service is free to complete requests
/// out-of-band, which is why handles stay valid across coordinator restarts.
#[async_trait]
pub trait SignerInterface: Send + Sync {
	/// Submits the digest for signing. Non-blocking; returns a handle that
	/// can be polled, including by a coordinator that did not issue it.
	async fn request(&self, digest: [u8; 32], path: &DerivationPath) -> Result<RequestHandle>;

	/// Reports the current status of an outstanding request.
	async fn check(&self, handle: &RequestHandle) -> Result<SignaturePoll>;
}

/// Coordinates signature requests for intent attempts.
pub struct SignatureCoordinator {
	signer: Box<dyn SignerInterface>,
	policy: BackoffPolicy,
	/// Digest → outstanding handle. Guards against duplicate authorization
	/// of the same digest within an attempt.
	in_flight: DashMap<[u8; 32], RequestHandle>,
}

impl SignatureCoordinator {
	pub fn new(signer: Box<dyn SignerInterface>, policy: BackoffPolicy) -> Self {
		Self {
			signer,
			policy,
			in_flight: DashMap::new(),
		}
	}

	/// Requests a signature over the digest, or returns the handle of the
	/// request already in flight for it.
	pub async fn request_signature(
		&self,
		digest: [u8; 32],
		path: &DerivationPath,
	) -> Result<RequestHandle> {
		if let Some(existing) = self.in_flight.get(&digest) {
			debug!(handle = %existing.value(), "signature request already in flight");
			return Ok(existing.value().clone());
		}

		let handle = self.signer.request(digest, path).await?;
		self.in_flight.insert(digest, handle.clone());
		debug!(handle = %handle, "signature requested");
		Ok(handle)
	}

	/// Single status check, no waiting.
	pub async fn poll_signature(&self, handle: &RequestHandle) -> Result<SignaturePoll> {
		self.signer.check(handle).await
	}

	/// Re-attaches to a request issued earlier (possibly by a previous
	/// process) so a timed-out attempt can resume polling the same handle
	/// instead of asking the signer to authorize the digest again.
	pub fn attach(&self, digest: [u8; 32], handle: RequestHandle) {
		self.in_flight.entry(digest).or_insert(handle);
	}

	/// Polls until the request completes, is rejected, or the bounded
	/// polling budget is exhausted.
	///
	/// On completion the signature must recover to `expected_signer`; a
	/// mismatch is surfaced as `InvalidSignature`, never silently retried.
	/// On timeout the in-flight entry is kept so the caller can re-attach.
	pub async fn await_signature(
		&self,
		digest: [u8; 32],
		handle: &RequestHandle,
		expected_signer: &Address,
	) -> Result<SignatureResult> {
		let mut attempt: u32 = 0;
		loop {
			match self.signer.check(handle).await? {
				SignaturePoll::Complete(signature) => {
					// Consumed exactly once; drop the in-flight entry before
					// validation so a rebuilt digest starts fresh.
					self.in_flight.remove(&digest);
					return self.validate(digest, signature, expected_signer);
				}
				SignaturePoll::Rejected(reason) => {
					self.in_flight.remove(&digest);
					warn!(handle = %handle, %reason, "signature rejected");
					return Err(BridgeError::SignatureRejected(reason));
				}
				SignaturePoll::Pending => match self.policy.delay_for(attempt) {
					Some(delay) => {
						tokio::time::sleep(delay).await;
						attempt += 1;
					}
					None => {
						// The signer may still complete out-of-band; keep
						// the handle so the attempt can re-attach later.
						return Err(BridgeError::SignatureTimeout {
							handle: handle.0.clone(),
						});
					}
				},
			}
		}
	}

	fn validate(
		&self,
		digest: [u8; 32],
		signature: SignatureResult,
		expected_signer: &Address,
	) -> Result<SignatureResult> {
		let recovered = signature
			.to_primitive()
			.recover_address_from_prehash(&B256::from(digest))
			.map_err(|_| BridgeError::InvalidSignature {
				expected: expected_signer.to_string(),
			})?;

		if recovered.as_slice() != expected_signer.as_bytes() {
			return Err(BridgeError::InvalidSignature {
				expected: expected_signer.to_string(),
			});
		}
		Ok(signature)
	}

	/// Policy with near-zero delays, for tests.
	pub fn test_policy() -> BackoffPolicy {
		BackoffPolicy {
			initial: Duration::from_millis(1),
			multiplier: 1.0,
			max_interval: Duration::from_millis(1),
			max_attempts: 5,
		}
	}
}
