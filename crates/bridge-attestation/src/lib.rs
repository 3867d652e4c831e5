//! Attestation service boundary for the burn-and-mint path.
//!
//! After a burn confirms, the attestation service is polled by burn
//! transaction hash until it returns the burn message and the attestation
//! over it. Polling is bounded; hitting the ceiling surfaces as a retryable
//! timeout and whatever was learned so far (typically the message) is handed
//! back to the caller for checkpointing, so a retry never re-burns.

use async_trait::async_trait;
use tracing::debug;

use bridge_types::{BackoffPolicy, BridgeError, Result, TransactionHash};

pub mod implementations {
	pub mod http;
}

/// Progress of an attestation as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationStatus {
	/// The burn has not been indexed yet.
	Unknown,
	/// The burn message is known but not yet attested.
	MessageReady { message: Vec<u8> },
	/// Message and attestation are both available.
	Complete {
		message: Vec<u8>,
		attestation: Vec<u8>,
	},
}

/// Attested burn message, ready for minting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedMessage {
	pub message: Vec<u8>,
	pub attestation: Vec<u8>,
}

#[async_trait]
pub trait AttestationInterface: Send + Sync {
	/// Fetches the current attestation status for a burn transaction.
	async fn fetch(&self, burn_tx_hash: &TransactionHash) -> Result<AttestationStatus>;
}

/// Bounded attestation poller.
pub struct AttestationService {
	client: Box<dyn AttestationInterface>,
	policy: BackoffPolicy,
}

impl AttestationService {
	pub fn new(client: Box<dyn AttestationInterface>, policy: BackoffPolicy) -> Self {
		Self { client, policy }
	}

	/// Single status check, no waiting.
	pub async fn check(&self, burn_tx_hash: &TransactionHash) -> Result<AttestationStatus> {
		self.client.fetch(burn_tx_hash).await
	}

	/// Polls until the attestation is complete or the budget is exhausted.
	///
	/// On timeout the error carries the poll count and the caller receives
	/// the last observed partial state through `partial`, preserving the
	/// burn message for the resume checkpoint.
	pub async fn wait_for_attestation(
		&self,
		burn_tx_hash: &TransactionHash,
		partial: &mut Option<Vec<u8>>,
	) -> Result<AttestedMessage> {
		let mut attempt: u32 = 0;
		loop {
			match self.client.fetch(burn_tx_hash).await? {
				AttestationStatus::Complete {
					message,
					attestation,
				} => {
					debug!(hash = %burn_tx_hash, "attestation complete");
					return Ok(AttestedMessage {
						message,
						attestation,
					});
				}
				AttestationStatus::MessageReady { message } => {
					*partial = Some(message);
				}
				AttestationStatus::Unknown => {}
			}

			match self.policy.delay_for(attempt) {
				Some(delay) => {
					tokio::time::sleep(delay).await;
					attempt += 1;
				}
				None => {
					return Err(BridgeError::AttestationTimeout {
						polls: self.policy.max_attempts,
					})
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;
	use std::time::Duration;

	struct ScriptedAttestation {
		script: Mutex<Vec<AttestationStatus>>,
	}

	#[async_trait]
	impl AttestationInterface for ScriptedAttestation {
		async fn fetch(&self, _hash: &TransactionHash) -> Result<AttestationStatus> {
			let mut script = self.script.lock().unwrap();
			if script.is_empty() {
				Ok(AttestationStatus::Unknown)
			} else {
				Ok(script.remove(0))
			}
		}
	}

	fn service(script: Vec<AttestationStatus>, max_polls: u32) -> AttestationService {
		AttestationService::new(
			Box::new(ScriptedAttestation {
				script: Mutex::new(script),
			}),
			BackoffPolicy::fixed(Duration::from_millis(1), max_polls),
		)
	}

	fn hash() -> TransactionHash {
		TransactionHash(vec![0xbb; 32])
	}

	#[tokio::test]
	async fn completes_when_attestation_arrives() {
		let svc = service(
			vec![
				AttestationStatus::Unknown,
				AttestationStatus::MessageReady {
					message: vec![1, 2],
				},
				AttestationStatus::Complete {
					message: vec![1, 2],
					attestation: vec![9],
				},
			],
			10,
		);
		let mut partial = None;
		let attested = svc.wait_for_attestation(&hash(), &mut partial).await.unwrap();
		assert_eq!(attested.message, vec![1, 2]);
		assert_eq!(attested.attestation, vec![9]);
	}

	#[tokio::test]
	async fn timeout_preserves_partial_message() {
		// 10 polls at a fixed interval, message appears but never attests.
		let svc = service(
			vec![AttestationStatus::MessageReady {
				message: vec![7, 7],
			}],
			10,
		);
		let mut partial = None;
		let err = svc
			.wait_for_attestation(&hash(), &mut partial)
			.await
			.unwrap_err();
		assert!(matches!(err, BridgeError::AttestationTimeout { polls: 10 }));
		assert!(err.is_retryable());
		// The burn message survives for the resume checkpoint.
		assert_eq!(partial, Some(vec![7, 7]));
	}
}
