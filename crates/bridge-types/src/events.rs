//! Typed stage-change events.
//!
//! Presentation layers subscribe to the bus instead of registering callback
//! arrays; every pipeline transition is observable as a [`BridgeEvent`].

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{BridgeStage, TransactionHash};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BridgeEvent {
	IntentCreated {
		intent_id: String,
	},
	StageChanged {
		intent_id: String,
		from: BridgeStage,
		to: BridgeStage,
	},
	QuoteSelected {
		intent_id: String,
		solver: String,
		fee: u128,
	},
	SignatureRequested {
		intent_id: String,
		handle: String,
	},
	TransactionPending {
		intent_id: String,
		tx_hash: TransactionHash,
	},
	TransactionConfirmed {
		intent_id: String,
		tx_hash: TransactionHash,
		block_number: u64,
	},
	IntentCompleted {
		intent_id: String,
	},
	IntentFailed {
		intent_id: String,
		stage: BridgeStage,
		error: String,
	},
	IntentCancelled {
		intent_id: String,
	},
}

pub struct EventBus {
	sender: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event. Lagging or absent subscribers never fail the
	/// pipeline, so send errors are ignored at call sites.
	pub fn publish(
		&self,
		event: BridgeEvent,
	) -> std::result::Result<(), broadcast::error::SendError<BridgeEvent>> {
		self.sender.send(event)?;
		Ok(())
	}
}

impl Clone for EventBus {
	fn clone(&self) -> Self {
		Self {
			sender: self.sender.clone(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn subscribers_receive_published_events() {
		let bus = EventBus::new(16);
		let mut rx = bus.subscribe();
		bus.publish(BridgeEvent::IntentCreated {
			intent_id: "abc".into(),
		})
		.unwrap();
		match rx.recv().await.unwrap() {
			BridgeEvent::IntentCreated { intent_id } => assert_eq!(intent_id, "abc"),
			other => panic!("unexpected event: {:?}", other),
		}
	}
}
