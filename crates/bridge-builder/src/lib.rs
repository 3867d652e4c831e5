//! Destination-chain transaction construction.
//!
//! Builds the unsigned transactions of both pipelines: ticket purchases on
//! the lottery contract, ERC-20 approvals, burns on the token messenger, and
//! mints on the message transmitter. The signing digest is the EIP-2718
//! signing hash of the fully-specified transaction, so identical inputs
//! always produce identical digests and a retry that re-derives the digest
//! never silently mutates parameters without re-signing.

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{
	keccak256, Address as AlloyAddress, Bytes, TxKind, B256, U256,
};
use alloy_sol_types::{sol, SolCall};

use bridge_types::{
	Address, BridgeError, FeeEstimate, Intent, Result, SignatureResult, TransactionHash,
	UnsignedTransaction,
};

sol! {
	/// Lottery contract write capability.
	interface IMegapot {
		function purchaseTickets(address referrer, uint256 value, address recipient) external;
	}

	interface IERC20 {
		function approve(address spender, uint256 amount) external returns (bool);
	}

	/// Burn side of the attestation bridge.
	interface ITokenMessenger {
		function depositForBurn(
			uint256 amount,
			uint32 destinationDomain,
			bytes32 mintRecipient,
			address burnToken
		) external returns (uint64 nonce);
	}

	/// Mint side of the attestation bridge.
	interface IMessageTransmitter {
		function receiveMessage(bytes message, bytes attestation) external returns (bool success);
	}
}

/// Contract addresses the builder targets on the destination chain.
#[derive(Debug, Clone)]
pub struct ContractSet {
	/// Lottery contract receiving ticket purchases.
	pub megapot: Address,
	/// Bridged asset (USDC).
	pub token: Address,
	/// Token messenger used for burns.
	pub token_messenger: Address,
	/// Message transmitter used for mints.
	pub message_transmitter: Address,
	/// Referrer recorded on purchases when the intent carries none.
	pub default_referrer: Address,
}

/// Deterministic transaction builder.
pub struct TransactionBuilder {
	contracts: ContractSet,
	default_gas_limit: u64,
}

impl TransactionBuilder {
	pub fn new(contracts: ContractSet) -> Self {
		Self {
			contracts,
			default_gas_limit: 300_000,
		}
	}

	pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
		self.default_gas_limit = gas_limit;
		self
	}

	/// Builds the ticket-purchase transaction for an intent.
	///
	/// Fails with `BuildFailed` when the intent is missing its destination
	/// address or carries a zero amount or ticket count.
	pub fn build_purchase(
		&self,
		intent: &Intent,
		nonce: u64,
		fees: FeeEstimate,
	) -> Result<UnsignedTransaction> {
		let recipient = intent
			.destination_address
			.as_ref()
			.ok_or_else(|| BridgeError::BuildFailed("intent has no destination address".into()))?;
		if intent.amount == 0 {
			return Err(BridgeError::BuildFailed("intent amount is zero".into()));
		}
		if intent.payload.ticket_count == 0 {
			return Err(BridgeError::BuildFailed("ticket count is zero".into()));
		}

		let referrer = intent
			.payload
			.referrer
			.as_ref()
			.unwrap_or(&self.contracts.default_referrer);

		let call = IMegapot::purchaseTicketsCall {
			referrer: evm_address(referrer)?,
			value: U256::from(intent.amount),
			recipient: evm_address(recipient)?,
		};

		self.assemble_unsigned(
			&self.contracts.megapot,
			call.abi_encode(),
			intent.destination_chain_id,
			nonce,
			fees,
		)
	}

	/// Builds an ERC-20 approval for the token messenger.
	pub fn build_approve(
		&self,
		amount: u128,
		chain_id: u64,
		nonce: u64,
		fees: FeeEstimate,
	) -> Result<UnsignedTransaction> {
		let call = IERC20::approveCall {
			spender: evm_address(&self.contracts.token_messenger)?,
			amount: U256::from(amount),
		};
		self.assemble_unsigned(&self.contracts.token, call.abi_encode(), chain_id, nonce, fees)
	}

	/// Builds the burn transaction of the attestation path.
	pub fn build_burn(
		&self,
		intent: &Intent,
		source_chain_id: u64,
		destination_domain: u32,
		nonce: u64,
		fees: FeeEstimate,
	) -> Result<UnsignedTransaction> {
		let recipient = intent
			.destination_address
			.as_ref()
			.ok_or_else(|| BridgeError::BuildFailed("intent has no mint recipient".into()))?;
		if intent.amount == 0 {
			return Err(BridgeError::BuildFailed("intent amount is zero".into()));
		}

		let call = ITokenMessenger::depositForBurnCall {
			amount: U256::from(intent.amount),
			destinationDomain: destination_domain,
			mintRecipient: bytes32_address(recipient)?,
			burnToken: evm_address(&self.contracts.token)?,
		};

		self.assemble_unsigned(
			&self.contracts.token_messenger,
			call.abi_encode(),
			source_chain_id,
			nonce,
			fees,
		)
	}

	/// Builds the mint transaction from a persisted burn message and its
	/// attestation.
	pub fn build_mint(
		&self,
		message: &[u8],
		attestation: &[u8],
		chain_id: u64,
		nonce: u64,
		fees: FeeEstimate,
	) -> Result<UnsignedTransaction> {
		if message.is_empty() {
			return Err(BridgeError::BuildFailed("empty burn message".into()));
		}
		if attestation.is_empty() {
			return Err(BridgeError::BuildFailed("empty attestation".into()));
		}

		let call = IMessageTransmitter::receiveMessageCall {
			message: Bytes::copy_from_slice(message),
			attestation: Bytes::copy_from_slice(attestation),
		};

		self.assemble_unsigned(
			&self.contracts.message_transmitter,
			call.abi_encode(),
			chain_id,
			nonce,
			fees,
		)
	}

	fn assemble_unsigned(
		&self,
		to: &Address,
		data: Vec<u8>,
		chain_id: u64,
		nonce: u64,
		fees: FeeEstimate,
	) -> Result<UnsignedTransaction> {
		let mut unsigned = UnsignedTransaction {
			to: to.clone(),
			value: U256::ZERO,
			data,
			gas_limit: self.default_gas_limit,
			fees,
			nonce,
			chain_id,
			digest: [0u8; 32],
		};
		unsigned.digest = signing_digest(&unsigned)?.0;
		Ok(unsigned)
	}
}

/// Canonical signing digest of an unsigned transaction.
///
/// Pure in the transaction fields: identical inputs yield identical digests.
pub fn signing_digest(tx: &UnsignedTransaction) -> Result<B256> {
	Ok(eip1559_envelope(tx)?.signature_hash())
}

/// Assembles the raw signed transaction bytes and the resulting hash.
///
/// The hash is computed before submission so the broadcaster can look up a
/// receipt even when the RPC claims the transaction is already known.
pub fn assemble_signed(
	tx: &UnsignedTransaction,
	signature: &SignatureResult,
) -> Result<(Vec<u8>, TransactionHash)> {
	let envelope = eip1559_envelope(tx)?;
	let signed = envelope.into_signed(signature.to_primitive());
	let raw = TxEnvelope::Eip1559(signed).encoded_2718();
	let hash = keccak256(&raw);
	Ok((raw, TransactionHash(hash.to_vec())))
}

fn eip1559_envelope(tx: &UnsignedTransaction) -> Result<TxEip1559> {
	Ok(TxEip1559 {
		chain_id: tx.chain_id,
		nonce: tx.nonce,
		gas_limit: tx.gas_limit,
		max_fee_per_gas: tx.fees.max_fee_per_gas,
		max_priority_fee_per_gas: tx.fees.max_priority_fee_per_gas,
		to: TxKind::Call(evm_address(&tx.to)?),
		value: tx.value,
		access_list: Default::default(),
		input: Bytes::copy_from_slice(&tx.data),
	})
}

fn evm_address(address: &Address) -> Result<AlloyAddress> {
	if address.0.len() != 20 {
		return Err(BridgeError::BuildFailed(format!(
			"address {} is not 20 bytes",
			address
		)));
	}
	let mut bytes = [0u8; 20];
	bytes.copy_from_slice(&address.0);
	Ok(AlloyAddress::from(bytes))
}

fn bytes32_address(address: &Address) -> Result<B256> {
	let addr = evm_address(address)?;
	let mut out = [0u8; 32];
	out[12..].copy_from_slice(addr.as_slice());
	Ok(B256::from(out))
}
