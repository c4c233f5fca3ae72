//! RPC boundary for the boop relay.
//!
//! This crate abstracts the chain behind the [`ChainInterface`] trait,
//! with an Alloy-backed implementation for EVM nodes. The engine only
//! ever talks to [`ChainService`], which adds the entry point ABI on top
//! of the raw interface.

use alloy_primitives::{aliases::U192, Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use relay_types::{BlockInfo, CallResult, SignedTx, TxReceiptInfo, UnsignedTx};
use std::sync::Arc;
use thiserror::Error;

pub mod blocks;

/// Re-export implementations
pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

sol! {
	function submit(bytes boop) external;
	function nonceValues(address account, uint192 track) external view returns (uint64);
}

/// Errors that can occur at the RPC boundary.
#[derive(Debug, Error)]
pub enum ChainError {
	/// Transport or node-side failure. The message is kept verbatim so
	/// callers can classify node rejections (nonce, fee replacement).
	#[error("Network error: {0}")]
	Network(String),
	/// Local signing failure.
	#[error("Signer error: {0}")]
	Signer(String),
	/// Invalid chain configuration.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Node rejection classes the engine reacts to when a broadcast fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
	/// The nonce was already consumed on chain.
	NonceTooLow,
	/// The replacement fee was not high enough to displace the previous
	/// transaction at this nonce.
	Underpriced,
	/// The node already has this exact transaction.
	AlreadyKnown,
	Other,
}

/// Classifies a node's broadcast rejection from its error message. There
/// is no standard error code for these, so nodes are matched on the
/// message substrings geth and its derivatives use.
pub fn classify_send_error(message: &str) -> SendErrorKind {
	let lower = message.to_lowercase();
	if lower.contains("nonce too low") {
		SendErrorKind::NonceTooLow
	} else if lower.contains("replacement") || lower.contains("underpriced") {
		SendErrorKind::Underpriced
	} else if lower.contains("already imported") || lower.contains("already known") {
		SendErrorKind::AlreadyKnown
	} else {
		SendErrorKind::Other
	}
}

/// Trait defining the low-level chain operations the relay needs.
#[async_trait]
pub trait ChainInterface: Send + Sync {
	/// The submitter EOA all attempts are signed with.
	fn sender(&self) -> Address;

	async fn chain_id(&self) -> Result<u64, ChainError>;

	/// The latest block header, `None` before the first block.
	async fn latest_block(&self) -> Result<Option<BlockInfo>, ChainError>;

	/// Account nonce, from the latest or the pending block.
	async fn transaction_count(&self, address: Address, pending: bool) -> Result<u64, ChainError>;

	/// Receipt for a transaction hash, `None` while unmined.
	async fn get_receipt(&self, hash: B256) -> Result<Option<TxReceiptInfo>, ChainError>;

	/// `eth_call`; contract reverts surface as [`CallResult::Revert`],
	/// not as errors.
	async fn call(&self, from: Address, to: Address, data: Bytes) -> Result<CallResult, ChainError>;

	async fn estimate_gas(
		&self,
		from: Address,
		to: Address,
		data: Bytes,
	) -> Result<u64, ChainError>;

	/// Priority fee rewards at the given percentile over recent blocks,
	/// one entry per block.
	async fn priority_fee_rewards(
		&self,
		block_count: u64,
		percentile: f64,
	) -> Result<Vec<u128>, ChainError>;

	/// Signs an EIP-1559 transaction locally, so the hash is known
	/// before broadcast.
	async fn sign_transaction(&self, tx: UnsignedTx) -> Result<SignedTx, ChainError>;

	/// Broadcasts a raw signed transaction.
	async fn broadcast(&self, raw: Bytes) -> Result<B256, ChainError>;

	async fn balance(&self, address: Address) -> Result<U256, ChainError>;
}

/// High-level chain service wrapping a [`ChainInterface`] with the entry
/// point ABI.
pub struct ChainService {
	implementation: Arc<dyn ChainInterface>,
}

impl ChainService {
	pub fn new(implementation: Arc<dyn ChainInterface>) -> Self {
		Self { implementation }
	}

	pub fn sender(&self) -> Address {
		self.implementation.sender()
	}

	pub async fn chain_id(&self) -> Result<u64, ChainError> {
		self.implementation.chain_id().await
	}

	pub async fn latest_block(&self) -> Result<Option<BlockInfo>, ChainError> {
		self.implementation.latest_block().await
	}

	pub async fn transaction_count(
		&self,
		address: Address,
		pending: bool,
	) -> Result<u64, ChainError> {
		self.implementation.transaction_count(address, pending).await
	}

	pub async fn get_receipt(&self, hash: B256) -> Result<Option<TxReceiptInfo>, ChainError> {
		self.implementation.get_receipt(hash).await
	}

	pub async fn estimate_gas(
		&self,
		from: Address,
		to: Address,
		data: Bytes,
	) -> Result<u64, ChainError> {
		self.implementation.estimate_gas(from, to, data).await
	}

	pub async fn priority_fee_rewards(
		&self,
		block_count: u64,
		percentile: f64,
	) -> Result<Vec<u128>, ChainError> {
		self.implementation
			.priority_fee_rewards(block_count, percentile)
			.await
	}

	pub async fn sign_transaction(&self, tx: UnsignedTx) -> Result<SignedTx, ChainError> {
		self.implementation.sign_transaction(tx).await
	}

	pub async fn broadcast(&self, raw: Bytes) -> Result<B256, ChainError> {
		self.implementation.broadcast(raw).await
	}

	pub async fn balance(&self, address: Address) -> Result<U256, ChainError> {
		self.implementation.balance(address).await
	}

	/// Calldata for the entry point's `submit` with an encoded boop.
	pub fn submit_call_data(&self, encoded_boop: Bytes) -> Bytes {
		submitCall { boop: encoded_boop }.abi_encode().into()
	}

	/// Simulates the entry point `submit` via `eth_call` from the given
	/// sender (the zero address to skip sender checks during simulation).
	pub async fn simulate_submit(
		&self,
		entry_point: Address,
		from: Address,
		encoded_boop: Bytes,
	) -> Result<CallResult, ChainError> {
		let data = self.submit_call_data(encoded_boop);
		self.implementation.call(from, entry_point, data).await
	}

	/// Reads the account's current nonce on the given track from the
	/// entry point.
	pub async fn entry_point_nonce(
		&self,
		entry_point: Address,
		account: Address,
		track: U192,
	) -> Result<u64, ChainError> {
		let data = nonceValuesCall { account, track }.abi_encode();
		let result = self
			.implementation
			.call(Address::ZERO, entry_point, data.into())
			.await?;
		match result {
			CallResult::Ok(ret) => {
				let decoded = nonceValuesCall::abi_decode_returns(&ret, true)
					.map_err(|e| ChainError::Network(format!("Bad nonceValues return: {}", e)))?;
				Ok(decoded._0)
			}
			CallResult::Revert(data) => Err(ChainError::Network(format!(
				"nonceValues reverted: 0x{}",
				hex::encode(data)
			))),
		}
	}
}
