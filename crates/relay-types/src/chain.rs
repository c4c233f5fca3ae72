//! Chain-facing value types shared between the RPC boundary and the engine.

use crate::{BoopLog, GasFees};
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// Snapshot of a block header, as observed by the block feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
	pub number: u64,
	pub timestamp: u64,
	pub base_fee_per_gas: Option<u128>,
	pub gas_used: u128,
	pub gas_limit: u128,
}

/// A mined EVM transaction receipt, trimmed to the fields the relay uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceiptInfo {
	pub tx_hash: B256,
	pub block_hash: B256,
	pub block_number: u64,
	pub gas_used: u128,
	pub effective_gas_price: u128,
	pub success: bool,
	pub logs: Vec<BoopLog>,
}

/// An EIP-1559 transaction the relay is about to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
	pub to: Address,
	pub value: U256,
	pub input: Bytes,
	pub nonce: u64,
	pub gas_limit: u64,
	pub fees: GasFees,
}

/// A locally signed transaction: the hash is known before broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
	pub hash: B256,
	pub raw: Bytes,
}

/// Outcome of an `eth_call`: either return data or revert data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResult {
	Ok(Bytes),
	Revert(Bytes),
}
