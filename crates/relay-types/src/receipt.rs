//! On-chain outcome taxonomy, submitter-side errors, and boop receipts.

use crate::Boop;
use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of carrying a boop through the entry point, during simulation
/// or on-chain execution. Everything except `Success` is a rejection the
/// client can act on; none of these are relay infrastructure failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnchainStatus {
	/// The intended call was made without errors.
	Success,
	/// Simulation passed but validation outcome is unknown without more
	/// information, typically a signature over simulation-filled values.
	MissingValidationInformation,
	/// A self-paying boop was submitted without its gas fees and limits.
	MissingGasValues,
	/// The network gas price exceeded the boop's `max_fee_per_gas`.
	GasPriceTooLow,
	/// The nonce was invalid outside of simulation.
	InvalidNonce,
	/// The submitter or paymaster has insufficient stake.
	InsufficientStake,
	/// The account or paymaster rejected the signature.
	InvalidSignature,
	/// An extension value in `extra_data` is invalid.
	InvalidExtensionValue,
	/// The extension is already registered on the account.
	ExtensionAlreadyRegistered,
	/// The requested extension is not registered on the account.
	ExtensionNotRegistered,
	/// Account validation reverted.
	ValidationReverted,
	/// Account validation rejected the boop.
	ValidationRejected,
	/// Paymaster payment validation reverted.
	PaymentValidationReverted,
	/// Paymaster payment validation rejected the boop.
	PaymentValidationRejected,
	/// The account's `execute` reverted.
	ExecuteReverted,
	/// The account's `execute` returned a failure.
	ExecuteRejected,
	/// The call made by the account's `execute` reverted.
	CallReverted,
	/// A self-paying boop failed to pay the submitter.
	PayoutFailed,
	/// The entry point itself ran out of gas.
	EntryPointOutOfGas,
	/// An unexpected revert, in theory only possible with a faulty
	/// entry point. Out-of-gas reverts surface here until reclassified.
	UnexpectedReverted,
}

impl fmt::Display for OnchainStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", self)
	}
}

/// Relay infrastructure failures. These never appear in a [`BoopReceipt`]:
/// a receipt describes what happened on chain, while these describe the
/// relay failing to find out or to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmitterError {
	/// Too many future-nonce boops buffered for this (account, track).
	BufferExceeded,
	/// The relay is at its global buffered-boop capacity.
	OverCapacity,
	/// A boop with the same hash is already being processed.
	AlreadyProcessing,
	/// An RPC call failed in a way the relay could not classify.
	RpcError,
	/// An unexpected internal error.
	UnexpectedError,
	/// Simulation did not complete in time.
	SimulationTimeout,
	/// The boop could not be submitted in time.
	SubmitTimeout,
	/// No receipt could be produced in time.
	ReceiptTimeout,
	/// A same-hash boop replaced this one while it was buffered.
	BoopReplaced,
}

impl fmt::Display for SubmitterError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", self)
	}
}

/// A log emitted while executing a boop, trimmed to what clients need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoopLog {
	pub address: Address,
	pub topics: Vec<B256>,
	pub data: Bytes,
}

/// The final record of a boop's on-chain execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoopReceipt {
	pub boop_hash: B256,
	pub entry_point: Address,
	pub status: OnchainStatus,
	/// Human-readable explanation of the status.
	pub description: String,
	/// Raw revert payload when the failure carried one.
	pub revert_data: Option<Bytes>,
	/// The EVM transaction that carried (or cancelled) the boop.
	pub evm_tx_hash: B256,
	pub block_hash: B256,
	pub block_number: u64,
	pub gas_price: u128,
	pub boop: Boop,
	pub logs: Vec<BoopLog>,
}
