//! The Boop data model.
//!
//! A Boop is an account-abstraction operation to be carried to the chain by
//! the relay. Fixed-width fields mirror the entry point's wire format:
//! `nonce_track` is a uint192 and `nonce_value` a uint64, matching the
//! `BoopSubmitted(uint192,uint64,...)` event.

use alloy_primitives::{aliases::U192, Address, Bytes, I256, U256};
use serde::{Deserialize, Serialize};

/// An account-abstraction operation relayed through the entry point.
///
/// `validator_data` carries the signature (or whatever the account's
/// validator consumes) and is excluded from the boop hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Boop {
	/// The smart account the boop executes on.
	pub account: Address,
	/// The call target of the account's `execute`.
	pub dest: Address,
	/// Who pays for gas: the account itself (self-paying), a paymaster,
	/// or the zero address for submitter-sponsored boops.
	pub payer: Address,
	/// Native value forwarded with the call.
	pub value: U256,
	/// Nonce lane, independent lanes per account.
	pub nonce_track: U192,
	/// Sequential nonce within the track.
	pub nonce_value: u64,
	/// Max fee per gas the payer signed over (zero lets the relay fill it).
	pub max_fee_per_gas: U256,
	/// Flat fee owed to the submitter, may be negative (rebate).
	pub submitter_fee: I256,
	/// Total gas limit for the entry point call.
	pub gas_limit: u32,
	/// Gas limit for account validation.
	pub validate_gas_limit: u32,
	/// Gas limit for paymaster payment validation.
	pub validate_payment_gas_limit: u32,
	/// Gas limit for the account's `execute`.
	pub execute_gas_limit: u32,
	/// Calldata passed to the account's `execute`.
	pub call_data: Bytes,
	/// Validation payload, typically a signature. Not part of the hash.
	pub validator_data: Bytes,
	/// Extension key/value data interpreted by the account.
	pub extra_data: Bytes,
}

impl Boop {
	/// A self-paying boop pays for its own gas, so the relay may not
	/// alter its gas values (they are covered by the signature).
	pub fn is_self_paying(&self) -> bool {
		self.account == self.payer
	}

	/// True when every gas value a self-paying boop must sign over is set.
	pub fn has_gas_values(&self) -> bool {
		// validate_payment_gas_limit may be zero: it is not used when self-paying.
		!self.max_fee_per_gas.is_zero()
			&& self.gas_limit != 0
			&& self.validate_gas_limit != 0
			&& self.execute_gas_limit != 0
	}
}

/// EIP-1559 fee pair attached to an EVM transaction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasFees {
	pub max_fee_per_gas: u128,
	pub max_priority_fee_per_gas: u128,
}

impl GasFees {
	pub fn new(max_fee_per_gas: u128, max_priority_fee_per_gas: u128) -> Self {
		Self {
			max_fee_per_gas,
			max_priority_fee_per_gas,
		}
	}
}
