//! Simulation outcomes.

use crate::OnchainStatus;
use alloy_primitives::{Bytes, I256, U256};
use serde::{Deserialize, Serialize};

/// Result of simulating a boop against the entry point.
///
/// On success the gas fields carry what the relay would use to submit,
/// already inflated by the configured safety margin. The `*_unknown` and
/// `fee_too_low` flags record conditions that pass simulation but forbid
/// submission as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
	pub status: OnchainStatus,
	pub description: String,
	pub revert_data: Option<Bytes>,
	/// Gas limit for the whole entry point call.
	pub gas: u64,
	pub validate_gas: u32,
	pub validate_payment_gas: u32,
	pub execute_gas: u32,
	pub max_fee_per_gas: U256,
	pub submitter_fee: I256,
	/// Validation could not complete without more information (signature).
	pub validity_unknown: bool,
	/// Payment validation could not complete without more information.
	pub payment_validity_unknown: bool,
	/// The boop's nonce is ahead of the account's current nonce.
	pub future_nonce: bool,
	/// The current network fee exceeds the boop's `max_fee_per_gas`.
	pub fee_too_low: bool,
}

impl SimulationResult {
	/// A failed simulation, carrying only the rejection.
	pub fn rejection(
		status: OnchainStatus,
		description: impl Into<String>,
		revert_data: Option<Bytes>,
	) -> Self {
		Self {
			status,
			description: description.into(),
			revert_data,
			gas: 0,
			validate_gas: 0,
			validate_payment_gas: 0,
			execute_gas: 0,
			max_fee_per_gas: U256::ZERO,
			submitter_fee: I256::ZERO,
			validity_unknown: false,
			payment_validity_unknown: false,
			future_nonce: false,
			fee_too_low: false,
		}
	}
}
