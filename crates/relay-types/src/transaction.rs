//! The relayed transaction wrapping a boop and its broadcast attempts.

use crate::{Boop, GasFees};
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a relayed transaction.
///
/// Terminal states (`Success`, `Failed`, `Cancelled`, `Expired`,
/// `Interrupted`) are never left once entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionStatus {
	/// Accepted but no EVM transaction broadcast yet.
	NotAttempted,
	/// At least one attempt is in flight.
	Pending,
	/// Mined but the boop did not take effect, or submission failed hard.
	Failed,
	/// Deadline passed before any attempt could be mined or cancelled.
	Expired,
	/// Deadline passed, a cancellation attempt is in flight.
	Cancelling,
	/// A cancellation attempt was mined; the boop never took effect.
	Cancelled,
	/// The nonce was consumed by a transaction the relay did not emit.
	Interrupted,
	/// Mined and the boop took effect.
	Success,
}

impl TransactionStatus {
	/// Whether the status is terminal.
	pub fn is_final(&self) -> bool {
		matches!(
			self,
			TransactionStatus::Success
				| TransactionStatus::Failed
				| TransactionStatus::Cancelled
				| TransactionStatus::Expired
				| TransactionStatus::Interrupted
		)
	}
}

impl fmt::Display for TransactionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			TransactionStatus::NotAttempted => "NotAttempted",
			TransactionStatus::Pending => "Pending",
			TransactionStatus::Failed => "Failed",
			TransactionStatus::Expired => "Expired",
			TransactionStatus::Cancelling => "Cancelling",
			TransactionStatus::Cancelled => "Cancelled",
			TransactionStatus::Interrupted => "Interrupted",
			TransactionStatus::Success => "Success",
		};
		write!(f, "{}", s)
	}
}

/// Whether an attempt carries the boop or replaces it with a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptType {
	/// Carries the entry point `submit` call.
	Original,
	/// Zero-value self-transfer replacing the boop at the same nonce.
	Cancellation,
}

/// A single signed-and-broadcast EVM transaction for a relayed boop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
	pub kind: AttemptType,
	/// EVM transaction hash, known before broadcast (locally signed).
	pub hash: B256,
	/// Submitter EOA nonce the attempt occupies.
	pub nonce: u64,
	pub fees: GasFees,
	/// Gas limit of the EVM transaction.
	pub gas: u64,
}

/// A boop under the relay's care, with its attempt history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayTransaction {
	/// Hash of the boop with `validator_data` zeroed.
	pub boop_hash: B256,
	pub boop: Boop,
	/// Entry point the boop is submitted through.
	pub entry_point: Address,
	pub status: TransactionStatus,
	/// All attempts ever emitted, including replaced ones.
	pub attempts: Vec<Attempt>,
	/// Gas limit used for `submit` attempts, derived from simulation.
	pub evm_gas_limit: u64,
	/// Unix seconds after which the boop must not be mined.
	pub deadline: u64,
	/// Unix seconds at which the relay accepted the boop.
	pub created_at: u64,
	/// Block at which the current nonce's first attempt went out; the
	/// stuck check measures from here, and replacements do not move it.
	pub last_attempt_block: Option<u64>,
	/// Unix seconds at which a terminal status was reached.
	pub finalized_at: Option<u64>,
}

impl RelayTransaction {
	pub fn new(
		boop_hash: B256,
		boop: Boop,
		entry_point: Address,
		evm_gas_limit: u64,
		created_at: u64,
		deadline: u64,
	) -> Self {
		Self {
			boop_hash,
			boop,
			entry_point,
			status: TransactionStatus::NotAttempted,
			attempts: Vec::new(),
			evm_gas_limit,
			deadline,
			created_at,
			last_attempt_block: None,
			finalized_at: None,
		}
	}

	/// Attempts that can still be mined: those at the highest nonce ever
	/// used. Attempts at lower nonces were replaced and can no longer land.
	pub fn in_air_attempts(&self) -> Vec<&Attempt> {
		let Some(max_nonce) = self.attempts.iter().map(|a| a.nonce).max() else {
			return Vec::new();
		};
		self.attempts
			.iter()
			.filter(|a| a.nonce == max_nonce)
			.collect()
	}

	/// The most recently added attempt, if any.
	pub fn latest_attempt(&self) -> Option<&Attempt> {
		self.attempts.last()
	}

	pub fn add_attempt(&mut self, attempt: Attempt) {
		self.attempts.push(attempt);
	}

	/// Removes an attempt that was never broadcast (flush failed).
	pub fn remove_attempt(&mut self, hash: B256) {
		self.attempts.retain(|a| a.hash != hash);
	}

	/// Whether the boop can no longer be mined before its deadline: a
	/// transaction included in the next block would carry roughly
	/// `block_timestamp + block_time`.
	pub fn is_expired(&self, block_timestamp: u64, block_time: u64) -> bool {
		block_timestamp.saturating_add(block_time) > self.deadline
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::{aliases::U192, Address, Bytes, I256, U256};

	fn test_boop() -> Boop {
		Boop {
			account: Address::repeat_byte(0x11),
			dest: Address::repeat_byte(0x22),
			payer: Address::ZERO,
			value: U256::ZERO,
			nonce_track: U192::ZERO,
			nonce_value: 0,
			max_fee_per_gas: U256::ZERO,
			submitter_fee: I256::ZERO,
			gas_limit: 0,
			validate_gas_limit: 0,
			validate_payment_gas_limit: 0,
			execute_gas_limit: 0,
			call_data: Bytes::new(),
			validator_data: Bytes::new(),
			extra_data: Bytes::new(),
		}
	}

	fn attempt(nonce: u64, byte: u8) -> Attempt {
		Attempt {
			kind: AttemptType::Original,
			hash: B256::repeat_byte(byte),
			nonce,
			fees: GasFees::new(100, 1),
			gas: 21_000,
		}
	}

	#[test]
	fn in_air_attempts_only_highest_nonce() {
		let mut tx = RelayTransaction::new(
			B256::repeat_byte(0xaa),
			test_boop(),
			Address::repeat_byte(0xee),
			100_000,
			0,
			60,
		);
		tx.add_attempt(attempt(5, 1));
		tx.add_attempt(attempt(6, 2));
		tx.add_attempt(attempt(6, 3));

		let in_air = tx.in_air_attempts();
		assert_eq!(in_air.len(), 2);
		assert!(in_air.iter().all(|a| a.nonce == 6));
	}

	#[test]
	fn remove_attempt_by_hash() {
		let mut tx = RelayTransaction::new(
			B256::repeat_byte(0xaa),
			test_boop(),
			Address::repeat_byte(0xee),
			100_000,
			0,
			60,
		);
		tx.add_attempt(attempt(1, 1));
		tx.add_attempt(attempt(1, 2));
		tx.remove_attempt(B256::repeat_byte(1));
		assert_eq!(tx.attempts.len(), 1);
		assert_eq!(tx.attempts[0].hash, B256::repeat_byte(2));
	}

	#[test]
	fn expiry_accounts_for_block_time() {
		let tx = RelayTransaction::new(
			B256::repeat_byte(0xaa),
			test_boop(),
			Address::repeat_byte(0xee),
			100_000,
			0,
			100,
		);
		assert!(!tx.is_expired(97, 2));
		assert!(!tx.is_expired(98, 2));
		assert!(tx.is_expired(99, 2));
	}

	#[test]
	fn final_statuses() {
		assert!(TransactionStatus::Success.is_final());
		assert!(TransactionStatus::Interrupted.is_final());
		assert!(!TransactionStatus::Pending.is_final());
		assert!(!TransactionStatus::Cancelling.is_final());
	}
}
