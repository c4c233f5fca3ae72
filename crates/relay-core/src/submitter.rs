//! Signing and broadcasting of attempts.
//!
//! An attempt is flushed to storage before it is broadcast, so a crash
//! between the two leaves a record of the signed transaction rather
//! than an untracked one in the mempool. The submitter also owns the
//! relay EOA's nonce counter; boop nonce lanes live in [`crate::nonce`].

use crate::EngineError;
use alloy_primitives::{Bytes, U256};
use relay_chain::{classify_send_error, ChainError, ChainService, SendErrorKind};
use relay_codec::encode_boop;
use relay_storage::{StorageService, NS_TRANSACTIONS};
use relay_types::{Attempt, AttemptType, GasFees, RelayTransaction, UnsignedTx};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Gas for a plain value transfer, used by cancellation attempts.
const TRANSFER_GAS: u64 = 21_000;

/// Why an attempt did not reach the mempool.
#[derive(Debug)]
pub enum SendError {
	/// The attempt was rolled back; the transaction record is unchanged.
	NotSent(EngineError),
	/// The attempt is recorded but the node rejected the broadcast.
	Rejected { kind: SendErrorKind, message: String },
}

pub struct Submitter {
	chain: Arc<ChainService>,
	storage: Arc<StorageService>,
	/// Next EOA nonce; `None` until synced from the chain.
	eoa_nonce: Mutex<Option<u64>>,
}

impl Submitter {
	pub fn new(chain: Arc<ChainService>, storage: Arc<StorageService>) -> Self {
		Self {
			chain,
			storage,
			eoa_nonce: Mutex::new(None),
		}
	}

	/// Re-reads the EOA nonce from the node's pending block.
	pub async fn resync_nonce(&self) -> Result<u64, EngineError> {
		let pending = self
			.chain
			.transaction_count(self.chain.sender(), true)
			.await?;
		let mut guard = self.eoa_nonce.lock().await;
		*guard = Some(pending);
		debug!(nonce = pending, "Resynced submitter nonce");
		Ok(pending)
	}

	async fn allocate_nonce(&self) -> Result<u64, EngineError> {
		let mut guard = self.eoa_nonce.lock().await;
		let next = match *guard {
			Some(n) => n,
			None => {
				drop(guard);
				self.resync_nonce().await?;
				guard = self.eoa_nonce.lock().await;
				guard.unwrap_or(0)
			}
		};
		*guard = Some(next + 1);
		Ok(next)
	}

	/// Returns an allocated-but-unused nonce, if no later allocation
	/// happened in between.
	async fn return_nonce(&self, nonce: u64) {
		let mut guard = self.eoa_nonce.lock().await;
		if *guard == Some(nonce + 1) {
			*guard = Some(nonce);
		}
	}

	/// Persists the transaction record under its boop hash.
	pub async fn persist(&self, tx: &RelayTransaction) -> Result<(), EngineError> {
		self.storage
			.store(NS_TRANSACTIONS, &tx.boop_hash.to_string(), tx)
			.await?;
		Ok(())
	}

	fn build_unsigned(
		&self,
		tx: &RelayTransaction,
		kind: AttemptType,
		fees: GasFees,
		nonce: u64,
	) -> Result<UnsignedTx, EngineError> {
		Ok(match kind {
			AttemptType::Original => UnsignedTx {
				to: tx.entry_point,
				value: U256::ZERO,
				input: self.chain.submit_call_data(encode_boop(&tx.boop)?),
				nonce,
				gas_limit: tx.evm_gas_limit,
				fees,
			},
			// A cancellation is a zero-value self-transfer occupying the
			// same nonce at a higher fee.
			AttemptType::Cancellation => UnsignedTx {
				to: self.chain.sender(),
				value: U256::ZERO,
				input: Bytes::new(),
				nonce,
				gas_limit: TRANSFER_GAS,
				fees,
			},
		})
	}

	/// Signs, records, and broadcasts one attempt. `reuse_nonce` makes
	/// this a replacement of an in-flight attempt; otherwise a fresh EOA
	/// nonce is allocated (and a stale local counter is resynced and
	/// retried once when the node reports it).
	pub async fn send_attempt(
		&self,
		tx: &mut RelayTransaction,
		kind: AttemptType,
		fees: GasFees,
		reuse_nonce: Option<u64>,
	) -> Result<Attempt, SendError> {
		let mut retried = false;
		loop {
			let (nonce, fresh) = match reuse_nonce {
				Some(nonce) => (nonce, false),
				None => (
					self.allocate_nonce().await.map_err(SendError::NotSent)?,
					true,
				),
			};

			let unsigned = match self.build_unsigned(tx, kind, fees, nonce) {
				Ok(unsigned) => unsigned,
				Err(e) => {
					if fresh {
						self.return_nonce(nonce).await;
					}
					return Err(SendError::NotSent(e));
				}
			};
			let gas_limit = unsigned.gas_limit;
			let signed = match self.chain.sign_transaction(unsigned).await {
				Ok(signed) => signed,
				Err(e) => {
					if fresh {
						self.return_nonce(nonce).await;
					}
					return Err(SendError::NotSent(e.into()));
				}
			};

			let attempt = Attempt {
				kind,
				hash: signed.hash,
				nonce,
				fees,
				gas: gas_limit,
			};
			tx.add_attempt(attempt.clone());

			// Flush before broadcast. If the record cannot be written the
			// attempt must not exist.
			if let Err(e) = self.persist(tx).await {
				tx.remove_attempt(attempt.hash);
				if fresh {
					self.return_nonce(nonce).await;
				}
				return Err(SendError::NotSent(e));
			}

			let message = match self.chain.broadcast(signed.raw).await {
				Ok(_) => return Ok(attempt),
				Err(ChainError::Network(message)) => message,
				Err(e) => e.to_string(),
			};

			match classify_send_error(&message) {
				// The node has it already; someone broadcast it for us.
				SendErrorKind::AlreadyKnown => return Ok(attempt),
				SendErrorKind::NonceTooLow if fresh && !retried => {
					warn!(nonce, "Submitter nonce was stale; resyncing");
					tx.remove_attempt(attempt.hash);
					if let Err(e) = self.persist(tx).await {
						return Err(SendError::NotSent(e));
					}
					if let Err(e) = self.resync_nonce().await {
						return Err(SendError::NotSent(e));
					}
					retried = true;
				}
				kind => {
					// A fresh-nonce attempt the node refused would leave
					// a nonce gap blocking every later attempt; roll it
					// back. Replacements stay recorded so the monitor
					// can escalate from them.
					if fresh {
						tx.remove_attempt(attempt.hash);
						let _ = self.persist(tx).await;
						self.return_nonce(nonce).await;
					}
					return Err(SendError::Rejected { kind, message });
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testutil::{fees, test_boop, MockChain};
	use alloy_primitives::Address;
	use relay_codec::compute_boop_hash;
	use relay_storage::implementations::memory::MemoryStorage;

	fn setup() -> (Arc<MockChain>, Submitter, RelayTransaction) {
		let mock = Arc::new(MockChain::new());
		let chain = Arc::new(ChainService::new(mock.clone()));
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let submitter = Submitter::new(chain, storage);

		let boop = test_boop();
		let hash = compute_boop_hash(&boop).unwrap();
		let tx = RelayTransaction::new(hash, boop, Address::repeat_byte(0xee), 200_000, 0, 300);
		(mock, submitter, tx)
	}

	#[tokio::test]
	async fn fresh_nonces_are_sequential_and_attempts_recorded() {
		let (mock, submitter, mut tx) = setup();
		mock.set_eoa_nonce(4, 4);

		let a = submitter
			.send_attempt(&mut tx, AttemptType::Original, fees(), None)
			.await
			.unwrap();
		let b = submitter
			.send_attempt(&mut tx, AttemptType::Original, fees(), None)
			.await
			.unwrap();

		assert_eq!(a.nonce, 4);
		assert_eq!(b.nonce, 5);
		assert_eq!(tx.attempts.len(), 2);
		assert_eq!(mock.broadcast_count(), 2);
	}

	#[tokio::test]
	async fn replacement_reuses_the_given_nonce() {
		let (mock, submitter, mut tx) = setup();
		mock.set_eoa_nonce(4, 4);

		let replacement = submitter
			.send_attempt(&mut tx, AttemptType::Cancellation, fees(), Some(9))
			.await
			.unwrap();
		assert_eq!(replacement.nonce, 9);
		assert_eq!(replacement.gas, TRANSFER_GAS);
	}

	#[tokio::test]
	async fn stale_nonce_is_resynced_and_retried_once() {
		let (mock, submitter, mut tx) = setup();
		mock.set_eoa_nonce(2, 2);
		submitter.resync_nonce().await.unwrap();

		// The chain moved on; the first broadcast bounces.
		mock.set_eoa_nonce(7, 7);
		mock.push_broadcast_error("nonce too low: next nonce 7");

		let attempt = submitter
			.send_attempt(&mut tx, AttemptType::Original, fees(), None)
			.await
			.unwrap();
		assert_eq!(attempt.nonce, 7);
		// The bounced attempt is gone from the record.
		assert_eq!(tx.attempts.len(), 1);
		assert_eq!(tx.attempts[0].nonce, 7);
	}

	#[tokio::test]
	async fn already_known_counts_as_sent() {
		let (mock, submitter, mut tx) = setup();
		mock.push_broadcast_error("already known");

		let attempt = submitter
			.send_attempt(&mut tx, AttemptType::Original, fees(), None)
			.await
			.unwrap();
		assert_eq!(tx.attempts.len(), 1);
		assert_eq!(tx.attempts[0].hash, attempt.hash);
		assert_eq!(mock.broadcast_count(), 0);
	}

	#[tokio::test]
	async fn underpriced_replacement_surfaces_as_rejected() {
		let (mock, submitter, mut tx) = setup();
		mock.push_broadcast_error("replacement transaction underpriced");

		let err = submitter
			.send_attempt(&mut tx, AttemptType::Original, fees(), Some(3))
			.await
			.unwrap_err();
		match err {
			SendError::Rejected { kind, .. } => assert_eq!(kind, SendErrorKind::Underpriced),
			other => panic!("unexpected error: {:?}", other),
		}
		// The attempt stays recorded for the monitor to escalate from.
		assert_eq!(tx.attempts.len(), 1);
	}
}
