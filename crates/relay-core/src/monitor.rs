//! Per-block transaction monitoring.
//!
//! Every new head triggers one monitoring pass over the tracked boops:
//! race the in-flight attempts for a receipt, detect nonces consumed by
//! foreign transactions, cancel past-deadline boops, and replace stuck
//! attempts at escalated fees. Passes are serialized behind a gate with
//! a single queued block slot where the newest head wins; a pass always
//! works on fresh data, never on a backlog of stale heads.
//!
//! Failures inside a pass are logged and skipped, never propagated: one
//! unreachable receipt must not stall the rest of the working set.

use crate::events::EventBus;
use crate::gas::GasOracle;
use crate::heap::IndexedMinHeap;
use crate::nonce::NonceManager;
use crate::submitter::{SendError, Submitter};
use crate::EngineError;
use alloy_primitives::{Address, Bytes, B256};
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use relay_chain::{ChainService, SendErrorKind};
use relay_codec::{
	decode_entry_point_revert, decode_execute_outcome, encode_boop, execute_failure_from_logs,
};
use relay_config::{GasConfig, MonitorConfig};
use relay_storage::{StorageService, NS_RECEIPTS, NS_TRANSACTIONS};
use relay_types::{
	Attempt, AttemptType, BlockInfo, BoopReceipt, CallResult, OnchainStatus, RelayEvent,
	RelayTransaction, TransactionStatus, TxReceiptInfo,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

fn now_unix() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}

/// Capped exponential backoff between replacement attempts for one boop.
struct Backoff {
	delay: Duration,
	next_at: Instant,
}

pub struct TransactionMonitor {
	chain: Arc<ChainService>,
	storage: Arc<StorageService>,
	oracle: Arc<GasOracle>,
	submitter: Arc<Submitter>,
	nonces: Arc<NonceManager>,
	events: EventBus,
	cfg: MonitorConfig,
	gas_cfg: GasConfig,
	block_time: u64,
	pub(crate) transactions: DashMap<B256, RelayTransaction>,
	/// Tracked boops ordered by deadline, popped each pass.
	deadlines: Mutex<IndexedMinHeap<B256, u64>>,
	/// Boops already granted their one out-of-gas retry.
	oog_retried: DashMap<B256, ()>,
	backoff: DashMap<B256, Backoff>,
	/// Serializes passes; `try_lock` losers leave their block queued.
	pass_gate: tokio::sync::Mutex<()>,
	queued: Mutex<Option<BlockInfo>>,
}

impl TransactionMonitor {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		chain: Arc<ChainService>,
		storage: Arc<StorageService>,
		oracle: Arc<GasOracle>,
		submitter: Arc<Submitter>,
		nonces: Arc<NonceManager>,
		events: EventBus,
		cfg: MonitorConfig,
		gas_cfg: GasConfig,
		block_time: u64,
	) -> Self {
		Self {
			chain,
			storage,
			oracle,
			submitter,
			nonces,
			events,
			cfg,
			gas_cfg,
			block_time,
			transactions: DashMap::new(),
			deadlines: Mutex::new(IndexedMinHeap::new()),
			oog_retried: DashMap::new(),
			backoff: DashMap::new(),
			pass_gate: tokio::sync::Mutex::new(()),
			queued: Mutex::new(None),
		}
	}

	fn deadlines(&self) -> std::sync::MutexGuard<'_, IndexedMinHeap<B256, u64>> {
		self.deadlines.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Starts watching a transaction until it reaches a terminal status.
	pub fn track(&self, tx: RelayTransaction) {
		self.deadlines().insert(tx.boop_hash, tx.deadline);
		self.transactions.insert(tx.boop_hash, tx);
	}

	pub fn contains(&self, boop_hash: &B256) -> bool {
		self.transactions.contains_key(boop_hash)
	}

	pub fn status_of(&self, boop_hash: &B256) -> Option<TransactionStatus> {
		self.transactions.get(boop_hash).map(|tx| tx.status)
	}

	pub fn tracked_count(&self) -> usize {
		self.transactions.len()
	}

	/// Hashes of non-final transactions for the given account.
	pub fn pending_for(&self, account: Address) -> Vec<B256> {
		self.transactions
			.iter()
			.filter(|entry| entry.boop.account == account && !entry.status.is_final())
			.map(|entry| *entry.key())
			.collect()
	}

	/// Queues the block and runs passes while this caller holds the
	/// gate. A concurrent caller leaves its (newer) block in the queue
	/// slot and returns; the gate holder drains it.
	pub async fn on_new_block(&self, block: BlockInfo) {
		{
			let mut queued = self.queued.lock().unwrap_or_else(|e| e.into_inner());
			match *queued {
				Some(q) if q.number >= block.number => {}
				_ => *queued = Some(block),
			}
		}

		loop {
			{
				let Ok(_gate) = self.pass_gate.try_lock() else {
					return;
				};
				loop {
					let next = self
						.queued
						.lock()
						.unwrap_or_else(|e| e.into_inner())
						.take();
					let Some(block) = next else { break };
					self.run_pass(block).await;
				}
			}
			// A block queued between the final take and the gate release
			// must not sit until the next head arrives.
			if self
				.queued
				.lock()
				.unwrap_or_else(|e| e.into_inner())
				.is_none()
			{
				return;
			}
		}
	}

	async fn run_pass(&self, block: BlockInfo) {
		// The EOA nonce anchors the interrupted check; without it the
		// pass abstains rather than misclassify.
		let chain_nonce = match self
			.chain
			.transaction_count(self.chain.sender(), false)
			.await
		{
			Ok(nonce) => nonce,
			Err(e) => {
				warn!(block = block.number, error = %e, "Skipping monitor pass");
				return;
			}
		};

		// Deadline-ordered prefix that can no longer make it in time.
		let mut expired = std::collections::HashSet::new();
		{
			let mut deadlines = self.deadlines();
			while let Some((hash, _)) = deadlines.peek().map(|(k, p)| (*k, p)) {
				match self.transactions.get(&hash) {
					Some(tx) if !tx.is_expired(block.timestamp, self.block_time) => break,
					Some(_) => {
						deadlines.pop();
						expired.insert(hash);
					}
					// No longer tracked; drop the stale entry.
					None => {
						deadlines.pop();
					}
				}
			}
		}

		let mut touched: Vec<RelayTransaction> = Vec::new();
		let mut finals: Vec<B256> = Vec::new();
		let hashes: Vec<B256> = self.transactions.iter().map(|e| *e.key()).collect();
		for hash in hashes {
			let Some(tx) = self.transactions.get(&hash).map(|e| e.clone()) else {
				continue;
			};
			if tx.status.is_final() {
				// A final record whose flush failed last pass; retry it.
				match self.flush(&tx).await {
					Ok(()) => self.forget(&hash),
					Err(e) => {
						warn!(boop_hash = %hash, error = %e, "Could not flush transaction state")
					}
				}
				continue;
			}
			let before = tx.status;
			match self
				.process(tx, block, chain_nonce, expired.contains(&hash))
				.await
			{
				Ok(tx) => {
					let after = tx.status;
					let deadline = tx.deadline;
					self.transactions.insert(hash, tx.clone());
					touched.push(tx);
					if after != before {
						self.events.publish(RelayEvent::StatusChanged {
							boop_hash: hash,
							status: after,
						});
					}
					if after.is_final() {
						finals.push(hash);
					} else if expired.contains(&hash) && after == TransactionStatus::Pending {
						// The cancel did not go through; keep the deadline
						// so the next pass tries again.
						self.deadlines().insert(hash, deadline);
					}
				}
				Err(e) => {
					if expired.contains(&hash) {
						if let Some(tx) = self.transactions.get(&hash) {
							self.deadlines().insert(hash, tx.deadline);
						}
					}
					warn!(boop_hash = %hash, error = %e, "Monitoring step failed; will retry next block");
				}
			}
		}

		// One flush for the whole touched set; a failed write keeps the
		// record tracked so the next pass retries it.
		let mut unflushed = std::collections::HashSet::new();
		for tx in &touched {
			if let Err(e) = self.flush(tx).await {
				unflushed.insert(tx.boop_hash);
				warn!(boop_hash = %tx.boop_hash, error = %e, "Could not flush transaction state");
			}
		}
		for hash in &finals {
			if !unflushed.contains(hash) {
				self.forget(hash);
			}
		}
	}

	/// Writes the transaction record, with the purge TTL once final.
	async fn flush(&self, tx: &RelayTransaction) -> Result<(), EngineError> {
		if tx.status.is_final() {
			self.storage
				.store_with_ttl(
					NS_TRANSACTIONS,
					&tx.boop_hash.to_string(),
					tx,
					Some(Duration::from_secs(self.cfg.purge_after_secs)),
				)
				.await?;
		} else {
			self.storage
				.store(NS_TRANSACTIONS, &tx.boop_hash.to_string(), tx)
				.await?;
		}
		Ok(())
	}

	fn forget(&self, hash: &B256) {
		self.transactions.remove(hash);
		self.deadlines().remove(hash);
		self.oog_retried.remove(hash);
		self.backoff.remove(hash);
	}

	async fn process(
		&self,
		mut tx: RelayTransaction,
		block: BlockInfo,
		chain_nonce: u64,
		expired: bool,
	) -> Result<RelayTransaction, EngineError> {
		// Receipt race across the attempts that can still land; the
		// first lookup to resolve with a receipt wins.
		let in_air: Vec<Attempt> = tx.in_air_attempts().into_iter().cloned().collect();
		let mut lookups: FuturesUnordered<_> = in_air
			.iter()
			.map(|attempt| {
				let chain = self.chain.clone();
				async move { (attempt, chain.get_receipt(attempt.hash).await) }
			})
			.collect();
		let mut winner = None;
		while let Some((attempt, receipt)) = lookups.next().await {
			if let Some(receipt) = receipt? {
				winner = Some((attempt.clone(), receipt));
				break;
			}
		}
		drop(lookups);
		if let Some((attempt, receipt)) = winner {
			self.handle_receipt(&mut tx, &attempt, receipt, block).await?;
			return Ok(tx);
		}

		// No receipt, but the nonce is gone: a transaction the relay did
		// not emit consumed it (an external signer for the same key).
		if let Some(max_nonce) = in_air.iter().map(|a| a.nonce).max() {
			if max_nonce < chain_nonce {
				warn!(
					boop_hash = %tx.boop_hash,
					nonce = max_nonce,
					"Nonce consumed by a foreign transaction"
				);
				self.finalize(&mut tx, TransactionStatus::Interrupted);
				let _ = self.nonces.resync(tx.boop.account, tx.boop.nonce_track).await;
				return Ok(tx);
			}
		}

		if expired {
			match tx.status {
				TransactionStatus::Pending => {
					self.cancel(&mut tx).await;
					return Ok(tx);
				}
				TransactionStatus::NotAttempted => {
					self.finalize(&mut tx, TransactionStatus::Expired);
					return Ok(tx);
				}
				_ => {}
			}
		}

		// A recovered boop with no attempt yet (accepted, then the
		// service restarted): originate its first attempt now.
		if tx.attempts.is_empty() {
			let Some(fees) = self.oracle.suggest() else {
				return Ok(tx);
			};
			match self
				.submitter
				.send_attempt(&mut tx, AttemptType::Original, fees, None)
				.await
			{
				Ok(_) => {
					tx.status = TransactionStatus::Pending;
					tx.last_attempt_block = Some(block.number);
				}
				Err(e) => self.log_send_error(&tx, e),
			}
			return Ok(tx);
		}

		// Anchor the stuck check for attempts sent before the first pass.
		if tx.last_attempt_block.is_none() {
			tx.last_attempt_block = Some(block.number);
		}

		// Stuck: no inclusion since `stuck_after_blocks` past the nonce's
		// first attempt. Past the threshold a fresh replacement goes out
		// every pass, paced only by the backoff.
		let stuck = tx
			.last_attempt_block
			.is_some_and(|b| block.number.saturating_sub(b) >= self.cfg.stuck_after_blocks);
		if stuck && self.backoff_elapsed(&tx.boop_hash) {
			self.replace(&mut tx).await;
		}

		Ok(tx)
	}

	async fn handle_receipt(
		&self,
		tx: &mut RelayTransaction,
		attempt: &Attempt,
		receipt: TxReceiptInfo,
		block: BlockInfo,
	) -> Result<(), EngineError> {
		if attempt.kind == AttemptType::Cancellation {
			info!(boop_hash = %tx.boop_hash, "Cancellation mined");
			self.finalize(tx, TransactionStatus::Cancelled);
			let _ = self.nonces.resync(tx.boop.account, tx.boop.nonce_track).await;
			return Ok(());
		}

		if receipt.success {
			let (status, description, revert_data) =
				match execute_failure_from_logs(&receipt.logs) {
					Some((status, data)) => {
						let decoded = decode_execute_outcome(status, &data);
						(decoded.status, decoded.description, decoded.revert_data)
					}
					None => (
						OnchainStatus::Success,
						"The boop executed successfully.".to_string(),
						None,
					),
				};
			let tx_status = if status == OnchainStatus::Success {
				TransactionStatus::Success
			} else {
				// Mined, but the boop did not take effect.
				TransactionStatus::Failed
			};
			self.store_receipt(tx, &receipt, status, description, revert_data)
				.await?;
			self.finalize(tx, tx_status);
			// The entry point consumed the boop nonce either way.
			self.nonces
				.advance(tx.boop.account, tx.boop.nonce_track, tx.boop.nonce_value)
				.await;
			return Ok(());
		}

		// The submit transaction itself reverted.
		if is_out_of_gas(attempt, &receipt) && !self.oog_retried.contains_key(&tx.boop_hash) {
			// The entry point ran out of gas with our limit; grant one
			// retry at a doubled limit on a fresh nonce. The reverted
			// attempt is dropped so later passes do not race its receipt.
			self.oog_retried.insert(tx.boop_hash, ());
			tx.remove_attempt(attempt.hash);
			tx.evm_gas_limit = (tx.evm_gas_limit * 2).min(self.gas_cfg.max_gas_limit);
			warn!(
				boop_hash = %tx.boop_hash,
				gas = tx.evm_gas_limit,
				"Submit ran out of gas; retrying with a raised limit"
			);
			let fees = self.oracle.escalate(attempt.fees).fees;
			match self
				.submitter
				.send_attempt(tx, AttemptType::Original, fees, None)
				.await
			{
				Ok(_) => tx.last_attempt_block = Some(block.number),
				Err(e) => self.log_send_error(tx, e),
			}
			return Ok(());
		}

		let decoded = self.rederive_revert(tx, attempt, &receipt).await;
		self.store_receipt(tx, &receipt, decoded.0, decoded.1, decoded.2)
			.await?;
		self.finalize(tx, TransactionStatus::Failed);
		// Whether the boop nonce was consumed depends on the revert;
		// re-read the lane head instead of guessing.
		let _ = self.nonces.resync(tx.boop.account, tx.boop.nonce_track).await;
		Ok(())
	}

	/// Receipts carry no revert data; replay the call to recover it.
	async fn rederive_revert(
		&self,
		tx: &RelayTransaction,
		attempt: &Attempt,
		receipt: &TxReceiptInfo,
	) -> (OnchainStatus, String, Option<Bytes>) {
		let oog = is_out_of_gas(attempt, receipt);
		let fallback = if oog {
			(
				OnchainStatus::EntryPointOutOfGas,
				"The entry point ran out of gas.".to_string(),
				None,
			)
		} else {
			(
				OnchainStatus::UnexpectedReverted,
				"The submit transaction reverted and the cause could not be recovered."
					.to_string(),
				None,
			)
		};

		let Ok(encoded) = encode_boop(&tx.boop) else {
			return fallback;
		};
		match self
			.chain
			.simulate_submit(tx.entry_point, self.chain.sender(), encoded)
			.await
		{
			Ok(CallResult::Revert(data)) => {
				let decoded = decode_entry_point_revert(&tx.boop, &data);
				(decoded.status, decoded.description, decoded.revert_data)
			}
			_ => fallback,
		}
	}

	/// Replaces the past-deadline boop with a no-op at the same nonce.
	async fn cancel(&self, tx: &mut RelayTransaction) {
		let Some(latest) = tx.latest_attempt().cloned() else {
			self.finalize(tx, TransactionStatus::Expired);
			return;
		};
		info!(boop_hash = %tx.boop_hash, deadline = tx.deadline, "Deadline passed; cancelling");
		let fees = self.oracle.escalate(latest.fees).fees;
		match self
			.submitter
			.send_attempt(tx, AttemptType::Cancellation, fees, Some(latest.nonce))
			.await
		{
			Ok(_) => tx.status = TransactionStatus::Cancelling,
			Err(e) => self.log_send_error(tx, e),
		}
	}

	/// Rebroadcasts the latest attempt at escalated fees and same nonce.
	async fn replace(&self, tx: &mut RelayTransaction) {
		let Some(latest) = tx.latest_attempt().cloned() else {
			return;
		};
		let escalated = self.oracle.escalate(latest.fees);
		if escalated.at_ceiling {
			// Nothing more to give. Keep rebroadcasting at the ceiling
			// and make noise; this needs operator attention (basefee
			// above the configured maximum, or a nonce gap ahead of us).
			error!(
				boop_hash = %tx.boop_hash,
				nonce = latest.nonce,
				max_fee_per_gas = latest.fees.max_fee_per_gas,
				"Fee ceiling reached while replacing a stuck transaction"
			);
			self.events.publish(RelayEvent::FeeCeilingReached {
				account: self.chain.sender(),
				nonce: latest.nonce,
			});
		}
		debug!(
			boop_hash = %tx.boop_hash,
			nonce = latest.nonce,
			max_fee_per_gas = escalated.fees.max_fee_per_gas,
			"Replacing stuck attempt"
		);
		match self
			.submitter
			.send_attempt(tx, latest.kind, escalated.fees, Some(latest.nonce))
			.await
		{
			Ok(_) => self.bump_backoff(&tx.boop_hash, false),
			Err(SendError::Rejected {
				kind: SendErrorKind::Underpriced,
				..
			}) => {
				// Someone outbid even the escalated fee; try again
				// immediately next pass.
				self.bump_backoff(&tx.boop_hash, true);
			}
			Err(e) => {
				self.log_send_error(tx, e);
				self.bump_backoff(&tx.boop_hash, false);
			}
		}
	}

	fn log_send_error(&self, tx: &RelayTransaction, err: SendError) {
		match err {
			SendError::NotSent(e) => {
				warn!(boop_hash = %tx.boop_hash, error = %e, "Attempt rolled back")
			}
			SendError::Rejected { kind, message } => {
				warn!(boop_hash = %tx.boop_hash, ?kind, message, "Broadcast rejected")
			}
		}
	}

	fn backoff_elapsed(&self, hash: &B256) -> bool {
		self.backoff
			.get(hash)
			.map_or(true, |b| Instant::now() >= b.next_at)
	}

	fn bump_backoff(&self, hash: &B256, immediate: bool) {
		let initial = Duration::from_millis(self.cfg.backoff_initial_ms);
		let max = Duration::from_millis(self.cfg.backoff_max_ms);
		let mut entry = self.backoff.entry(*hash).or_insert_with(|| Backoff {
			delay: initial,
			next_at: Instant::now(),
		});
		if immediate {
			entry.next_at = Instant::now();
			return;
		}
		entry.next_at = Instant::now() + entry.delay;
		entry.delay = (entry.delay * 2).min(max);
	}

	async fn store_receipt(
		&self,
		tx: &RelayTransaction,
		receipt: &TxReceiptInfo,
		status: OnchainStatus,
		description: String,
		revert_data: Option<Bytes>,
	) -> Result<(), EngineError> {
		let boop_receipt = BoopReceipt {
			boop_hash: tx.boop_hash,
			entry_point: tx.entry_point,
			status,
			description,
			revert_data,
			evm_tx_hash: receipt.tx_hash,
			block_hash: receipt.block_hash,
			block_number: receipt.block_number,
			gas_price: receipt.effective_gas_price,
			boop: tx.boop.clone(),
			logs: receipt.logs.clone(),
		};
		self.storage
			.store_with_ttl(
				NS_RECEIPTS,
				&tx.boop_hash.to_string(),
				&boop_receipt,
				Some(Duration::from_secs(self.cfg.purge_after_secs)),
			)
			.await?;
		self.events.publish(RelayEvent::ReceiptAvailable {
			boop_hash: tx.boop_hash,
		});
		Ok(())
	}

	/// Marks the record final. The batch flush at the end of the pass
	/// writes it out.
	fn finalize(&self, tx: &mut RelayTransaction, status: TransactionStatus) {
		tx.status = status;
		tx.finalized_at = Some(now_unix());
	}
}

/// The out-of-gas heuristic: a transaction that consumed exactly its gas
/// limit ran out. Nothing on chain marks OOG explicitly.
fn is_out_of_gas(attempt: &Attempt, receipt: &TxReceiptInfo) -> bool {
	receipt.gas_used == attempt.gas as u128
}
