//! The transaction manager: the engine's public face.
//!
//! Wires the nonce lanes, gas oracle, submitter, and monitor together
//! over one chain and one storage backend. `submit` carries a boop
//! through admission (dedup, nonce lane, simulation) to its first
//! broadcast; `execute` additionally waits for the receipt.

use crate::events::EventBus;
use crate::gas::GasOracle;
use crate::monitor::TransactionMonitor;
use crate::nonce::{EntryPointNonceSource, NonceManager};
use crate::simulate::simulate_boop;
use crate::submitter::{SendError, Submitter};
use crate::{EngineError, SubmitError};
use alloy_primitives::{Address, B256};
use dashmap::DashMap;
use relay_chain::{blocks::BlockFeed, ChainError, ChainService};
use relay_codec::compute_boop_hash;
use relay_config::Config;
use relay_storage::{StorageError, StorageService, NS_RECEIPTS, NS_TRANSACTIONS};
use relay_types::{
	AttemptType, Boop, BoopReceipt, OnchainStatus, RelayEvent, RelayTransaction, SimulationResult,
	SubmitterError, TransactionStatus,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn now_unix() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}

/// Removes the boop from the in-flight set when admission ends, on
/// every path out of `submit`.
struct InFlightGuard<'a> {
	map: &'a DashMap<B256, ()>,
	hash: B256,
}

impl<'a> InFlightGuard<'a> {
	fn acquire(map: &'a DashMap<B256, ()>, hash: B256) -> Option<Self> {
		match map.entry(hash) {
			dashmap::mapref::entry::Entry::Occupied(_) => None,
			dashmap::mapref::entry::Entry::Vacant(slot) => {
				slot.insert(());
				Some(Self { map, hash })
			}
		}
	}
}

impl Drop for InFlightGuard<'_> {
	fn drop(&mut self) {
		self.map.remove(&self.hash);
	}
}

pub struct TransactionManager {
	cfg: Config,
	chain: Arc<ChainService>,
	storage: Arc<StorageService>,
	oracle: Arc<GasOracle>,
	nonces: Arc<NonceManager>,
	submitter: Arc<Submitter>,
	monitor: Arc<TransactionMonitor>,
	events: EventBus,
	/// Boops currently inside `submit`, for same-hash dedup.
	in_flight: DashMap<B256, ()>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TransactionManager {
	pub fn new(cfg: Config, chain: Arc<ChainService>, storage: Arc<StorageService>) -> Self {
		let events = EventBus::default();
		let oracle = Arc::new(GasOracle::new(cfg.gas.clone()));
		let nonces = Arc::new(NonceManager::new(
			cfg.nonce.clone(),
			Arc::new(EntryPointNonceSource::new(
				chain.clone(),
				cfg.chain.entry_point,
			)),
		));
		let submitter = Arc::new(Submitter::new(chain.clone(), storage.clone()));
		let monitor = Arc::new(TransactionMonitor::new(
			chain.clone(),
			storage.clone(),
			oracle.clone(),
			submitter.clone(),
			nonces.clone(),
			events.clone(),
			cfg.monitor.clone(),
			cfg.gas.clone(),
			cfg.chain.block_time_secs,
		));
		Self {
			cfg,
			chain,
			storage,
			oracle,
			nonces,
			submitter,
			monitor,
			events,
			in_flight: DashMap::new(),
			tasks: Mutex::new(Vec::new()),
		}
	}

	/// Brings the engine up: verifies the node, syncs the EOA nonce,
	/// warms the oracle, reloads unfinished transactions, and starts
	/// the block feed.
	pub async fn start(&self) -> Result<(), EngineError> {
		let node_chain_id = self.chain.chain_id().await?;
		if node_chain_id != self.cfg.chain.chain_id {
			return Err(ChainError::Configuration(format!(
				"Node reports chain id {} but the configuration expects {}",
				node_chain_id, self.cfg.chain.chain_id
			))
			.into());
		}

		self.submitter.resync_nonce().await?;

		match self.chain.balance(self.chain.sender()).await {
			Ok(balance) if balance.is_zero() => {
				warn!(sender = %self.chain.sender(), "Submitter account has no funds")
			}
			Ok(_) => {}
			Err(e) => warn!(error = %e, "Could not read the submitter balance"),
		}

		if let Some(block) = self.chain.latest_block().await? {
			let rewards = self.fetch_rewards().await;
			self.oracle.observe_block(block, &rewards);
		}

		let recovered: Vec<RelayTransaction> =
			self.storage.retrieve_all(NS_TRANSACTIONS).await?;
		let mut reloaded = 0;
		for tx in recovered {
			if !tx.status.is_final() {
				self.monitor.track(tx);
				reloaded += 1;
			}
		}
		if reloaded > 0 {
			info!(count = reloaded, "Reloaded unfinished transactions");
		}

		let (block_tx, mut block_rx) = mpsc::channel(16);
		let feed = BlockFeed::new(
			self.chain.clone(),
			Duration::from_millis(self.cfg.chain.poll_interval_ms),
		);
		let feed_task = tokio::spawn(feed.run(block_tx));

		let chain = self.chain.clone();
		let oracle = self.oracle.clone();
		let monitor = self.monitor.clone();
		let events = self.events.clone();
		let reward_blocks = self.cfg.gas.priority_fee_blocks;
		let percentile = self.cfg.gas.priority_fee_percentile as f64;
		let consumer = tokio::spawn(async move {
			while let Some(block) = block_rx.recv().await {
				let rewards = match chain.priority_fee_rewards(reward_blocks, percentile).await {
					Ok(rewards) => rewards,
					Err(e) => {
						debug!(error = %e, "No fee history this block");
						Vec::new()
					}
				};
				oracle.observe_block(block, &rewards);
				events.publish(RelayEvent::NewBlock {
					number: block.number,
					timestamp: block.timestamp,
				});
				monitor.on_new_block(block).await;
			}
		});

		if let Ok(mut tasks) = self.tasks.lock() {
			tasks.push(feed_task);
			tasks.push(consumer);
		}
		info!(
			chain_id = node_chain_id,
			entry_point = %self.cfg.chain.entry_point,
			sender = %self.chain.sender(),
			"Relay started"
		);
		Ok(())
	}

	pub fn shutdown(&self) {
		if let Ok(mut tasks) = self.tasks.lock() {
			for task in tasks.drain(..) {
				task.abort();
			}
		}
	}

	async fn fetch_rewards(&self) -> Vec<u128> {
		self.chain
			.priority_fee_rewards(
				self.cfg.gas.priority_fee_blocks,
				self.cfg.gas.priority_fee_percentile as f64,
			)
			.await
			.unwrap_or_default()
	}

	pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
		self.events.subscribe()
	}

	/// Simulates a boop against the entry point without submitting it.
	/// Rejections come back inside the result, not as errors.
	pub async fn simulate(&self, boop: Boop) -> Result<SimulationResult, EngineError> {
		let market = self.oracle.suggest();
		simulate_boop(
			&self.chain,
			self.cfg.chain.entry_point,
			&boop,
			&self.cfg.gas,
			market.map(|f| f.max_fee_per_gas),
		)
		.await
	}

	/// Carries a boop through admission and first broadcast. Returns the
	/// boop hash once the attempt is in the mempool; the monitor owns it
	/// from there.
	pub async fn submit(&self, boop: Boop) -> Result<B256, SubmitError> {
		let boop_hash = compute_boop_hash(&boop).map_err(|e| {
			SubmitError::rejected(
				OnchainStatus::UnexpectedReverted,
				format!("The boop could not be encoded: {}", e),
			)
		})?;

		let Some(_guard) = InFlightGuard::acquire(&self.in_flight, boop_hash) else {
			return Err(SubmitError::submitter(
				SubmitterError::AlreadyProcessing,
				"A boop with this hash is already being processed.",
			));
		};
		if self.monitor.contains(&boop_hash) {
			return Err(SubmitError::submitter(
				SubmitterError::AlreadyProcessing,
				"A boop with this hash is already in flight.",
			));
		}

		// Waits here until the boop is next in its lane.
		self.nonces
			.acquire(boop.account, boop.nonce_track, boop.nonce_value)
			.await?;

		let market = self.oracle.suggest();
		let sim = simulate_boop(
			&self.chain,
			self.cfg.chain.entry_point,
			&boop,
			&self.cfg.gas,
			market.map(|f| f.max_fee_per_gas),
		)
		.await?;

		if sim.status != OnchainStatus::Success {
			return Err(SubmitError::Rejected {
				status: sim.status,
				description: sim.description,
				revert_data: sim.revert_data,
			});
		}
		if sim.validity_unknown || sim.payment_validity_unknown {
			return Err(SubmitError::rejected(
				OnchainStatus::MissingValidationInformation,
				"Validation could not complete during simulation; the boop cannot be \
				 submitted as-is.",
			));
		}
		if sim.fee_too_low {
			return Err(SubmitError::rejected(
				OnchainStatus::GasPriceTooLow,
				"The boop's maxFeePerGas is below the current network fee.",
			));
		}

		let Some(mut fees) = market else {
			return Err(SubmitError::submitter(
				SubmitterError::RpcError,
				"No fee market data observed yet.",
			));
		};
		// A pinned maxFeePerGas caps what the relay may bid.
		if !boop.max_fee_per_gas.is_zero() {
			let cap = u128::try_from(boop.max_fee_per_gas).unwrap_or(u128::MAX);
			fees.max_fee_per_gas = fees.max_fee_per_gas.min(cap);
			fees.max_priority_fee_per_gas = fees.max_priority_fee_per_gas.min(fees.max_fee_per_gas);
		}

		let now = now_unix();
		let mut tx = RelayTransaction::new(
			boop_hash,
			boop,
			self.cfg.chain.entry_point,
			sim.gas,
			now,
			now + self.cfg.monitor.tx_timeout_secs,
		);

		match self
			.submitter
			.send_attempt(&mut tx, AttemptType::Original, fees, None)
			.await
		{
			Ok(_) => {}
			Err(SendError::NotSent(e)) => return Err(e.into()),
			Err(SendError::Rejected { kind, message }) => {
				warn!(boop_hash = %boop_hash, ?kind, message, "First broadcast rejected");
				return Err(SubmitError::submitter(SubmitterError::RpcError, message));
			}
		}

		tx.status = TransactionStatus::Pending;
		self.submitter.persist(&tx).await.map_err(SubmitError::from)?;
		self.monitor.track(tx);
		self.events.publish(RelayEvent::StatusChanged {
			boop_hash,
			status: TransactionStatus::Pending,
		});
		debug!(boop_hash = %boop_hash, "Boop submitted");
		Ok(boop_hash)
	}

	/// `submit` plus waiting for the boop's receipt.
	pub async fn execute(&self, boop: Boop) -> Result<BoopReceipt, SubmitError> {
		// Subscribe before submitting so a fast receipt is not missed.
		let events = self.events.subscribe();
		let boop_hash = self.submit(boop).await?;
		self.await_receipt(boop_hash, events).await
	}

	/// Waits for a previously submitted boop's receipt.
	pub async fn wait_for_receipt(&self, boop_hash: B256) -> Result<BoopReceipt, SubmitError> {
		let events = self.events.subscribe();
		self.await_receipt(boop_hash, events).await
	}

	async fn await_receipt(
		&self,
		boop_hash: B256,
		mut events: broadcast::Receiver<RelayEvent>,
	) -> Result<BoopReceipt, SubmitError> {
		let wait = async {
			loop {
				match self
					.storage
					.retrieve::<BoopReceipt>(NS_RECEIPTS, &boop_hash.to_string())
					.await
				{
					Ok(receipt) => return Ok(receipt),
					Err(StorageError::NotFound) => {}
					Err(e) => return Err(SubmitError::from(EngineError::from(e))),
				}

				match events.recv().await {
					Ok(RelayEvent::ReceiptAvailable { boop_hash: hash }) if hash == boop_hash => {}
					Ok(RelayEvent::StatusChanged { boop_hash: hash, status })
						if hash == boop_hash && status.is_final() =>
					{
						match status {
							TransactionStatus::Cancelled | TransactionStatus::Expired => {
								return Err(SubmitError::submitter(
									SubmitterError::SubmitTimeout,
									"The boop could not be mined before its deadline.",
								))
							}
							TransactionStatus::Interrupted => {
								return Err(SubmitError::submitter(
									SubmitterError::UnexpectedError,
									"The boop's slot was consumed by a foreign transaction.",
								))
							}
							// Success and Failed produce receipts; loop
							// back around to read it.
							_ => {}
						}
					}
					Ok(_) => {}
					Err(broadcast::error::RecvError::Lagged(_)) => {}
					Err(broadcast::error::RecvError::Closed) => {
						return Err(SubmitError::submitter(
							SubmitterError::UnexpectedError,
							"Event bus closed while waiting for a receipt.",
						))
					}
				}
			}
		};

		match tokio::time::timeout(
			Duration::from_millis(self.cfg.monitor.receipt_timeout_ms),
			wait,
		)
		.await
		{
			Ok(result) => result,
			Err(_) => Err(SubmitError::submitter(
				SubmitterError::ReceiptTimeout,
				"No receipt could be produced in time.",
			)),
		}
	}

	/// Current status of a tracked or persisted transaction.
	pub async fn status_of(&self, boop_hash: B256) -> Option<TransactionStatus> {
		if let Some(status) = self.monitor.status_of(&boop_hash) {
			return Some(status);
		}
		self.storage
			.retrieve::<RelayTransaction>(NS_TRANSACTIONS, &boop_hash.to_string())
			.await
			.ok()
			.map(|tx| tx.status)
	}

	/// The stored receipt, if the boop already reached one.
	pub async fn receipt_of(&self, boop_hash: B256) -> Result<Option<BoopReceipt>, EngineError> {
		match self
			.storage
			.retrieve::<BoopReceipt>(NS_RECEIPTS, &boop_hash.to_string())
			.await
		{
			Ok(receipt) => Ok(Some(receipt)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	/// Hashes of the account's boops that have not reached a terminal
	/// status yet.
	pub fn pending_boops(&self, account: Address) -> Vec<B256> {
		self.monitor.pending_for(account)
	}

	/// How many boops are parked waiting for earlier nonces.
	pub fn parked(&self) -> usize {
		self.nonces.parked()
	}

	/// How many transactions the monitor is tracking.
	pub fn tracked(&self) -> usize {
		self.monitor.tracked_count()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testutil::{receipt, test_boop, MockChain};
	use alloy_primitives::{Address, Bytes};
	use relay_config::{ChainConfig, GasConfig, MonitorConfig, NonceConfig, StorageConfig};
	use relay_storage::implementations::memory::MemoryStorage;
	use relay_types::BlockInfo;

	fn config(chain_id: u64) -> Config {
		Config {
			chain: ChainConfig {
				rpc_url: "http://localhost:8545".to_string(),
				chain_id,
				private_key: "0x01".to_string(),
				entry_point: Address::repeat_byte(0xee),
				block_time_secs: 2,
				poll_interval_ms: 1_000,
			},
			gas: GasConfig::default(),
			nonce: NonceConfig::default(),
			monitor: MonitorConfig::default(),
			storage: StorageConfig::default(),
		}
	}

	fn manager(mock: Arc<MockChain>) -> TransactionManager {
		let chain = Arc::new(ChainService::new(mock));
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		TransactionManager::new(config(31337), chain, storage)
	}

	fn warm(manager: &TransactionManager) {
		manager.oracle.observe_block(
			BlockInfo {
				number: 1,
				timestamp: 1_000,
				base_fee_per_gas: Some(100),
				gas_used: 15_000_000,
				gas_limit: 30_000_000,
			},
			&[10],
		);
	}

	#[tokio::test]
	async fn submit_broadcasts_and_tracks() {
		let mock = Arc::new(MockChain::new());
		mock.set_estimate(100_000);
		let manager = manager(mock.clone());
		warm(&manager);

		let hash = manager.submit(test_boop()).await.unwrap();

		assert_eq!(mock.broadcast_count(), 1);
		assert_eq!(manager.status_of(hash).await, Some(TransactionStatus::Pending));
		assert_eq!(manager.tracked(), 1);
	}

	#[tokio::test]
	async fn duplicate_submission_is_refused() {
		let mock = Arc::new(MockChain::new());
		let manager = manager(mock);
		warm(&manager);

		manager.submit(test_boop()).await.unwrap();
		let err = manager.submit(test_boop()).await.unwrap_err();
		assert!(matches!(
			err,
			SubmitError::Submitter {
				error: SubmitterError::AlreadyProcessing,
				..
			}
		));
	}

	#[tokio::test]
	async fn simulation_rejection_is_surfaced_and_nothing_tracked() {
		let mock = Arc::new(MockChain::new());
		mock.set_call_revert(Bytes::from(alloy_sol_types::SolError::abi_encode(
			&relay_codec::revert::InsufficientStake {},
		)));
		let manager = manager(mock.clone());
		warm(&manager);

		let err = manager.submit(test_boop()).await.unwrap_err();
		assert!(matches!(
			err,
			SubmitError::Rejected {
				status: OnchainStatus::InsufficientStake,
				..
			}
		));
		assert_eq!(manager.tracked(), 0);
		assert_eq!(mock.broadcast_count(), 0);
	}

	#[tokio::test]
	async fn without_fee_data_submission_is_refused() {
		let mock = Arc::new(MockChain::new());
		let manager = manager(mock);

		let err = manager.submit(test_boop()).await.unwrap_err();
		assert!(matches!(
			err,
			SubmitError::Submitter {
				error: SubmitterError::RpcError,
				..
			}
		));
	}

	#[tokio::test]
	async fn receipt_waiting_resolves_once_the_monitor_finalizes() {
		let mock = Arc::new(MockChain::new());
		let manager = manager(mock.clone());
		warm(&manager);

		let hash = manager.submit(test_boop()).await.unwrap();
		let attempt_hash = {
			let tx = manager.monitor.transactions.get(&hash).unwrap();
			tx.attempts[0].hash
		};
		mock.set_receipt(receipt(attempt_hash, true, 90_000));
		manager
			.monitor
			.on_new_block(BlockInfo {
				number: 2,
				timestamp: 1_002,
				base_fee_per_gas: Some(100),
				gas_used: 0,
				gas_limit: 30_000_000,
			})
			.await;

		let boop_receipt = manager.wait_for_receipt(hash).await.unwrap();
		assert_eq!(boop_receipt.status, OnchainStatus::Success);
		assert_eq!(boop_receipt.boop_hash, hash);
	}

	#[tokio::test]
	async fn simulate_reports_rejections_as_values() {
		let mock = Arc::new(MockChain::new());
		mock.set_call_revert(Bytes::from(alloy_sol_types::SolError::abi_encode(
			&relay_codec::revert::InvalidNonce {},
		)));
		let manager = manager(mock);
		warm(&manager);

		let out = manager.simulate(test_boop()).await.unwrap();
		assert_eq!(out.status, OnchainStatus::InvalidNonce);
		assert_eq!(manager.tracked(), 0);
	}

	#[tokio::test]
	async fn pending_boops_lists_the_accounts_open_transactions() {
		let mock = Arc::new(MockChain::new());
		let manager = manager(mock);
		warm(&manager);

		let hash = manager.submit(test_boop()).await.unwrap();

		assert_eq!(manager.pending_boops(test_boop().account), vec![hash]);
		assert!(manager.pending_boops(Address::repeat_byte(0x99)).is_empty());
	}

	#[tokio::test]
	async fn start_refuses_a_chain_id_mismatch() {
		let mock = Arc::new(MockChain::new());
		let chain = Arc::new(ChainService::new(mock));
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let manager = TransactionManager::new(config(1), chain, storage);

		let err = manager.start().await.unwrap_err();
		assert!(err.to_string().contains("chain id"));
	}
}
