//! Hand-written chain mock shared by the engine tests.

use alloy_primitives::{aliases::U192, keccak256, Address, Bytes, B256, I256, U256};
use async_trait::async_trait;
use relay_chain::{nonceValuesCall, ChainError, ChainInterface};
use relay_types::{
	BlockInfo, Boop, CallResult, GasFees, SignedTx, TxReceiptInfo, UnsignedTx,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use alloy_sol_types::SolCall;

pub fn test_boop() -> Boop {
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
		call_data: Bytes::from(vec![0xca, 0x11]),
		validator_data: Bytes::from(vec![0x51, 0x67]),
		extra_data: Bytes::new(),
	}
}

#[derive(Default)]
pub struct MockState {
	pub block: Option<BlockInfo>,
	pub eoa_nonce_latest: u64,
	pub eoa_nonce_pending: u64,
	pub receipts: HashMap<B256, TxReceiptInfo>,
	pub call_revert: Option<Bytes>,
	pub entry_nonces: HashMap<(Address, U192), u64>,
	pub estimate: u64,
	pub rewards: Vec<u128>,
	pub broadcasts: Vec<Bytes>,
	pub broadcast_errors: VecDeque<String>,
}

pub struct MockChain {
	sender: Address,
	pub state: Mutex<MockState>,
}

impl MockChain {
	pub fn new() -> Self {
		Self {
			sender: Address::repeat_byte(0x55),
			state: Mutex::new(MockState {
				estimate: 21_000,
				..MockState::default()
			}),
		}
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
		self.state.lock().unwrap()
	}

	pub fn set_block(&self, block: BlockInfo) {
		self.lock().block = Some(block);
	}

	pub fn set_estimate(&self, estimate: u64) {
		self.lock().estimate = estimate;
	}

	pub fn set_call_revert(&self, data: Bytes) {
		self.lock().call_revert = Some(data);
	}

	pub fn clear_call_revert(&self) {
		self.lock().call_revert = None;
	}

	pub fn set_eoa_nonce(&self, latest: u64, pending: u64) {
		let mut state = self.lock();
		state.eoa_nonce_latest = latest;
		state.eoa_nonce_pending = pending;
	}

	pub fn set_entry_nonce(&self, account: Address, track: U192, nonce: u64) {
		self.lock().entry_nonces.insert((account, track), nonce);
	}

	pub fn set_receipt(&self, receipt: TxReceiptInfo) {
		self.lock().receipts.insert(receipt.tx_hash, receipt);
	}

	pub fn push_broadcast_error(&self, message: &str) {
		self.lock().broadcast_errors.push_back(message.to_string());
	}

	pub fn broadcast_count(&self) -> usize {
		self.lock().broadcasts.len()
	}
}

#[async_trait]
impl ChainInterface for MockChain {
	fn sender(&self) -> Address {
		self.sender
	}

	async fn chain_id(&self) -> Result<u64, ChainError> {
		Ok(31337)
	}

	async fn latest_block(&self) -> Result<Option<BlockInfo>, ChainError> {
		Ok(self.lock().block)
	}

	async fn transaction_count(&self, _address: Address, pending: bool) -> Result<u64, ChainError> {
		let state = self.lock();
		Ok(if pending {
			state.eoa_nonce_pending
		} else {
			state.eoa_nonce_latest
		})
	}

	async fn get_receipt(&self, hash: B256) -> Result<Option<TxReceiptInfo>, ChainError> {
		Ok(self.lock().receipts.get(&hash).cloned())
	}

	async fn call(
		&self,
		_from: Address,
		_to: Address,
		data: Bytes,
	) -> Result<CallResult, ChainError> {
		if data.len() >= 4 && data[..4] == nonceValuesCall::SELECTOR {
			let call = nonceValuesCall::abi_decode(&data, true)
				.map_err(|e| ChainError::Network(e.to_string()))?;
			let nonce = *self
				.lock()
				.entry_nonces
				.get(&(call.account, call.track))
				.unwrap_or(&0);
			return Ok(CallResult::Ok(
				U256::from(nonce).to_be_bytes::<32>().to_vec().into(),
			));
		}
		match self.lock().call_revert.clone() {
			Some(data) => Ok(CallResult::Revert(data)),
			None => Ok(CallResult::Ok(Bytes::new())),
		}
	}

	async fn estimate_gas(
		&self,
		_from: Address,
		_to: Address,
		_data: Bytes,
	) -> Result<u64, ChainError> {
		Ok(self.lock().estimate)
	}

	async fn priority_fee_rewards(
		&self,
		_block_count: u64,
		_percentile: f64,
	) -> Result<Vec<u128>, ChainError> {
		Ok(self.lock().rewards.clone())
	}

	async fn sign_transaction(&self, tx: UnsignedTx) -> Result<SignedTx, ChainError> {
		// Deterministic fake signing: the "raw" bytes are a preimage of
		// nonce, fees, and input, so the hash is stable per attempt.
		let mut raw = Vec::new();
		raw.extend_from_slice(&tx.nonce.to_be_bytes());
		raw.extend_from_slice(&tx.fees.max_fee_per_gas.to_be_bytes());
		raw.extend_from_slice(&tx.fees.max_priority_fee_per_gas.to_be_bytes());
		raw.extend_from_slice(&tx.gas_limit.to_be_bytes());
		raw.extend_from_slice(tx.to.as_slice());
		raw.extend_from_slice(&tx.input);
		let hash = keccak256(&raw);
		Ok(SignedTx {
			hash,
			raw: raw.into(),
		})
	}

	async fn broadcast(&self, raw: Bytes) -> Result<B256, ChainError> {
		let mut state = self.lock();
		if let Some(message) = state.broadcast_errors.pop_front() {
			return Err(ChainError::Network(message));
		}
		state.broadcasts.push(raw.clone());
		Ok(keccak256(&raw))
	}

	async fn balance(&self, _address: Address) -> Result<U256, ChainError> {
		Ok(U256::from(u64::MAX))
	}
}

/// A receipt for the given attempt hash.
pub fn receipt(tx_hash: B256, success: bool, gas_used: u128) -> TxReceiptInfo {
	TxReceiptInfo {
		tx_hash,
		block_hash: B256::repeat_byte(0xb1),
		block_number: 10,
		gas_used,
		effective_gas_price: 1_000,
		success,
		logs: Vec::new(),
	}
}

/// Fees nobody escalates from in tests.
pub fn fees() -> GasFees {
	GasFees::new(1_000, 10)
}
