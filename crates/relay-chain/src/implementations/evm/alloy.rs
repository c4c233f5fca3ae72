//! Alloy-backed chain implementation for EVM nodes.
//!
//! Signs transactions locally so attempt hashes are known before
//! broadcast, which the submitter relies on to persist attempts first.

use crate::{ChainError, ChainInterface};
use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_eips::eip2718::Encodable2718;
use alloy_network::TxSignerSync;
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::{BlockId, BlockNumberOrTag, BlockTransactionsKind, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use alloy_transport_http::Http;
use async_trait::async_trait;
use relay_types::{BlockInfo, BoopLog, CallResult, SignedTx, TxReceiptInfo, UnsignedTx};
use std::sync::Arc;

/// Alloy-based chain access over HTTP.
pub struct AlloyChain {
	provider: Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>,
	signer: PrivateKeySigner,
	sender: Address,
	chain_id: u64,
}

impl AlloyChain {
	/// Creates a new AlloyChain for the given RPC endpoint and signing
	/// key. The chain id is pinned at construction; it is verified
	/// against the node at engine startup.
	pub fn new(rpc_url: &str, private_key: &str, chain_id: u64) -> Result<Self, ChainError> {
		let url = rpc_url
			.parse()
			.map_err(|e| ChainError::Configuration(format!("Invalid RPC URL: {}", e)))?;

		let signer: PrivateKeySigner = private_key
			.parse()
			.map_err(|_| ChainError::Configuration("Invalid private key format".to_string()))?;
		let sender = signer.address();

		let provider = ProviderBuilder::new().on_http(url);

		Ok(Self {
			provider: Arc::new(provider) as Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>,
			signer,
			sender,
			chain_id,
		})
	}
}

#[async_trait]
impl ChainInterface for AlloyChain {
	fn sender(&self) -> Address {
		self.sender
	}

	async fn chain_id(&self) -> Result<u64, ChainError> {
		self.provider
			.get_chain_id()
			.await
			.map_err(|e| ChainError::Network(format!("Failed to get chain id: {}", e)))
	}

	async fn latest_block(&self) -> Result<Option<BlockInfo>, ChainError> {
		let block = self
			.provider
			.get_block_by_number(BlockNumberOrTag::Latest, BlockTransactionsKind::Hashes)
			.await
			.map_err(|e| ChainError::Network(format!("Failed to get latest block: {}", e)))?;

		Ok(block.map(|b| BlockInfo {
			number: b.header.number,
			timestamp: b.header.timestamp,
			base_fee_per_gas: b.header.base_fee_per_gas.map(Into::into),
			gas_used: b.header.gas_used.into(),
			gas_limit: b.header.gas_limit.into(),
		}))
	}

	async fn transaction_count(&self, address: Address, pending: bool) -> Result<u64, ChainError> {
		let call = self.provider.get_transaction_count(address);
		let count = if pending {
			call.block_id(BlockId::pending()).await
		} else {
			call.await
		};
		count.map_err(|e| ChainError::Network(format!("Failed to get nonce: {}", e)))
	}

	async fn get_receipt(&self, hash: B256) -> Result<Option<TxReceiptInfo>, ChainError> {
		let receipt = self
			.provider
			.get_transaction_receipt(hash)
			.await
			.map_err(|e| ChainError::Network(format!("Failed to get receipt: {}", e)))?;

		Ok(receipt.map(|r| {
			let logs = r
				.inner
				.logs()
				.iter()
				.map(|log| BoopLog {
					address: log.inner.address,
					topics: log.inner.data.topics().to_vec(),
					data: log.inner.data.data.clone(),
				})
				.collect();
			TxReceiptInfo {
				tx_hash: r.transaction_hash,
				block_hash: r.block_hash.unwrap_or_default(),
				block_number: r.block_number.unwrap_or(0),
				gas_used: r.gas_used.into(),
				effective_gas_price: r.effective_gas_price.into(),
				success: r.status(),
				logs,
			}
		}))
	}

	async fn call(&self, from: Address, to: Address, data: Bytes) -> Result<CallResult, ChainError> {
		let request = TransactionRequest::default()
			.from(from)
			.to(to)
			.input(data.into());

		match self.provider.call(&request).await {
			Ok(ret) => Ok(CallResult::Ok(ret)),
			Err(e) => {
				if let Some(revert) = e.as_error_resp().and_then(|p| p.as_revert_data()) {
					return Ok(CallResult::Revert(revert));
				}
				Err(ChainError::Network(format!("eth_call failed: {}", e)))
			}
		}
	}

	async fn estimate_gas(
		&self,
		from: Address,
		to: Address,
		data: Bytes,
	) -> Result<u64, ChainError> {
		let request = TransactionRequest::default()
			.from(from)
			.to(to)
			.input(data.into());

		self.provider
			.estimate_gas(&request)
			.await
			.map_err(|e| ChainError::Network(format!("Failed to estimate gas: {}", e)))
	}

	async fn priority_fee_rewards(
		&self,
		block_count: u64,
		percentile: f64,
	) -> Result<Vec<u128>, ChainError> {
		let history = self
			.provider
			.get_fee_history(block_count, BlockNumberOrTag::Latest, &[percentile])
			.await
			.map_err(|e| ChainError::Network(format!("Failed to get fee history: {}", e)))?;

		Ok(history
			.reward
			.unwrap_or_default()
			.iter()
			.filter_map(|per_block| per_block.first().copied())
			.collect())
	}

	async fn sign_transaction(&self, tx: UnsignedTx) -> Result<SignedTx, ChainError> {
		let mut typed = TxEip1559 {
			chain_id: self.chain_id,
			nonce: tx.nonce,
			gas_limit: tx.gas_limit,
			max_fee_per_gas: tx.fees.max_fee_per_gas,
			max_priority_fee_per_gas: tx.fees.max_priority_fee_per_gas,
			to: TxKind::Call(tx.to),
			value: tx.value,
			access_list: Default::default(),
			input: tx.input,
		};

		let signature = self
			.signer
			.sign_transaction_sync(&mut typed)
			.map_err(|e| ChainError::Signer(e.to_string()))?;

		let signed = typed.into_signed(signature);
		let hash = *signed.hash();
		let envelope = TxEnvelope::Eip1559(signed);
		Ok(SignedTx {
			hash,
			raw: envelope.encoded_2718().into(),
		})
	}

	async fn broadcast(&self, raw: Bytes) -> Result<B256, ChainError> {
		let pending = self
			.provider
			.send_raw_transaction(raw.as_ref())
			.await
			.map_err(|e| ChainError::Network(format!("Failed to send transaction: {}", e)))?;

		let tx_hash = *pending.tx_hash();
		tracing::debug!(tx_hash = %tx_hash, "Broadcast transaction");
		Ok(tx_hash)
	}

	async fn balance(&self, address: Address) -> Result<U256, ChainError> {
		self.provider
			.get_balance(address)
			.await
			.map_err(|e| ChainError::Network(format!("Failed to get balance: {}", e)))
	}
}
