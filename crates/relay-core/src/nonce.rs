//! Per-account, per-track boop nonce lanes.
//!
//! Each (account, track) pair is an independent lane of sequential
//! nonces, with the authoritative head read from the entry point on
//! first touch. Boops arriving ahead of the head are parked until the
//! preceding nonces land, bounded per lane and globally; a same-nonce
//! arrival replaces the parked one.

use crate::{EngineError, SubmitError};
use alloy_primitives::{aliases::U192, Address};
use async_trait::async_trait;
use dashmap::DashMap;
use relay_config::NonceConfig;
use relay_types::{OnchainStatus, SubmitterError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

/// Where lane heads come from. In production this reads the entry
/// point's `nonceValues`; tests substitute a fixed map.
#[async_trait]
pub trait NonceSource: Send + Sync {
	async fn onchain_nonce(&self, account: Address, track: U192) -> Result<u64, EngineError>;
}

/// Lane heads read from the entry point contract.
pub struct EntryPointNonceSource {
	chain: Arc<relay_chain::ChainService>,
	entry_point: Address,
}

impl EntryPointNonceSource {
	pub fn new(chain: Arc<relay_chain::ChainService>, entry_point: Address) -> Self {
		Self { chain, entry_point }
	}
}

#[async_trait]
impl NonceSource for EntryPointNonceSource {
	async fn onchain_nonce(&self, account: Address, track: U192) -> Result<u64, EngineError> {
		Ok(self
			.chain
			.entry_point_nonce(self.entry_point, account, track)
			.await?)
	}
}

enum Wake {
	/// The lane head reached this nonce; go ahead.
	Ready,
	/// A newer boop took over this (track, nonce) slot.
	Replaced,
	/// The lane head moved past this nonce while it was parked.
	Stale,
}

struct Waiter {
	token: u64,
	sender: oneshot::Sender<Wake>,
}

struct Lane {
	/// Next expected nonce; `None` until read from the chain.
	head: Option<u64>,
	waiters: BTreeMap<u64, Waiter>,
}

/// Lane bookkeeping for incoming boops.
pub struct NonceManager {
	cfg: NonceConfig,
	source: Arc<dyn NonceSource>,
	lanes: DashMap<(Address, U192), Arc<Mutex<Lane>>>,
	parked_total: AtomicUsize,
	next_token: AtomicU64,
}

impl NonceManager {
	pub fn new(cfg: NonceConfig, source: Arc<dyn NonceSource>) -> Self {
		Self {
			cfg,
			source,
			lanes: DashMap::new(),
			parked_total: AtomicUsize::new(0),
			next_token: AtomicU64::new(0),
		}
	}

	fn lane(&self, account: Address, track: U192) -> Arc<Mutex<Lane>> {
		self.lanes
			.entry((account, track))
			.or_insert_with(|| {
				Arc::new(Mutex::new(Lane {
					head: None,
					waiters: BTreeMap::new(),
				}))
			})
			.clone()
	}

	/// Blocks until the boop's nonce is next in its lane. Returns
	/// immediately when it already is; rejects nonces behind the head;
	/// parks ahead-of-head boops subject to the buffering limits.
	pub async fn acquire(
		&self,
		account: Address,
		track: U192,
		nonce: u64,
	) -> Result<(), SubmitError> {
		let lane = self.lane(account, track);

		let (receiver, token) = {
			let mut lane = lane.lock().await;
			let head = match lane.head {
				Some(head) => head,
				None => {
					let head = self.source.onchain_nonce(account, track).await?;
					lane.head = Some(head);
					head
				}
			};

			if nonce < head {
				return Err(SubmitError::rejected(
					OnchainStatus::InvalidNonce,
					"The nonce of the boop is too low.",
				));
			}
			if nonce == head {
				return Ok(());
			}

			let replacing = lane.waiters.contains_key(&nonce);
			if !replacing {
				if lane.waiters.len() >= self.cfg.max_pending_per_track {
					return Err(SubmitError::submitter(
						SubmitterError::BufferExceeded,
						"Too many boops buffered for this nonce track.",
					));
				}
				if self.parked_total.load(Ordering::Relaxed) >= self.cfg.max_total_pending {
					return Err(SubmitError::submitter(
						SubmitterError::OverCapacity,
						"The relay is at its buffered-boop capacity.",
					));
				}
				self.parked_total.fetch_add(1, Ordering::Relaxed);
			}

			let (sender, receiver) = oneshot::channel();
			let token = self.next_token.fetch_add(1, Ordering::Relaxed);
			if let Some(old) = lane.waiters.insert(nonce, Waiter { token, sender }) {
				let _ = old.sender.send(Wake::Replaced);
			}
			(receiver, token)
		};

		match tokio::time::timeout(Duration::from_millis(self.cfg.buffer_timeout_ms), receiver)
			.await
		{
			Ok(Ok(Wake::Ready)) => Ok(()),
			Ok(Ok(Wake::Replaced)) => Err(SubmitError::submitter(
				SubmitterError::BoopReplaced,
				"A newer boop with the same nonce replaced this one.",
			)),
			Ok(Ok(Wake::Stale)) => Err(SubmitError::rejected(
				OnchainStatus::InvalidNonce,
				"The nonce of the boop is too low.",
			)),
			Ok(Err(_)) => Err(SubmitError::submitter(
				SubmitterError::UnexpectedError,
				"Nonce lane dropped while waiting.",
			)),
			Err(_) => {
				// Timed out: unpark ourselves unless a replacement already did.
				let mut lane = lane.lock().await;
				if lane.waiters.get(&nonce).is_some_and(|w| w.token == token) {
					lane.waiters.remove(&nonce);
					self.parked_total.fetch_sub(1, Ordering::Relaxed);
				}
				Err(SubmitError::submitter(
					SubmitterError::SubmitTimeout,
					"Timed out waiting for earlier nonces on this track.",
				))
			}
		}
	}

	/// Advances the lane past a consumed nonce and wakes the next
	/// parked boop, if it is now at the head.
	pub async fn advance(&self, account: Address, track: U192, consumed: u64) {
		let lane = self.lane(account, track);
		let mut lane = lane.lock().await;
		let head = lane.head.map_or(consumed + 1, |h| h.max(consumed + 1));
		lane.head = Some(head);
		if let Some(waiter) = lane.waiters.remove(&head) {
			self.parked_total.fetch_sub(1, Ordering::Relaxed);
			let _ = waiter.sender.send(Wake::Ready);
		}
	}

	/// Re-reads the lane head from the chain, waking parked boops that
	/// became ready or stale. Used after mined reverts, where the relay
	/// no longer knows whether the nonce was consumed.
	pub async fn resync(&self, account: Address, track: U192) -> Result<(), EngineError> {
		let lane = self.lane(account, track);
		let mut lane = lane.lock().await;
		let head = self.source.onchain_nonce(account, track).await?;
		lane.head = Some(head);

		let stale: Vec<u64> = lane.waiters.range(..head).map(|(n, _)| *n).collect();
		for nonce in stale {
			if let Some(waiter) = lane.waiters.remove(&nonce) {
				self.parked_total.fetch_sub(1, Ordering::Relaxed);
				let _ = waiter.sender.send(Wake::Stale);
			}
		}
		if let Some(waiter) = lane.waiters.remove(&head) {
			self.parked_total.fetch_sub(1, Ordering::Relaxed);
			let _ = waiter.sender.send(Wake::Ready);
		}
		Ok(())
	}

	/// How many boops are currently parked across all lanes.
	pub fn parked(&self) -> usize {
		self.parked_total.load(Ordering::Relaxed)
	}
}
