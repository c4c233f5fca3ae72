//! Gas price oracle and fee escalation.
//!
//! The oracle is a pure snapshot: the block task feeds it each new head
//! together with the node's recent priority fee rewards, and the rest of
//! the engine asks it for fees. When no block has been observed yet (or
//! the chain predates EIP-1559) it answers `None` and callers abstain
//! rather than guess.

use relay_config::GasConfig;
use relay_types::{BlockInfo, GasFees};
use std::sync::Mutex;

/// EIP-1559 basefee adjustment denominator.
const BASEFEE_CHANGE_DENOMINATOR: u128 = 8;

/// Fees produced by [`GasOracle::escalate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalated {
	pub fees: GasFees,
	/// The configured ceilings prevented any further increase. The
	/// caller should warn loudly and keep retrying at the ceiling.
	pub at_ceiling: bool,
}

#[derive(Debug, Default)]
struct OracleState {
	head: Option<BlockInfo>,
	/// Priority fee rewards at the configured percentile, one per
	/// recent block, replaced wholesale on each observation.
	rewards: Vec<u128>,
}

/// Snapshot-based fee oracle.
pub struct GasOracle {
	cfg: GasConfig,
	state: Mutex<OracleState>,
}

impl GasOracle {
	pub fn new(cfg: GasConfig) -> Self {
		Self {
			cfg,
			state: Mutex::new(OracleState::default()),
		}
	}

	/// Records a new head and the reward window fetched alongside it.
	pub fn observe_block(&self, block: BlockInfo, rewards: &[u128]) {
		let Ok(mut state) = self.state.lock() else {
			return;
		};
		state.head = Some(block);
		if !rewards.is_empty() {
			state.rewards = rewards.to_vec();
		}
	}

	/// The basefee the next block will carry, per the EIP-1559 update
	/// rule, from the last observed head. `None` before the first
	/// observation or on a pre-1559 chain.
	pub fn next_base_fee(&self) -> Option<u128> {
		let state = self.state.lock().ok()?;
		let head = state.head?;
		let base = head.base_fee_per_gas?;
		let target = head.gas_limit / 2;
		if target == 0 {
			return Some(base);
		}
		Some(if head.gas_used > target {
			let delta =
				(base * (head.gas_used - target) / target / BASEFEE_CHANGE_DENOMINATOR).max(1);
			base.saturating_add(delta)
		} else {
			let delta = base * (target - head.gas_used) / target / BASEFEE_CHANGE_DENOMINATOR;
			base - delta
		})
	}

	/// Fees for a fresh attempt: the expected next basefee with the
	/// configured margin, plus a priority fee taken from the reward
	/// window, both clamped to the configured ceilings.
	pub fn suggest(&self) -> Option<GasFees> {
		let next_base = self.next_base_fee()?;
		let with_margin =
			next_base.saturating_add(next_base * self.cfg.base_fee_margin_percent as u128 / 100);

		let observed = {
			let state = self.state.lock().ok()?;
			state.rewards.iter().copied().max()
		};
		let priority = observed
			.unwrap_or(self.cfg.initial_priority_fee)
			.clamp(self.cfg.initial_priority_fee, self.cfg.max_priority_fee);

		let max_fee = with_margin
			.saturating_add(priority)
			.min(self.cfg.max_base_fee);
		Some(GasFees::new(max_fee, priority.min(max_fee)))
	}

	/// Replacement fees for a stuck attempt: the previous fees bumped by
	/// the configured percentage (nodes require at least 10%), raised to
	/// the current market if that is higher, clamped to the ceilings.
	pub fn escalate(&self, prev: GasFees) -> Escalated {
		let bump = |v: u128| -> u128 {
			v.saturating_add((v * self.cfg.fee_bump_percent as u128).div_ceil(100).max(1))
		};
		let mut max_fee = bump(prev.max_fee_per_gas);
		let mut priority = bump(prev.max_priority_fee_per_gas);

		if let Some(market) = self.suggest() {
			max_fee = max_fee.max(market.max_fee_per_gas);
			priority = priority.max(market.max_priority_fee_per_gas);
		}

		// The total must cover the priority tip before the ceilings cut in.
		priority = priority.min(self.cfg.max_priority_fee);
		max_fee = max_fee.max(priority).min(self.cfg.max_base_fee);
		priority = priority.min(max_fee);

		Escalated {
			at_ceiling: max_fee <= prev.max_fee_per_gas,
			fees: GasFees::new(max_fee, priority),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn oracle() -> GasOracle {
		GasOracle::new(GasConfig::default())
	}

	fn block(base: u128, used: u128, limit: u128) -> BlockInfo {
		BlockInfo {
			number: 1,
			timestamp: 1000,
			base_fee_per_gas: Some(base),
			gas_used: used,
			gas_limit: limit,
		}
	}

	#[test]
	fn abstains_before_first_block() {
		let oracle = oracle();
		assert_eq!(oracle.next_base_fee(), None);
		assert_eq!(oracle.suggest(), None);
	}

	#[test]
	fn next_base_fee_follows_the_update_rule() {
		let oracle = oracle();

		// Half-full block: basefee unchanged.
		oracle.observe_block(block(1000, 15_000_000, 30_000_000), &[]);
		assert_eq!(oracle.next_base_fee(), Some(1000));

		// Full block: +12.5%.
		oracle.observe_block(block(1000, 30_000_000, 30_000_000), &[]);
		assert_eq!(oracle.next_base_fee(), Some(1125));

		// Empty block: -12.5%.
		oracle.observe_block(block(1000, 0, 30_000_000), &[]);
		assert_eq!(oracle.next_base_fee(), Some(875));
	}

	#[test]
	fn pre_1559_chain_abstains() {
		let oracle = oracle();
		let mut b = block(0, 0, 30_000_000);
		b.base_fee_per_gas = None;
		oracle.observe_block(b, &[]);
		assert_eq!(oracle.suggest(), None);
	}

	#[test]
	fn suggestion_applies_margin_and_clamps_priority() {
		let oracle = oracle();
		oracle.observe_block(block(1000, 15_000_000, 30_000_000), &[5, 700]);

		let fees = oracle.suggest().unwrap();
		// 20% margin on the unchanged basefee, plus the max reward.
		assert_eq!(fees.max_priority_fee_per_gas, 700);
		assert_eq!(fees.max_fee_per_gas, 1200 + 700);

		// Rewards above the ceiling are clamped.
		oracle.observe_block(block(1000, 15_000_000, 30_000_000), &[5000]);
		assert_eq!(oracle.suggest().unwrap().max_priority_fee_per_gas, 1000);
	}

	#[test]
	fn total_fee_is_capped() {
		let oracle = GasOracle::new(GasConfig {
			max_base_fee: 1500,
			..GasConfig::default()
		});
		oracle.observe_block(block(2000, 15_000_000, 30_000_000), &[100]);

		let fees = oracle.suggest().unwrap();
		assert_eq!(fees.max_fee_per_gas, 1500);
	}

	#[test]
	fn escalation_bumps_and_detects_the_ceiling() {
		let oracle = oracle();

		let first = oracle.escalate(GasFees::new(1000, 10));
		assert!(!first.at_ceiling);
		assert_eq!(first.fees.max_fee_per_gas, 1150);
		assert_eq!(first.fees.max_priority_fee_per_gas, 12);

		// At the total-fee ceiling nothing can increase.
		let ceiling = GasFees::new(100_000_000_000, 1000);
		let stuck = oracle.escalate(ceiling);
		assert!(stuck.at_ceiling);
		assert_eq!(stuck.fees, ceiling);
	}

	#[test]
	fn escalation_total_covers_the_priority_fee() {
		let oracle = oracle();

		// Equal total and tip stay equal after the bump; the tip is never
		// left above the total.
		let out = oracle.escalate(GasFees::new(800, 800));
		assert_eq!(out.fees.max_fee_per_gas, 920);
		assert_eq!(out.fees.max_priority_fee_per_gas, 920);
	}

	#[test]
	fn escalation_rises_to_market() {
		let oracle = oracle();
		oracle.observe_block(block(10_000, 15_000_000, 30_000_000), &[50]);

		// A stale cheap attempt jumps to market, not just +15%.
		let out = oracle.escalate(GasFees::new(100, 1));
		assert_eq!(out.fees.max_fee_per_gas, 12_000 + 50);
	}
}
