//! Boop simulation against the entry point.
//!
//! Simulation runs the entry point `submit` through `eth_call` and
//! translates the outcome: clean execution yields gas values (inflated
//! by the configured safety margin), rejections are decoded into the
//! on-chain status taxonomy, and the "cannot know yet" rejections that
//! only exist during simulation become advisory flags instead.

use crate::EngineError;
use alloy_primitives::{Address, U256};
use relay_chain::ChainService;
use relay_codec::{
	decode_entry_point_revert, decode_simulation_unknown, encode_boop, SimulationUnknown,
};
use relay_config::GasConfig;
use relay_types::{Boop, CallResult, OnchainStatus, SimulationResult};

/// Per-stage gas fallback when the boop leaves a limit unset and
/// simulation cannot split the estimate.
const DEFAULT_STAGE_GAS: u32 = 40_000;

/// Simulates a boop. `current_fee` is the oracle's view of the next
/// block's fee, used to flag boops whose pinned `max_fee_per_gas` is
/// already below market.
pub async fn simulate_boop(
	chain: &ChainService,
	entry_point: Address,
	boop: &Boop,
	cfg: &GasConfig,
	current_fee: Option<u128>,
) -> Result<SimulationResult, EngineError> {
	if boop.is_self_paying() && !boop.has_gas_values() {
		return Ok(SimulationResult::rejection(
			OnchainStatus::MissingGasValues,
			"A self-paying boop must carry its gas limits and maxFeePerGas, \
			 as they are covered by its signature.",
			None,
		));
	}

	let encoded = encode_boop(boop)?;
	let outcome = chain
		.simulate_submit(entry_point, chain.sender(), encoded.clone())
		.await?;

	let mut validity_unknown = false;
	let mut payment_validity_unknown = false;

	if let CallResult::Revert(data) = &outcome {
		match decode_simulation_unknown(data) {
			Some(SimulationUnknown::Validation) => validity_unknown = true,
			Some(SimulationUnknown::Payment) => payment_validity_unknown = true,
			None => {
				let decoded = decode_entry_point_revert(boop, data);
				return Ok(SimulationResult::rejection(
					decoded.status,
					decoded.description,
					decoded.revert_data,
				));
			}
		}
	}

	// Gas for the whole entry point call. A self-paying boop signed over
	// its gas limit, so the relay must not substitute its own; otherwise
	// estimate and inflate. When validation could not complete the
	// estimate is unavailable and the boop's own values stand in.
	let gas = if boop.is_self_paying() {
		boop.gas_limit as u64
	} else if validity_unknown || payment_validity_unknown {
		if boop.gas_limit != 0 {
			boop.gas_limit as u64
		} else {
			cfg.entry_point_gas_buffer + DEFAULT_STAGE_GAS as u64 * 3
		}
	} else {
		let data = chain.submit_call_data(encoded);
		let estimate = chain
			.estimate_gas(chain.sender(), entry_point, data)
			.await?;
		estimate
			.saturating_add(estimate * cfg.gas_safety_margin_percent / 100)
			.saturating_add(cfg.entry_point_gas_buffer)
	}
	.min(cfg.max_gas_limit);

	let stage = |own: u32, fallback: u32| if own != 0 { own } else { fallback };
	let execute_fallback = u32::try_from(gas).unwrap_or(u32::MAX);

	let max_fee_per_gas = if boop.max_fee_per_gas.is_zero() {
		U256::from(current_fee.unwrap_or(0))
	} else {
		boop.max_fee_per_gas
	};
	let fee_too_low = !boop.max_fee_per_gas.is_zero()
		&& current_fee.is_some_and(|fee| boop.max_fee_per_gas < U256::from(fee));

	Ok(SimulationResult {
		status: OnchainStatus::Success,
		description: "Simulation completed.".to_string(),
		revert_data: None,
		gas,
		validate_gas: stage(boop.validate_gas_limit, DEFAULT_STAGE_GAS),
		validate_payment_gas: stage(
			boop.validate_payment_gas_limit,
			if boop.payer == Address::ZERO || boop.is_self_paying() {
				0
			} else {
				DEFAULT_STAGE_GAS
			},
		),
		execute_gas: stage(boop.execute_gas_limit, execute_fallback),
		max_fee_per_gas,
		submitter_fee: boop.submitter_fee,
		validity_unknown,
		payment_validity_unknown,
		future_nonce: false,
		fee_too_low,
	})
}
