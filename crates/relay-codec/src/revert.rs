//! Decoding of entry point reverts into on-chain statuses.
//!
//! The entry point reverts with a closed set of custom errors. Wrapper
//! errors (`ValidationRejected` and friends) carry the raw revert data of
//! the account or paymaster, which is decoded one level deep against the
//! same closed set. Unknown selectors fall through to
//! [`OnchainStatus::UnexpectedReverted`]; in practice the only unparsed
//! entry point revert is an out-of-gas, which the monitor reclassifies
//! from the receipt.

use alloy_primitives::{Address, Bytes, B256};
use alloy_sol_types::{sol, SolError, SolEvent};
use relay_types::{Boop, BoopLog, OnchainStatus};

sol! {
	error InvalidNonce();
	error GasPriceTooHigh();
	error InsufficientStake();
	error PayoutFailed();
	error MalformedBoop();
	error ValidationReverted(bytes revertData);
	error ValidationRejected(bytes reason);
	error PaymentValidationReverted(bytes revertData);
	error PaymentValidationRejected(bytes reason);
	error InvalidSignature();
	error UnknownDuringSimulation();
	error InsufficientGasBudget();
	error SubmitterFeeTooHigh();
	error InvalidExtensionValue();
	error ExtensionNotRegistered(address extension, uint8 extensionType);
	error ExtensionAlreadyRegistered(address extension, uint8 extensionType);

	event CallReverted(bytes revertData);
	event ExecutionRejected(bytes reason);
	event ExecutionReverted(bytes revertData);
}

/// A revert translated into a client-facing status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRevert {
	pub status: OnchainStatus,
	pub description: String,
	pub revert_data: Option<Bytes>,
}

impl DecodedRevert {
	fn new(status: OnchainStatus, description: impl Into<String>) -> Self {
		Self {
			status,
			description: description.into(),
			revert_data: None,
		}
	}

	fn with_data(mut self, data: Bytes) -> Self {
		self.revert_data = Some(data);
		self
	}
}

const TRY_PARSING: &str = "Try parsing the revertData to understand why.";
const FAULTY_ACCOUNT: &str =
	"This is indicative of a faulty account implementation, which the submitter may penalize.";

fn selector(data: &[u8]) -> Option<[u8; 4]> {
	data.get(..4).map(|s| {
		let mut out = [0u8; 4];
		out.copy_from_slice(s);
		out
	})
}

/// Inner errors raised by accounts and paymasters, decoded one level deep
/// from the revert data carried by wrapper errors.
enum InnerError {
	InvalidSignature,
	UnknownDuringSimulation,
	InsufficientGasBudget,
	SubmitterFeeTooHigh,
	InvalidExtensionValue,
	ExtensionNotRegistered,
}

fn decode_inner(data: &[u8]) -> Option<InnerError> {
	match selector(data)? {
		s if s == InvalidSignature::SELECTOR => Some(InnerError::InvalidSignature),
		s if s == UnknownDuringSimulation::SELECTOR => Some(InnerError::UnknownDuringSimulation),
		s if s == InsufficientGasBudget::SELECTOR => Some(InnerError::InsufficientGasBudget),
		s if s == SubmitterFeeTooHigh::SELECTOR => Some(InnerError::SubmitterFeeTooHigh),
		s if s == InvalidExtensionValue::SELECTOR => Some(InnerError::InvalidExtensionValue),
		s if s == ExtensionNotRegistered::SELECTOR => Some(InnerError::ExtensionNotRegistered),
		_ => None,
	}
}

/// Translates an entry point revert into a status, description, and
/// (when available) the raw inner revert data.
pub fn decode_entry_point_revert(boop: &Boop, data: &[u8]) -> DecodedRevert {
	let unexpected = || {
		DecodedRevert::new(
			OnchainStatus::UnexpectedReverted,
			"The boop caused an unexpected revert.",
		)
		.with_data(Bytes::copy_from_slice(data))
	};
	let Some(sel) = selector(data) else {
		return unexpected();
	};

	match sel {
		s if s == InvalidNonce::SELECTOR => DecodedRevert::new(
			OnchainStatus::InvalidNonce,
			"The nonce of the boop is too low.",
		),
		s if s == GasPriceTooHigh::SELECTOR => DecodedRevert::new(
			OnchainStatus::GasPriceTooLow,
			"The boop got rejected because the gas price was above the maxFeePerGas. \
			 Try again with a higher maxFeePerGas if you are setting it manually.",
		),
		s if s == InsufficientStake::SELECTOR => {
			let payer = if boop.payer == Address::ZERO {
				"submitter"
			} else {
				"paymaster"
			};
			DecodedRevert::new(
				OnchainStatus::InsufficientStake,
				format!("The {} has insufficient stake.", payer),
			)
		}
		s if s == PayoutFailed::SELECTOR => DecodedRevert::new(
			OnchainStatus::PayoutFailed,
			"Payment of a self-paying boop failed.",
		),
		s if s == MalformedBoop::SELECTOR => DecodedRevert::new(
			OnchainStatus::UnexpectedReverted,
			"Malformed boop simulated or submitted. This is an implementation bug, please report it.",
		),
		s if s == ValidationReverted::SELECTOR => {
			let inner = decode_wrapped::<ValidationReverted>(data, |e| e.revertData);
			DecodedRevert::new(
				OnchainStatus::ValidationReverted,
				format!("Account reverted in `validate`. {}", FAULTY_ACCOUNT),
			)
			.with_data(inner)
		}
		s if s == ValidationRejected::SELECTOR => {
			let inner = decode_wrapped::<ValidationRejected>(data, |e| e.reason);
			match decode_inner(&inner) {
				Some(InnerError::InvalidSignature) => DecodedRevert::new(
					OnchainStatus::InvalidSignature,
					"Account rejected the boop because of an invalid signature.",
				),
				Some(InnerError::InvalidExtensionValue) => DecodedRevert::new(
					OnchainStatus::InvalidExtensionValue,
					"Account rejected the boop because an extension value in the extraData is invalid.",
				),
				Some(InnerError::ExtensionNotRegistered) => DecodedRevert::new(
					OnchainStatus::ExtensionNotRegistered,
					"Account rejected the boop because it requested an extension that was not registered.",
				),
				_ => DecodedRevert::new(
					OnchainStatus::ValidationRejected,
					format!("Account rejected the boop. {}", TRY_PARSING),
				)
				.with_data(inner),
			}
		}
		s if s == PaymentValidationReverted::SELECTOR => {
			let inner = decode_wrapped::<PaymentValidationReverted>(data, |e| e.revertData);
			DecodedRevert::new(
				OnchainStatus::PaymentValidationReverted,
				"Paymaster reverted in `validatePayment`, which is not standard compliant behaviour.",
			)
			.with_data(inner)
		}
		s if s == PaymentValidationRejected::SELECTOR => {
			let inner = decode_wrapped::<PaymentValidationRejected>(data, |e| e.reason);
			match decode_inner(&inner) {
				Some(InnerError::InvalidSignature) => DecodedRevert::new(
					OnchainStatus::InvalidSignature,
					"Paymaster rejected the boop because of an invalid signature.",
				),
				Some(InnerError::SubmitterFeeTooHigh) => DecodedRevert::new(
					OnchainStatus::PaymentValidationRejected,
					format!(
						"Paymaster rejected the boop because the submitter fee ({} wei) was too high.",
						boop.submitter_fee
					),
				)
				.with_data(inner),
				Some(InnerError::InsufficientGasBudget) => DecodedRevert::new(
					OnchainStatus::PaymentValidationRejected,
					"Paymaster rejected the boop because the gas budget is insufficient.",
				)
				.with_data(inner),
				_ => DecodedRevert::new(
					OnchainStatus::PaymentValidationRejected,
					format!("Paymaster rejected the boop. {}", TRY_PARSING),
				)
				.with_data(inner),
			}
		}
		s if s == ExtensionNotRegistered::SELECTOR => DecodedRevert::new(
			OnchainStatus::ExtensionNotRegistered,
			"The boop requested an extension that was not registered for this account.",
		),
		s if s == ExtensionAlreadyRegistered::SELECTOR => {
			match ExtensionAlreadyRegistered::abi_decode(data, true) {
				Ok(e) => DecodedRevert::new(
					OnchainStatus::ExtensionAlreadyRegistered,
					format!(
						"Extension {} of type {} has already been registered for this account.",
						e.extension, e.extensionType
					),
				),
				Err(_) => unexpected(),
			}
		}
		_ => unexpected(),
	}
}

/// Which validation stage could not complete during simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationUnknown {
	/// Account validation needs information only available at submission
	/// time (typically the signature over simulation-filled values).
	Validation,
	/// Paymaster payment validation needs the same.
	Payment,
}

/// Detects the simulation-only rejections that signal "cannot know yet"
/// rather than an actual failure: a wrapper rejection whose inner error
/// is `UnknownDuringSimulation`.
pub fn decode_simulation_unknown(data: &[u8]) -> Option<SimulationUnknown> {
	let sel = selector(data)?;
	let (inner, stage) = if sel == ValidationRejected::SELECTOR {
		let inner = decode_wrapped::<ValidationRejected>(data, |e| e.reason);
		(inner, SimulationUnknown::Validation)
	} else if sel == PaymentValidationRejected::SELECTOR {
		let inner = decode_wrapped::<PaymentValidationRejected>(data, |e| e.reason);
		(inner, SimulationUnknown::Payment)
	} else {
		return None;
	};
	matches!(decode_inner(&inner), Some(InnerError::UnknownDuringSimulation)).then_some(stage)
}

/// Decodes the payload of a wrapper error, returning empty bytes when the
/// data does not parse (malformed inner payloads are not fatal).
fn decode_wrapped<E: SolError>(data: &[u8], extract: impl FnOnce(E) -> Bytes) -> Bytes {
	E::abi_decode(data, true).map(extract).unwrap_or_default()
}

/// Translates an execute-stage failure (signaled by an entry point event,
/// not a revert) into a status and description.
pub fn decode_execute_outcome(status: OnchainStatus, revert_data: &Bytes) -> DecodedRevert {
	match status {
		OnchainStatus::CallReverted => DecodedRevert::new(
			OnchainStatus::CallReverted,
			format!(
				"The call made by the account's `execute` function reverted. {}",
				TRY_PARSING
			),
		)
		.with_data(revert_data.clone()),
		OnchainStatus::ExecuteRejected => match decode_inner(revert_data) {
			Some(InnerError::InvalidExtensionValue) => DecodedRevert::new(
				OnchainStatus::InvalidExtensionValue,
				"The account's `execute` function rejected the call because an extension value \
				 in the extraData is invalid.",
			),
			Some(InnerError::ExtensionNotRegistered) => DecodedRevert::new(
				OnchainStatus::ExtensionNotRegistered,
				"The account's `execute` function rejected the call because the extraData \
				 specified an extension that was not registered on the account.",
			),
			_ => DecodedRevert::new(
				OnchainStatus::ExecuteRejected,
				format!(
					"The account's `execute` function rejected the call. {}",
					TRY_PARSING
				),
			)
			.with_data(revert_data.clone()),
		},
		_ => DecodedRevert::new(
			OnchainStatus::ExecuteReverted,
			format!("The account's `execute` function reverted. {}", FAULTY_ACCOUNT),
		)
		.with_data(revert_data.clone()),
	}
}

/// Scans the logs of a successful entry point transaction for an
/// execute-stage failure event. Returns the failure status and the raw
/// revert payload when one is found.
pub fn execute_failure_from_logs(logs: &[BoopLog]) -> Option<(OnchainStatus, Bytes)> {
	for log in logs {
		let Some(topic0) = log.topics.first() else {
			continue;
		};
		let decoded = if *topic0 == CallReverted::SIGNATURE_HASH {
			decode_event_data::<CallReverted>(log, |e| e.revertData)
				.map(|d| (OnchainStatus::CallReverted, d))
		} else if *topic0 == ExecutionRejected::SIGNATURE_HASH {
			decode_event_data::<ExecutionRejected>(log, |e| e.reason)
				.map(|d| (OnchainStatus::ExecuteRejected, d))
		} else if *topic0 == ExecutionReverted::SIGNATURE_HASH {
			decode_event_data::<ExecutionReverted>(log, |e| e.revertData)
				.map(|d| (OnchainStatus::ExecuteReverted, d))
		} else {
			None
		};
		if decoded.is_some() {
			return decoded;
		}
	}
	None
}

fn decode_event_data<E: SolEvent>(log: &BoopLog, extract: impl FnOnce(E) -> Bytes) -> Option<Bytes> {
	E::decode_raw_log(log.topics.iter().copied(), &log.data, true)
		.ok()
		.map(extract)
}
