//! Core engine of the boop relay.
//!
//! The engine takes boops in, simulates them against the entry point,
//! carries them to the chain as EIP-1559 transactions, and watches them
//! until a terminal outcome. It is split along the original service
//! boundaries: nonce lanes, a gas oracle, a submitter that signs and
//! broadcasts, and a per-block monitor that replaces, cancels, and
//! finalizes. [`TransactionManager`] wires all of it together.

use alloy_primitives::Bytes;
use relay_chain::ChainError;
use relay_codec::CodecError;
use relay_storage::StorageError;
use relay_types::{OnchainStatus, SubmitterError};
use thiserror::Error;

pub mod events;
pub mod gas;
pub mod heap;
pub mod manager;
pub mod monitor;
pub mod nonce;
pub mod simulate;
pub mod submitter;

#[cfg(test)]
pub(crate) mod testutil;

pub use events::EventBus;
pub use gas::GasOracle;
pub use manager::TransactionManager;
pub use monitor::TransactionMonitor;
pub use nonce::{EntryPointNonceSource, NonceManager, NonceSource};
pub use submitter::Submitter;

/// Internal engine failures. These are infrastructure errors; on-chain
/// rejections travel as [`SubmitError::Rejected`] instead.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error(transparent)]
	Chain(#[from] ChainError),
	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error(transparent)]
	Codec(#[from] CodecError),
	#[error("{0}")]
	Internal(String),
}

/// Why a boop could not be carried to completion.
#[derive(Debug, Error)]
pub enum SubmitError {
	/// The chain (entry point, account, or paymaster) rejected the boop.
	#[error("{status}: {description}")]
	Rejected {
		status: OnchainStatus,
		description: String,
		revert_data: Option<Bytes>,
	},
	/// The relay itself failed or refused; nothing reached the chain.
	#[error("{error}: {description}")]
	Submitter {
		error: SubmitterError,
		description: String,
	},
}

impl SubmitError {
	pub fn rejected(status: OnchainStatus, description: impl Into<String>) -> Self {
		SubmitError::Rejected {
			status,
			description: description.into(),
			revert_data: None,
		}
	}

	pub fn submitter(error: SubmitterError, description: impl Into<String>) -> Self {
		SubmitError::Submitter {
			error,
			description: description.into(),
		}
	}
}

impl From<EngineError> for SubmitError {
	fn from(err: EngineError) -> Self {
		let error = match &err {
			EngineError::Chain(_) => SubmitterError::RpcError,
			_ => SubmitterError::UnexpectedError,
		};
		SubmitError::submitter(error, err.to_string())
	}
}
