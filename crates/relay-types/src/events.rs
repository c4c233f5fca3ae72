//! Events published on the relay's internal event bus.

use crate::TransactionStatus;
use alloy_primitives::{Address, B256};

/// Broadcast to every subscriber on each noteworthy state change.
///
/// Events are advisory: receipts and transaction state live in storage,
/// the bus only signals that something changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
	/// A tracked transaction changed status.
	StatusChanged {
		boop_hash: B256,
		status: TransactionStatus,
	},
	/// A receipt for the boop was written to storage.
	ReceiptAvailable { boop_hash: B256 },
	/// The block feed observed a new head.
	NewBlock { number: u64, timestamp: u64 },
	/// Fee ceilings were reached while trying to unstick a nonce.
	/// This needs operator attention.
	FeeCeilingReached { account: Address, nonce: u64 },
}
