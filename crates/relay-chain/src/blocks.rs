//! Polling block feed.

use crate::ChainService;
use relay_types::BlockInfo;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Polls the node for new heads and forwards them on a channel.
///
/// The feed only guarantees monotonically increasing block numbers; when
/// polling skips blocks, consumers see the newest one. This matches how
/// the monitor treats blocks: only the latest matters.
pub struct BlockFeed {
	chain: Arc<ChainService>,
	poll_interval: tokio::time::Duration,
}

impl BlockFeed {
	pub fn new(chain: Arc<ChainService>, poll_interval: tokio::time::Duration) -> Self {
		Self {
			chain,
			poll_interval,
		}
	}

	/// Runs until the receiving side is dropped.
	pub async fn run(self, sender: mpsc::Sender<BlockInfo>) {
		let mut last_seen: Option<u64> = None;

		loop {
			match self.chain.latest_block().await {
				Ok(Some(block)) => {
					if last_seen.is_none_or(|n| block.number > n) {
						last_seen = Some(block.number);
						if sender.send(block).await.is_err() {
							tracing::debug!("Block feed consumer dropped, stopping");
							return;
						}
					}
				}
				Ok(None) => {
					tracing::debug!("No block available yet");
				}
				Err(e) => {
					tracing::warn!(error = %e, "Failed to poll latest block");
				}
			}
			tokio::time::sleep(self.poll_interval).await;
		}
	}
}
