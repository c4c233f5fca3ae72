//! Broadcast event bus connecting the engine to receipt waiters and
//! external subscribers.

use relay_types::RelayEvent;
use tokio::sync::broadcast;

/// Cloneable handle to the relay's event channel. Publishing never
/// blocks; slow subscribers lag and miss events rather than applying
/// backpressure, which is fine because all durable state lives in
/// storage.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<RelayEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn publish(&self, event: RelayEvent) {
		// Send only fails when there are no subscribers, which is fine.
		let _ = self.sender.send(event);
	}

	pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
		self.sender.subscribe()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(256)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn delivers_to_all_subscribers() {
		let bus = EventBus::new(8);
		let mut a = bus.subscribe();
		let mut b = bus.subscribe();

		bus.publish(RelayEvent::NewBlock {
			number: 7,
			timestamp: 1000,
		});

		assert_eq!(
			a.recv().await.unwrap(),
			RelayEvent::NewBlock {
				number: 7,
				timestamp: 1000
			}
		);
		assert_eq!(
			b.recv().await.unwrap(),
			RelayEvent::NewBlock {
				number: 7,
				timestamp: 1000
			}
		);
	}

	#[test]
	fn publish_without_subscribers_is_a_noop() {
		let bus = EventBus::new(8);
		bus.publish(RelayEvent::NewBlock {
			number: 1,
			timestamp: 0,
		});
	}
}
