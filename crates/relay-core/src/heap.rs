//! Indexed binary min-heap.
//!
//! A plain array heap with a key-to-slot map maintained through every
//! swap, so membership tests, priority updates, and removals by key are
//! all O(log n). The monitor uses it to order tracked boops by deadline
//! and pop the expired prefix each block.

use std::collections::HashMap;
use std::hash::Hash;

pub struct IndexedMinHeap<K, P> {
	entries: Vec<(K, P)>,
	slots: HashMap<K, usize>,
}

impl<K: Clone + Eq + Hash, P: Copy + Ord> IndexedMinHeap<K, P> {
	pub fn new() -> Self {
		Self {
			entries: Vec::new(),
			slots: HashMap::new(),
		}
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn contains(&self, key: &K) -> bool {
		self.slots.contains_key(key)
	}

	/// The minimum-priority entry, without removing it.
	pub fn peek(&self) -> Option<(&K, P)> {
		self.entries.first().map(|(k, p)| (k, *p))
	}

	/// Inserts the key or updates its priority if already present.
	pub fn insert(&mut self, key: K, priority: P) {
		if let Some(&slot) = self.slots.get(&key) {
			let old = self.entries[slot].1;
			self.entries[slot].1 = priority;
			if priority < old {
				self.sift_up(slot);
			} else {
				self.sift_down(slot);
			}
			return;
		}
		let slot = self.entries.len();
		self.slots.insert(key.clone(), slot);
		self.entries.push((key, priority));
		self.sift_up(slot);
	}

	/// Removes and returns the minimum-priority entry.
	pub fn pop(&mut self) -> Option<(K, P)> {
		if self.entries.is_empty() {
			return None;
		}
		let last = self.entries.len() - 1;
		self.entries.swap(0, last);
		let (key, priority) = self.entries.pop()?;
		self.slots.remove(&key);
		if !self.entries.is_empty() {
			self.slots.insert(self.entries[0].0.clone(), 0);
			self.sift_down(0);
		}
		Some((key, priority))
	}

	/// Removes an arbitrary key, returning its priority if present.
	pub fn remove(&mut self, key: &K) -> Option<P> {
		let slot = self.slots.remove(key)?;
		let last = self.entries.len() - 1;
		if slot == last {
			return self.entries.pop().map(|(_, p)| p);
		}
		self.entries.swap(slot, last);
		let (_, priority) = self.entries.pop()?;
		self.slots.insert(self.entries[slot].0.clone(), slot);
		// The displaced entry can need to move either way.
		self.sift_up(slot);
		self.sift_down(slot);
		Some(priority)
	}

	fn sift_up(&mut self, mut slot: usize) {
		while slot > 0 {
			let parent = (slot - 1) / 2;
			if self.entries[slot].1 >= self.entries[parent].1 {
				break;
			}
			self.swap_slots(slot, parent);
			slot = parent;
		}
	}

	fn sift_down(&mut self, mut slot: usize) {
		loop {
			let left = 2 * slot + 1;
			let right = left + 1;
			let mut smallest = slot;
			if left < self.entries.len() && self.entries[left].1 < self.entries[smallest].1 {
				smallest = left;
			}
			if right < self.entries.len() && self.entries[right].1 < self.entries[smallest].1 {
				smallest = right;
			}
			if smallest == slot {
				break;
			}
			self.swap_slots(slot, smallest);
			slot = smallest;
		}
	}

	fn swap_slots(&mut self, a: usize, b: usize) {
		self.entries.swap(a, b);
		self.slots.insert(self.entries[a].0.clone(), a);
		self.slots.insert(self.entries[b].0.clone(), b);
	}
}

impl<K: Clone + Eq + Hash, P: Copy + Ord> Default for IndexedMinHeap<K, P> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pops_in_priority_order() {
		let mut heap = IndexedMinHeap::new();
		for (k, p) in [("d", 40u64), ("a", 10), ("c", 30), ("b", 20)] {
			heap.insert(k, p);
		}

		assert_eq!(heap.peek(), Some((&"a", 10)));
		assert_eq!(heap.pop(), Some(("a", 10)));
		assert_eq!(heap.pop(), Some(("b", 20)));
		assert_eq!(heap.pop(), Some(("c", 30)));
		assert_eq!(heap.pop(), Some(("d", 40)));
		assert_eq!(heap.pop(), None);
	}

	#[test]
	fn insert_updates_existing_keys() {
		let mut heap = IndexedMinHeap::new();
		heap.insert("a", 10u64);
		heap.insert("b", 20);
		heap.insert("a", 30); // lower it later
		assert_eq!(heap.len(), 2);
		assert_eq!(heap.peek(), Some((&"b", 20)));

		heap.insert("a", 5);
		assert_eq!(heap.peek(), Some((&"a", 5)));
	}

	#[test]
	fn remove_by_key_keeps_the_heap_consistent() {
		let mut heap = IndexedMinHeap::new();
		for i in 0..20u64 {
			heap.insert(i, (i * 7) % 20);
		}
		assert_eq!(heap.remove(&3), Some(1));
		assert_eq!(heap.remove(&3), None);
		assert!(!heap.contains(&3));

		let mut order = Vec::new();
		while let Some((_, p)) = heap.pop() {
			order.push(p);
		}
		let mut sorted = order.clone();
		sorted.sort();
		assert_eq!(order, sorted);
		assert_eq!(order.len(), 19);
	}
}
