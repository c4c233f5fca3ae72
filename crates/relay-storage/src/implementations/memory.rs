//! In-memory storage backend.
//!
//! Stores data in a HashMap with expiry tracked per entry. Useful for
//! tests and for relays that accept losing state across restarts.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry {
	value: Vec<u8>,
	expires_at: Option<Instant>,
}

impl Entry {
	fn is_expired(&self) -> bool {
		self.expires_at.is_some_and(|t| Instant::now() >= t)
	}
}

/// In-memory storage implementation.
pub struct MemoryStorage {
	store: RwLock<HashMap<String, Entry>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self {
			store: RwLock::new(HashMap::new()),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let store = self.store.read().await;
		match store.get(key) {
			Some(entry) if !entry.is_expired() => Ok(entry.value.clone()),
			_ => Err(StorageError::NotFound),
		}
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.insert(
			key.to_string(),
			Entry {
				value,
				expires_at: ttl.map(|d| Instant::now() + d),
			},
		);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let store = self.store.read().await;
		Ok(store.get(key).is_some_and(|e| !e.is_expired()))
	}

	async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let store = self.store.read().await;
		Ok(store
			.iter()
			.filter(|(k, e)| k.starts_with(prefix) && !e.is_expired())
			.map(|(k, _)| k.clone())
			.collect())
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let mut store = self.store.write().await;
		let before = store.len();
		store.retain(|_, e| !e.is_expired());
		Ok(before - store.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn basic_operations() {
		let storage = MemoryStorage::new();

		let key = "transactions:abc";
		let value = b"payload".to_vec();
		storage.set_bytes(key, value.clone(), None).await.unwrap();

		assert_eq!(storage.get_bytes(key).await.unwrap(), value);
		assert!(storage.exists(key).await.unwrap());

		storage.delete(key).await.unwrap();
		assert!(!storage.exists(key).await.unwrap());
		assert!(matches!(
			storage.get_bytes(key).await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn prefix_listing() {
		let storage = MemoryStorage::new();
		storage.set_bytes("a:1", vec![1], None).await.unwrap();
		storage.set_bytes("a:2", vec![2], None).await.unwrap();
		storage.set_bytes("b:1", vec![3], None).await.unwrap();

		let mut keys = storage.keys_with_prefix("a:").await.unwrap();
		keys.sort();
		assert_eq!(keys, vec!["a:1", "a:2"]);
	}

	#[tokio::test]
	async fn expired_entries_are_invisible_and_cleaned() {
		let storage = MemoryStorage::new();
		storage
			.set_bytes("k", vec![1], Some(Duration::ZERO))
			.await
			.unwrap();

		assert!(!storage.exists("k").await.unwrap());
		assert!(storage.keys_with_prefix("k").await.unwrap().is_empty());
		assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
	}
}
