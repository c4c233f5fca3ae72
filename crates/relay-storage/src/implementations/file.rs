//! File-based storage backend.
//!
//! Each key maps to one file under the base directory. Files carry a
//! small fixed header recording the expiration timestamp; expired files
//! read as missing and are removed by `cleanup_expired`.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;

/// Fixed-size file header.
///
/// Binary layout (16 bytes total):
/// - [0-3]: Magic bytes "BOOP"
/// - [4-5]: Version (u16, little-endian)
/// - [6-13]: Expiration timestamp (u64, little-endian, Unix seconds, 0 = never)
/// - [14-15]: Reserved
#[derive(Debug, Clone, Copy)]
struct FileHeader {
	expires_at: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"BOOP";
	const VERSION: u16 = 1;
	const SIZE: usize = 16;

	fn new(ttl: Option<Duration>) -> Self {
		let expires_at = match ttl {
			None => 0,
			Some(ttl) => now_unix().saturating_add(ttl.as_secs()),
		};
		Self { expires_at }
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&Self::VERSION.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE || &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Bad file header".into()));
		}
		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}
		let mut expires_bytes = [0u8; 8];
		expires_bytes.copy_from_slice(&bytes[6..14]);
		Ok(Self {
			expires_at: u64::from_le_bytes(expires_bytes),
		})
	}

	fn is_expired(&self) -> bool {
		self.expires_at != 0 && now_unix() >= self.expires_at
	}
}

fn now_unix() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}

/// File-based storage implementation.
pub struct FileStorage {
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Converts a storage key to a filesystem-safe file path.
	fn file_path(&self, key: &str) -> PathBuf {
		let safe_key = key.replace(['/', ':'], "_");
		self.base_path.join(format!("{}.bin", safe_key))
	}

	/// Inverse of `file_path` for listing, best effort: ':' only ever
	/// separates namespace and id, so the first '_' maps back.
	fn key_from_file_name(name: &str) -> Option<String> {
		let stem = name.strip_suffix(".bin")?;
		Some(stem.replacen('_', ":", 1))
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.file_path(key);

		let data = match fs::read(&path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(StorageError::NotFound)
			}
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let header = FileHeader::deserialize(&data)?;
		if header.is_expired() {
			return Err(StorageError::NotFound);
		}
		Ok(data[FileHeader::SIZE..].to_vec())
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.file_path(key);

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		let header = FileHeader::new(ttl);
		let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
		file_data.extend_from_slice(&header.serialize());
		file_data.extend_from_slice(&value);

		// Write atomically by writing to a temp file then renaming.
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, file_data)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.file_path(key);
		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		match self.get_bytes(key).await {
			Ok(_) => Ok(true),
			Err(StorageError::NotFound) => Ok(false),
			Err(e) => Err(e),
		}
	}

	async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut out = Vec::new();
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let name = entry.file_name();
			let Some(name) = name.to_str() else { continue };
			let Some(key) = Self::key_from_file_name(name) else {
				continue;
			};
			if !key.starts_with(prefix) {
				continue;
			}
			// Filter out expired entries without reading whole payloads.
			match fs::read(entry.path()).await {
				Ok(data) => match FileHeader::deserialize(&data) {
					Ok(header) if !header.is_expired() => out.push(key),
					_ => {}
				},
				Err(e) => {
					tracing::debug!(file = %name, error = %e, "Skipping unreadable file");
				}
			}
		}
		Ok(out)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let mut removed = 0;
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new("bin")) {
				continue;
			}
			let Ok(data) = fs::read(&path).await else {
				continue;
			};
			let Ok(header) = FileHeader::deserialize(&data) else {
				continue;
			};
			if header.is_expired() {
				if let Err(e) = fs::remove_file(&path).await {
					tracing::warn!(path = ?path, error = %e, "Failed to remove expired file");
				} else {
					removed += 1;
				}
			}
		}
		Ok(removed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[tokio::test]
	async fn round_trips_through_files() {
		let dir = tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		storage
			.set_bytes("transactions:0xabc", b"data".to_vec(), None)
			.await
			.unwrap();
		assert_eq!(
			storage.get_bytes("transactions:0xabc").await.unwrap(),
			b"data"
		);
		assert!(storage.exists("transactions:0xabc").await.unwrap());

		storage.delete("transactions:0xabc").await.unwrap();
		assert!(!storage.exists("transactions:0xabc").await.unwrap());
	}

	#[tokio::test]
	async fn lists_keys_by_namespace() {
		let dir = tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		storage
			.set_bytes("transactions:1", vec![1], None)
			.await
			.unwrap();
		storage
			.set_bytes("transactions:2", vec![2], None)
			.await
			.unwrap();
		storage.set_bytes("receipts:1", vec![3], None).await.unwrap();

		let mut keys = storage.keys_with_prefix("transactions:").await.unwrap();
		keys.sort();
		assert_eq!(keys, vec!["transactions:1", "transactions:2"]);
	}

	#[tokio::test]
	async fn expired_files_are_hidden_and_removed() {
		let dir = tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		storage
			.set_bytes("receipts:old", vec![1], Some(Duration::ZERO))
			.await
			.unwrap();

		assert!(matches!(
			storage.get_bytes("receipts:old").await,
			Err(StorageError::NotFound)
		));
		assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
		assert_eq!(storage.cleanup_expired().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn missing_directory_reads_as_empty() {
		let storage = FileStorage::new(PathBuf::from("/nonexistent/for/sure"));
		assert!(storage.keys_with_prefix("x").await.unwrap().is_empty());
		assert_eq!(storage.cleanup_expired().await.unwrap(), 0);
	}
}
