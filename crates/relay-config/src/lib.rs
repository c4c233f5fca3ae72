//! Configuration module for the boop relay.
//!
//! Configuration is loaded from TOML files, with `${VAR}` and
//! `${VAR:-default}` environment variable resolution, and validated
//! before use. Gas and nonce tuning knobs default to values that are
//! safe on a low-fee chain; anything chain-specific (RPC URL, entry
//! point, signing key) is required.

use alloy_primitives::Address;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the relay.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Chain connection and entry point.
	pub chain: ChainConfig,
	/// Gas pricing and escalation tuning.
	#[serde(default)]
	pub gas: GasConfig,
	/// Future-nonce buffering limits.
	#[serde(default)]
	pub nonce: NonceConfig,
	/// Monitoring timeouts and retention.
	#[serde(default)]
	pub monitor: MonitorConfig,
	/// Storage backend selection.
	#[serde(default)]
	pub storage: StorageConfig,
}

/// Chain connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
	/// HTTP RPC endpoint of the node.
	pub rpc_url: String,
	/// Expected chain id, verified against the node at startup.
	pub chain_id: u64,
	/// Private key of the submitter EOA. Use `${VAR}` resolution to
	/// keep it out of the config file.
	pub private_key: String,
	/// Entry point contract address.
	pub entry_point: Address,
	/// Target block time in seconds, used for expiry and stuck checks.
	#[serde(default = "default_block_time_secs")]
	pub block_time_secs: u64,
	/// How often to poll for new heads, in milliseconds.
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
}

/// Gas pricing and fee escalation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GasConfig {
	/// Margin applied on top of the expected next basefee, in percent.
	#[serde(default = "default_base_fee_margin_percent")]
	pub base_fee_margin_percent: u64,
	/// Fee bump applied when replacing an attempt, in percent.
	/// Nodes require at least 10% to accept a replacement.
	#[serde(default = "default_fee_bump_percent")]
	pub fee_bump_percent: u64,
	/// Ceiling on the total fee per gas, in wei.
	#[serde(default = "default_max_base_fee")]
	pub max_base_fee: u128,
	/// Starting priority fee, in wei.
	#[serde(default = "default_initial_priority_fee")]
	pub initial_priority_fee: u128,
	/// Ceiling on the priority fee, in wei.
	#[serde(default = "default_max_priority_fee")]
	pub max_priority_fee: u128,
	/// Percentile of recent priority fees to target.
	#[serde(default = "default_priority_fee_percentile")]
	pub priority_fee_percentile: u8,
	/// Number of recent blocks to analyze for priority fees.
	#[serde(default = "default_priority_fee_blocks")]
	pub priority_fee_blocks: u64,
	/// Safety margin applied to simulated gas, in percent.
	#[serde(default = "default_gas_safety_margin_percent")]
	pub gas_safety_margin_percent: u64,
	/// Extra gas for entry point overhead on top of the boop gas limit.
	#[serde(default = "default_entry_point_gas_buffer")]
	pub entry_point_gas_buffer: u64,
	/// Ceiling on any gas limit the relay will submit with.
	#[serde(default = "default_max_gas_limit")]
	pub max_gas_limit: u64,
}

impl Default for GasConfig {
	fn default() -> Self {
		Self {
			base_fee_margin_percent: default_base_fee_margin_percent(),
			fee_bump_percent: default_fee_bump_percent(),
			max_base_fee: default_max_base_fee(),
			initial_priority_fee: default_initial_priority_fee(),
			max_priority_fee: default_max_priority_fee(),
			priority_fee_percentile: default_priority_fee_percentile(),
			priority_fee_blocks: default_priority_fee_blocks(),
			gas_safety_margin_percent: default_gas_safety_margin_percent(),
			entry_point_gas_buffer: default_entry_point_gas_buffer(),
			max_gas_limit: default_max_gas_limit(),
		}
	}
}

/// Future-nonce buffering configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NonceConfig {
	/// Max boops buffered per (account, track) waiting for earlier
	/// nonces.
	#[serde(default = "default_max_pending_per_track")]
	pub max_pending_per_track: usize,
	/// Max boops buffered across all accounts and tracks.
	#[serde(default = "default_max_total_pending")]
	pub max_total_pending: usize,
	/// How long a future-nonce boop may wait before timing out, in
	/// milliseconds.
	#[serde(default = "default_buffer_timeout_ms")]
	pub buffer_timeout_ms: u64,
}

impl Default for NonceConfig {
	fn default() -> Self {
		Self {
			max_pending_per_track: default_max_pending_per_track(),
			max_total_pending: default_max_total_pending(),
			buffer_timeout_ms: default_buffer_timeout_ms(),
		}
	}
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
	/// Deadline for a boop to be mined after acceptance, in seconds.
	#[serde(default = "default_tx_timeout_secs")]
	pub tx_timeout_secs: u64,
	/// How long receipt waiters block before timing out, in
	/// milliseconds.
	#[serde(default = "default_receipt_timeout_ms")]
	pub receipt_timeout_ms: u64,
	/// Blocks without inclusion before an attempt counts as stuck.
	#[serde(default = "default_stuck_after_blocks")]
	pub stuck_after_blocks: u64,
	/// How long finalized transactions are retained, in seconds.
	#[serde(default = "default_purge_after_secs")]
	pub purge_after_secs: u64,
	/// Initial backoff for replacement retries, in milliseconds.
	#[serde(default = "default_backoff_initial_ms")]
	pub backoff_initial_ms: u64,
	/// Backoff ceiling for replacement retries, in milliseconds.
	#[serde(default = "default_backoff_max_ms")]
	pub backoff_max_ms: u64,
}

impl Default for MonitorConfig {
	fn default() -> Self {
		Self {
			tx_timeout_secs: default_tx_timeout_secs(),
			receipt_timeout_ms: default_receipt_timeout_ms(),
			stuck_after_blocks: default_stuck_after_blocks(),
			purge_after_secs: default_purge_after_secs(),
			backoff_initial_ms: default_backoff_initial_ms(),
			backoff_max_ms: default_backoff_max_ms(),
		}
	}
}

/// Storage backend selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which backend to use.
	#[serde(default)]
	pub backend: StorageBackend,
	/// Base directory for the file backend.
	#[serde(default = "default_storage_path")]
	pub path: String,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: StorageBackend::default(),
			path: default_storage_path(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
	Memory,
	#[default]
	File,
}

fn default_block_time_secs() -> u64 {
	2
}
fn default_poll_interval_ms() -> u64 {
	1000
}
fn default_base_fee_margin_percent() -> u64 {
	20
}
fn default_fee_bump_percent() -> u64 {
	15
}
fn default_max_base_fee() -> u128 {
	100_000_000_000 // 100 gwei
}
fn default_initial_priority_fee() -> u128 {
	1
}
fn default_max_priority_fee() -> u128 {
	1000
}
fn default_priority_fee_percentile() -> u8 {
	50
}
fn default_priority_fee_blocks() -> u64 {
	2
}
fn default_gas_safety_margin_percent() -> u64 {
	20
}
fn default_entry_point_gas_buffer() -> u64 {
	70_000
}
fn default_max_gas_limit() -> u64 {
	10_000_000
}
fn default_max_pending_per_track() -> usize {
	16
}
fn default_max_total_pending() -> usize {
	1024
}
fn default_buffer_timeout_ms() -> u64 {
	60_000
}
fn default_tx_timeout_secs() -> u64 {
	300
}
fn default_receipt_timeout_ms() -> u64 {
	30_000
}
fn default_stuck_after_blocks() -> u64 {
	3
}
fn default_purge_after_secs() -> u64 {
	3600
}
fn default_backoff_initial_ms() -> u64 {
	500
}
fn default_backoff_max_ms() -> u64 {
	8000
}
fn default_storage_path() -> String {
	"./data/storage".to_string()
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable
/// VAR_NAME. Supports default values with ${VAR_NAME:-default_value}.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let Some(full_match) = cap.get(0) else { continue };
		let Some(var_name) = cap.get(1).map(|m| m.as_str()) else {
			continue;
		};
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name
					)))
				}
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to maintain positions.
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

impl Config {
	/// Loads and validates configuration from a TOML file.
	pub fn from_file(path: &str) -> Result<Self, ConfigError> {
		let contents = std::fs::read_to_string(path)?;
		contents.parse()
	}

	/// Validates the configuration.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.chain.rpc_url.is_empty() {
			return Err(ConfigError::Validation("rpc_url must be set".into()));
		}
		if !self.chain.rpc_url.starts_with("http://") && !self.chain.rpc_url.starts_with("https://")
		{
			return Err(ConfigError::Validation(
				"rpc_url must be an http(s) URL".into(),
			));
		}
		if self.chain.chain_id == 0 {
			return Err(ConfigError::Validation("chain_id must be non-zero".into()));
		}
		if self.chain.private_key.is_empty() {
			return Err(ConfigError::Validation("private_key must be set".into()));
		}
		if self.chain.block_time_secs == 0 {
			return Err(ConfigError::Validation(
				"block_time_secs must be non-zero".into(),
			));
		}
		if self.gas.fee_bump_percent < 10 {
			// Nodes reject replacements below a 10% bump.
			return Err(ConfigError::Validation(
				"fee_bump_percent must be at least 10".into(),
			));
		}
		if self.gas.priority_fee_percentile == 0 || self.gas.priority_fee_percentile > 100 {
			return Err(ConfigError::Validation(
				"priority_fee_percentile must be between 1 and 100".into(),
			));
		}
		if self.gas.priority_fee_blocks == 0 {
			return Err(ConfigError::Validation(
				"priority_fee_blocks must be non-zero".into(),
			));
		}
		if self.gas.max_priority_fee > self.gas.max_base_fee {
			return Err(ConfigError::Validation(
				"max_priority_fee cannot exceed max_base_fee".into(),
			));
		}
		if self.nonce.max_pending_per_track == 0 || self.nonce.max_total_pending == 0 {
			return Err(ConfigError::Validation(
				"nonce buffering limits must be non-zero".into(),
			));
		}
		if self.monitor.backoff_initial_ms == 0
			|| self.monitor.backoff_max_ms < self.monitor.backoff_initial_ms
		{
			return Err(ConfigError::Validation(
				"backoff_max_ms must be at least backoff_initial_ms".into(),
			));
		}
		if self.storage.backend == StorageBackend::File && self.storage.path.is_empty() {
			return Err(ConfigError::Validation(
				"storage.path must be set for the file backend".into(),
			));
		}
		Ok(())
	}
}

/// Parses configuration from a TOML string, resolving environment
/// variables and validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const MINIMAL: &str = r#"
[chain]
rpc_url = "http://localhost:8545"
chain_id = 31337
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
entry_point = "0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0"
"#;

	#[test]
	fn parses_minimal_config_with_defaults() {
		let config: Config = MINIMAL.parse().unwrap();
		assert_eq!(config.chain.chain_id, 31337);
		assert_eq!(config.chain.block_time_secs, 2);
		assert_eq!(config.gas.fee_bump_percent, 15);
		assert_eq!(config.gas.max_base_fee, 100_000_000_000);
		assert_eq!(config.gas.initial_priority_fee, 1);
		assert_eq!(config.nonce.max_pending_per_track, 16);
		assert_eq!(config.monitor.backoff_initial_ms, 500);
		assert_eq!(config.storage.backend, StorageBackend::File);
	}

	#[test]
	fn env_var_resolution() {
		std::env::set_var("TEST_RELAY_RPC", "http://10.0.0.1:8545");
		let input = MINIMAL.replace("http://localhost:8545", "${TEST_RELAY_RPC}");
		let config: Config = input.parse().unwrap();
		assert_eq!(config.chain.rpc_url, "http://10.0.0.1:8545");
		std::env::remove_var("TEST_RELAY_RPC");
	}

	#[test]
	fn env_var_with_default() {
		let result = resolve_env_vars("url = \"${MISSING_RELAY_VAR:-fallback}\"").unwrap();
		assert_eq!(result, "url = \"fallback\"");
	}

	#[test]
	fn missing_env_var_is_an_error() {
		let result = resolve_env_vars("url = \"${MISSING_RELAY_VAR}\"");
		assert!(result.is_err());
		assert!(result.unwrap_err().to_string().contains("MISSING_RELAY_VAR"));
	}

	#[test]
	fn rejects_low_fee_bump() {
		let input = format!("{}\n[gas]\nfee_bump_percent = 5\n", MINIMAL);
		let err = input.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("fee_bump_percent"));
	}

	#[test]
	fn rejects_bad_percentile() {
		let input = format!("{}\n[gas]\npriority_fee_percentile = 101\n", MINIMAL);
		assert!(input.parse::<Config>().is_err());
	}

	#[test]
	fn rejects_non_http_rpc_url() {
		let input = MINIMAL.replace("http://localhost:8545", "ws://localhost:8545");
		assert!(input.parse::<Config>().is_err());
	}

	#[test]
	fn rejects_bad_entry_point_address() {
		let input = MINIMAL.replace(
			"0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0",
			"not-an-address",
		);
		assert!(input.parse::<Config>().is_err());
	}

	#[test]
	fn loads_from_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("relay.toml");
		std::fs::write(&path, MINIMAL).unwrap();

		let config = Config::from_file(path.to_str().unwrap()).unwrap();
		assert_eq!(config.chain.chain_id, 31337);
	}

	#[test]
	fn storage_backend_from_toml() {
		let input = format!("{}\n[storage]\nbackend = \"memory\"\n", MINIMAL);
		let config: Config = input.parse().unwrap();
		assert_eq!(config.storage.backend, StorageBackend::Memory);
	}
}
