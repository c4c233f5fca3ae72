//! Main entry point for the boop relay service.
//!
//! Loads the configuration, connects to the node, recovers any
//! unfinished transactions from storage, and runs the relay engine
//! until interrupted.

use clap::Parser;
use relay_chain::implementations::evm::alloy::AlloyChain;
use relay_chain::ChainService;
use relay_config::{Config, StorageBackend};
use relay_core::TransactionManager;
use relay_storage::implementations::file::FileStorage;
use relay_storage::implementations::memory::MemoryStorage;
use relay_storage::{StorageInterface, StorageService};
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line arguments for the relay service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};
	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let config_path = args.config.to_string_lossy();
	let config = Config::from_file(&config_path)?;
	tracing::info!(
		chain_id = config.chain.chain_id,
		entry_point = %config.chain.entry_point,
		"Loaded configuration"
	);

	let chain = AlloyChain::new(
		&config.chain.rpc_url,
		&config.chain.private_key,
		config.chain.chain_id,
	)?;
	let chain = Arc::new(ChainService::new(Arc::new(chain)));

	let backend: Box<dyn StorageInterface> = match config.storage.backend {
		StorageBackend::Memory => Box::new(MemoryStorage::new()),
		StorageBackend::File => Box::new(FileStorage::new(PathBuf::from(&config.storage.path))),
	};
	let storage = Arc::new(StorageService::new(backend));

	let manager = Arc::new(TransactionManager::new(config, chain, storage));
	manager.start().await?;

	tokio::signal::ctrl_c().await?;
	tracing::info!("Shutting down");
	manager.shutdown();

	Ok(())
}
