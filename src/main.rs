use std::sync::Arc;

use tracing::{error, info};
use wallet_chain_sync::backend::{
	BackendError, BackendKind, BlockchainBackend, ExplorerClient, HttpRpcTransport, NodeClient,
	TxCodec,
};
use wallet_chain_sync::config::ChainSyncConfig;
use wallet_chain_sync::fees::FeeEstimator;

/// The probe never decodes scripts; explorer calls that need it report so.
struct NoScriptCodec;

impl TxCodec for NoScriptCodec {
	fn script_to_address(&self, script: &str) -> Result<String, BackendError> {
		Err(BackendError::Malformed(format!(
			"chain-probe cannot decode script {}",
			script
		)))
	}
}

async fn connect(config: &ChainSyncConfig) -> Result<Arc<dyn BlockchainBackend>, BackendError> {
	match config.backend {
		BackendKind::Node => {
			let transport = HttpRpcTransport::new(
				config.rpc_url.clone(),
				config.rpc_user.clone(),
				config.rpc_password.clone(),
			)?;
			let node = NodeClient::connect(Arc::new(transport), config.network)
				.await?
				.with_listunspent_args(config.listunspent_args.clone());
			Ok(Arc::new(node))
		}
		BackendKind::Explorer => Ok(Arc::new(ExplorerClient::new(
			config.network,
			Arc::new(NoScriptCodec),
			config.explorer_config(),
		)?)),
	}
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.init();

	let config = match ChainSyncConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			std::process::exit(2);
		}
	};

	info!(
		"Probing {:?} backend on {} (rpc {}, explorer {})",
		config.backend, config.network, config.rpc_url, config.explorer_url
	);

	let backend = match connect(&config).await {
		Ok(backend) => backend,
		Err(e) => {
			error!("Failed to connect to backend: {}", e);
			std::process::exit(1);
		}
	};
	info!("Connected to {}", backend.name());

	let estimator = FeeEstimator::new(backend.clone())
		.with_manual_threshold(config.manual_fee_threshold)
		.with_fallback(config.fallback_fee_per_kb);

	for target in [1, 3, 6, 12] {
		let fee = estimator.get_fee(target).await;
		info!("Fee for {} block target: {} sat/kB", target, fee);
	}
}
