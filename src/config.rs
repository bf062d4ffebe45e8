//! Configuration loaded from environment variables.

use crate::backend::{BackendKind, ExplorerConfig, Network};
use crate::backend::retry::RetryPolicy;
use crate::fees::{DEFAULT_FALLBACK_FEE_PER_KB, DEFAULT_MANUAL_FEE_THRESHOLD};
use crate::notify::{PollConfig, WebhookConfig};
use crate::wallet::sync::repositories::FileIndexCacheRepository;
use crate::wallet::sync::strategies::ScanConfig;
use crate::wallet::{AddressDeriver, Wallet};
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}={value} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct ChainSyncConfig {
    pub network: Network,
    /// Which backend family to talk to.
    pub backend: BackendKind,
    /// Node JSON-RPC endpoint.
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,
    /// Extra positional arguments for the node's `listunspent`.
    pub listunspent_args: Vec<Value>,
    /// Explorer API root.
    pub explorer_url: String,
    /// Fee oracle endpoint used with the explorer backend.
    pub fee_url: String,
    /// Addresses per explorer request and per scan batch.
    pub explorer_batch_size: u32,
    /// Minimum spacing of explorer unspent refreshes, in seconds.
    pub unspent_cooldown_secs: u64,
    /// Host the notify listener binds.
    pub notify_host: String,
    /// First port the notify listener tries.
    pub notify_port: u16,
    pub unconfirmed_timeout_secs: u64,
    pub confirmed_timeout_hours: u64,
    /// Fee targets above this are manual fee rates.
    pub manual_fee_threshold: u64,
    pub fallback_fee_per_kb: u64,
    pub gap_limit: u32,
    pub mixdepth_count: u32,
    /// Where index caches are persisted.
    pub data_dir: PathBuf,
}

impl Default for ChainSyncConfig {
    fn default() -> Self {
        let explorer = ExplorerConfig::default();
        Self {
            network: Network::Mainnet,
            backend: BackendKind::Node,
            rpc_url: "http://127.0.0.1:8332".to_string(),
            rpc_user: String::new(),
            rpc_password: String::new(),
            listunspent_args: Vec::new(),
            explorer_url: explorer.base_url,
            fee_url: explorer.fee_url,
            explorer_batch_size: 20,
            unspent_cooldown_secs: 600,
            notify_host: "127.0.0.1".to_string(),
            notify_port: 62602,
            unconfirmed_timeout_secs: 90,
            confirmed_timeout_hours: 6,
            manual_fee_threshold: DEFAULT_MANUAL_FEE_THRESHOLD,
            fallback_fee_per_kb: DEFAULT_FALLBACK_FEE_PER_KB,
            gap_limit: 6,
            mixdepth_count: 5,
            data_dir: PathBuf::from("."),
        }
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

impl ChainSyncConfig {
    /// Load configuration from `CHAINSYNC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let network = parse_var(&lookup, "CHAINSYNC_NETWORK", defaults.network)?;

        let backend = match lookup("CHAINSYNC_BACKEND").as_deref().map(str::trim) {
            None | Some("node") => BackendKind::Node,
            Some("explorer") => BackendKind::Explorer,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "CHAINSYNC_BACKEND",
                    value: other.to_string(),
                    reason: "expected node or explorer".to_string(),
                });
            }
        };

        let listunspent_args = match lookup("CHAINSYNC_LISTUNSPENT_ARGS") {
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Array(args)) => args,
                Ok(_) => {
                    return Err(ConfigError::Invalid {
                        key: "CHAINSYNC_LISTUNSPENT_ARGS",
                        value: raw,
                        reason: "expected a JSON array".to_string(),
                    });
                }
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        key: "CHAINSYNC_LISTUNSPENT_ARGS",
                        value: raw,
                        reason: e.to_string(),
                    });
                }
            },
            None => defaults.listunspent_args,
        };

        Ok(ChainSyncConfig {
            network,
            backend,
            rpc_url: lookup("CHAINSYNC_RPC_URL").unwrap_or(defaults.rpc_url),
            rpc_user: lookup("CHAINSYNC_RPC_USER").unwrap_or(defaults.rpc_user),
            rpc_password: lookup("CHAINSYNC_RPC_PASSWORD").unwrap_or(defaults.rpc_password),
            listunspent_args,
            explorer_url: lookup("CHAINSYNC_EXPLORER_URL").unwrap_or(defaults.explorer_url),
            fee_url: lookup("CHAINSYNC_FEE_URL").unwrap_or(defaults.fee_url),
            explorer_batch_size: parse_var(
                &lookup,
                "CHAINSYNC_EXPLORER_BATCH_SIZE",
                defaults.explorer_batch_size,
            )?,
            unspent_cooldown_secs: parse_var(
                &lookup,
                "CHAINSYNC_UNSPENT_COOLDOWN_SECS",
                defaults.unspent_cooldown_secs,
            )?,
            notify_host: lookup("CHAINSYNC_NOTIFY_HOST").unwrap_or(defaults.notify_host),
            notify_port: parse_var(&lookup, "CHAINSYNC_NOTIFY_PORT", defaults.notify_port)?,
            unconfirmed_timeout_secs: parse_var(
                &lookup,
                "CHAINSYNC_UNCONFIRMED_TIMEOUT_SECS",
                defaults.unconfirmed_timeout_secs,
            )?,
            confirmed_timeout_hours: parse_var(
                &lookup,
                "CHAINSYNC_CONFIRMED_TIMEOUT_HOURS",
                defaults.confirmed_timeout_hours,
            )?,
            manual_fee_threshold: parse_var(
                &lookup,
                "CHAINSYNC_MANUAL_FEE_THRESHOLD",
                defaults.manual_fee_threshold,
            )?,
            fallback_fee_per_kb: parse_var(
                &lookup,
                "CHAINSYNC_FALLBACK_FEE_PER_KB",
                defaults.fallback_fee_per_kb,
            )?,
            gap_limit: parse_var(&lookup, "CHAINSYNC_GAP_LIMIT", defaults.gap_limit)?,
            mixdepth_count: parse_var(&lookup, "CHAINSYNC_MIXDEPTHS", defaults.mixdepth_count)?,
            data_dir: lookup("CHAINSYNC_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        })
    }

    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            host: self.notify_host.clone(),
            port: self.notify_port,
            unconfirmed_timeout: Duration::from_secs(self.unconfirmed_timeout_secs),
            confirmed_timeout: Duration::from_secs(self.confirmed_timeout_hours * 60 * 60),
            forward: true,
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig::default()
    }

    pub fn explorer_config(&self) -> ExplorerConfig {
        ExplorerConfig {
            base_url: self.explorer_url.clone(),
            fee_url: self.fee_url.clone(),
            batch_size: self.explorer_batch_size as usize,
            unspent_cooldown: Duration::from_secs(self.unspent_cooldown_secs),
            retry: RetryPolicy::default(),
        }
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            batch_size: self.explorer_batch_size,
        }
    }

    /// An empty wallet laid out with the configured mixdepths and gap limit.
    pub fn wallet(&self, label: impl Into<String>, deriver: Arc<dyn AddressDeriver>) -> Wallet {
        Wallet::new(label, deriver, self.mixdepth_count, self.gap_limit)
    }

    pub fn index_cache_repository(&self) -> FileIndexCacheRepository {
        FileIndexCacheRepository::new(self.data_dir.clone())
    }
}
