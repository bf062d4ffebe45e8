//! Webhook listener for node-pushed notifications.
//!
//! The node is started with `-walletnotify` and `-alertnotify` commands that
//! issue `HEAD /walletnotify?<txid>` and `HEAD /alertnotify?<message>` against
//! this listener. Every request is answered with 200, handled, and then
//! re-issued to the next port up so several processes can share one node.

use super::TxNotifyHandle;
use super::registry::NotifyRegistry;
use super::types::{AlertState, NotifyError, Phase, TxNotifyRequest};
use crate::backend::{BlockchainBackend, OutputFingerprint, TxCodec, TxOutput};
use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::{StatusCode, Uri};
use axum::routing::any;
use percent_encoding::percent_decode_str;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// Ports tried, starting at the configured one, before giving up.
const BIND_ATTEMPTS: u16 = 10;

/// Listener address and timeouts for webhook tracking.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for the first sighting.
    pub unconfirmed_timeout: Duration,
    /// Deadline for the first confirmation, counted from the sighting.
    pub confirmed_timeout: Duration,
    /// Re-issue each notification to `port + 1`.
    pub forward: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 62602,
            unconfirmed_timeout: Duration::from_secs(90),
            confirmed_timeout: Duration::from_secs(6 * 60 * 60),
            forward: true,
        }
    }
}

struct WebhookInner {
    backend: Arc<dyn BlockchainBackend>,
    codec: Arc<dyn TxCodec>,
    registry: NotifyRegistry,
    config: WebhookConfig,
    alerts: AlertState,
    listener: OnceCell<SocketAddr>,
    http_client: reqwest::Client,
}

/// Confirmation tracker fed by node notifications.
#[derive(Clone)]
pub struct WebhookTracker {
    inner: Arc<WebhookInner>,
}

impl WebhookTracker {
    pub fn new(
        backend: Arc<dyn BlockchainBackend>,
        codec: Arc<dyn TxCodec>,
        config: WebhookConfig,
        alerts: AlertState,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap_or_default();

        Self {
            inner: Arc::new(WebhookInner {
                backend,
                codec,
                registry: NotifyRegistry::new(),
                config,
                alerts,
                listener: OnceCell::new(),
                http_client,
            }),
        }
    }

    pub fn registry(&self) -> &NotifyRegistry {
        &self.inner.registry
    }

    pub fn alerts(&self) -> &AlertState {
        &self.inner.alerts
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.listener.get().copied()
    }

    /// Start the listener if it is not running yet.
    pub async fn start_listener(&self) -> Result<SocketAddr, NotifyError> {
        self.inner
            .listener
            .get_or_try_init(|| self.bind_and_serve())
            .await
            .copied()
    }

    async fn bind_and_serve(&self) -> Result<SocketAddr, NotifyError> {
        let host = self.inner.config.host.as_str();
        let first_port = self.inner.config.port;
        // Port 0 asks the OS for a free port, so there is nothing to fall back to.
        let attempts = if first_port == 0 { 1 } else { BIND_ATTEMPTS };

        for inc in 0..attempts {
            let Some(port) = first_port.checked_add(inc) else {
                break;
            };
            let listener = match TcpListener::bind((host, port)).await {
                Ok(listener) => listener,
                Err(e) => {
                    debug!("notify listener could not bind {}:{}: {}", host, port, e);
                    continue;
                }
            };
            let addr = listener.local_addr()?;
            let app = router(self.clone());
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    error!("notify listener stopped: {}", e);
                }
            });
            info!("started notify listener on {}", addr);
            return Ok(addr);
        }

        error!("failed to bind notify listener");
        Err(NotifyError::BindError {
            host: host.to_string(),
            first_port,
            last_port: first_port.saturating_add(attempts - 1),
        })
    }

    /// Register a transaction and arm its unconfirmed deadline.
    pub async fn add_tx_notify(
        &self,
        request: TxNotifyRequest,
    ) -> Result<TxNotifyHandle, NotifyError> {
        if request.outputs.is_empty() {
            return Err(NotifyError::EmptyFingerprint);
        }
        self.start_listener().await?;

        if let Some((label, address)) = &request.notify_address {
            self.ensure_notify_watch(label, address, &request.outputs)
                .await?;
        }

        let handle = self.inner.registry.register(
            OutputFingerprint::new(request.outputs),
            request.timeouts_enabled,
        );
        if request.timeouts_enabled {
            self.inner.registry.arm_timeout(
                handle.id(),
                Phase::AwaitingUnconfirmed,
                self.inner.config.unconfirmed_timeout,
            );
        }
        Ok(handle)
    }

    /// The node only notifies about transactions touching watched addresses;
    /// when none of the outputs is watched, watch the notify address instead.
    async fn ensure_notify_watch(
        &self,
        label: &str,
        notify_address: &str,
        outputs: &[TxOutput],
    ) -> Result<(), NotifyError> {
        for output in outputs {
            let address = self.inner.codec.script_to_address(&output.script)?;
            if self.inner.backend.is_watched(&address).await? {
                return Ok(());
            }
        }
        let notify_label = format!("{}-notify", label);
        debug!("importing notify address {} under {}", notify_address, notify_label);
        self.inner
            .backend
            .import_addresses(&notify_label, &[notify_address.to_string()])
            .await?;
        Ok(())
    }

    /// Handle `/walletnotify?<txid>`.
    pub async fn handle_wallet_notify(&self, txid: &str) {
        if txid.is_empty() || hex::decode(txid).is_err() {
            debug!("not a txid: {}", txid);
            return;
        }

        let tx = match self.inner.backend.get_transaction(txid).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                debug!("transaction {} not found, probably a conflict", txid);
                return;
            }
            Err(e) => {
                debug!("failed to look up notified transaction {}: {}", txid, e);
                return;
            }
        };

        let registry = &self.inner.registry;
        let Some(id) = registry.find_by_fingerprint(&tx.outputs) else {
            info!("txid={} not being listened for", txid);
            return;
        };

        if tx.confirmations == 0 {
            if let Some(timeouts_enabled) = registry.mark_unconfirmed(id, txid) {
                debug!("delivered unconfirmed for {}", id);
                if timeouts_enabled {
                    registry.arm_timeout(
                        id,
                        Phase::AwaitingConfirmed,
                        self.inner.config.confirmed_timeout,
                    );
                }
            }
        } else if registry.confirm(id, txid, tx.confirmations) {
            debug!("delivered confirmed for {}", id);
        }
    }

    /// Handle `/alertnotify?<urlencoded message>`.
    pub fn handle_alert_notify(&self, raw_message: &str) {
        let message = percent_decode_str(raw_message)
            .decode_utf8_lossy()
            .into_owned();
        warn!("Got an alert! Message={}", message);
        self.inner.alerts.set(message);
    }

    /// Re-issue a notification to the next listener up, ignoring failures.
    async fn forward(&self, uri: &Uri) {
        if !self.inner.config.forward {
            return;
        }
        let Some(addr) = self.local_addr() else {
            return;
        };
        let Some(next_port) = addr.port().checked_add(1) else {
            return;
        };
        let path = uri.path_and_query().map_or("/", |p| p.as_str());
        let url = format!("http://{}{}", SocketAddr::new(addr.ip(), next_port), path);
        if let Err(e) = self.inner.http_client.head(&url).send().await {
            debug!("no listener to forward notification to: {}", e);
        }
    }
}

fn router(tracker: WebhookTracker) -> Router {
    Router::new()
        .route("/walletnotify", any(wallet_notify))
        .route("/alertnotify", any(alert_notify))
        .fallback(unhandled)
        .with_state(tracker)
}

/// `HEAD /walletnotify?<txid>`
async fn wallet_notify(
    State(tracker): State<WebhookTracker>,
    uri: Uri,
    RawQuery(query): RawQuery,
) -> StatusCode {
    tracker
        .handle_wallet_notify(query.as_deref().unwrap_or_default())
        .await;
    tracker.forward(&uri).await;
    StatusCode::OK
}

/// `HEAD /alertnotify?<message>`
async fn alert_notify(
    State(tracker): State<WebhookTracker>,
    uri: Uri,
    RawQuery(query): RawQuery,
) -> StatusCode {
    tracker.handle_alert_notify(query.as_deref().unwrap_or_default());
    tracker.forward(&uri).await;
    StatusCode::OK
}

async fn unhandled(State(tracker): State<WebhookTracker>, uri: Uri) -> StatusCode {
    warn!(
        "ERROR: {} is not a handled URL path, check the notify URL for typos",
        uri.path()
    );
    tracker.forward(&uri).await;
    StatusCode::OK
}
