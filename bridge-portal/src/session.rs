// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wiring for one mounted selection
//!
//! ```text
//!   mount(selection, wallet, chain id)
//!        │
//!        ├── NetworkResolver ──► Unresolved ──► nothing mounted
//!        │
//!        └── Resolved ──► ChainProbe (only on the source chain) ──┐
//!                     └─► BridgeTxHistory over the network ledger ┴─► ActiveSession
//!
//!   unmount ──► stop every PollHandle, reset heights, evict the account
//! ```

use crate::approval::{strategy_for, ApprovalTracker};
use crate::config::PortalConfig;
use crate::error::{PortalError, PortalResult};
use crate::indexer::{ExternalTxSource, RestTxSource};
use crate::ledger::{
    BridgeTxHistory, FileKeyValueStore, HistoryContext, KeyValueStore, PortalStateStore,
    TransactionLedger,
};
use crate::metrics::PortalMetrics;
use crate::network::{
    ChainDescriptor, NetworkResolver, NetworkSelection, PortalNetwork, Resolution,
    ResolvedNetwork,
};
use crate::poll::{ContextGeneration, PollHandle};
use crate::probe::ChainProbe;
use crate::rpc::{BlockHeightSource, ChainClientFactory, WalletClient};
use async_trait::async_trait;
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tap::TapFallible;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Opens read-only chain connections for the probe
#[async_trait]
pub trait ChainConnector: Send + Sync {
    async fn block_source(
        &self,
        chain: &ChainDescriptor,
    ) -> PortalResult<Arc<dyn BlockHeightSource>>;
}

#[async_trait]
impl ChainConnector for ChainClientFactory {
    async fn block_source(
        &self,
        chain: &ChainDescriptor,
    ) -> PortalResult<Arc<dyn BlockHeightSource>> {
        ChainClientFactory::block_source(self, chain).await
    }
}

struct ActiveSession {
    resolution: ResolvedNetwork,
    probe: Arc<ChainProbe>,
    probe_handle: Option<PollHandle>,
    history: Arc<BridgeTxHistory>,
    history_handle: PollHandle,
}

pub struct PortalSession {
    config: PortalConfig,
    resolver: NetworkResolver,
    connector: Arc<dyn ChainConnector>,
    source: Arc<dyn ExternalTxSource>,
    ledgers: HashMap<PortalNetwork, Arc<TransactionLedger>>,
    metrics: Arc<PortalMetrics>,
    generation: ContextGeneration,
    active: Mutex<Option<ActiveSession>>,
}

impl PortalSession {
    /// Open one ledger per configured network over `kv`
    pub fn open(
        config: PortalConfig,
        connector: Arc<dyn ChainConnector>,
        source: Arc<dyn ExternalTxSource>,
        kv: Arc<dyn KeyValueStore>,
        metrics: Arc<PortalMetrics>,
    ) -> PortalResult<Self> {
        config.validate()?;
        let mut ledgers = HashMap::new();
        for network in [PortalNetwork::Mainnet, PortalNetwork::Testnet] {
            if config.network(network).is_err() {
                continue;
            }
            let store = PortalStateStore::new(kv.clone(), network.storage_key());
            let ledger = TransactionLedger::open(network, store, metrics.clone())?;
            ledgers.insert(network, Arc::new(ledger));
        }
        Ok(Self {
            resolver: config.resolver(),
            config,
            connector,
            source,
            ledgers,
            metrics,
            generation: ContextGeneration::new(),
            active: Mutex::new(None),
        })
    }

    /// Production wiring: file store under `storage-dir`, ethers clients, REST indexer
    pub fn from_config(config: PortalConfig, metrics: Arc<PortalMetrics>) -> PortalResult<Self> {
        let kv = FileKeyValueStore::new(&config.storage_dir)
            .map_err(|e| PortalError::Persistence(format!("{:#}", e)))?;
        let connector = ChainClientFactory::new(config.polling.receipt_poll_interval());
        let source = RestTxSource::from_config(&config, metrics.clone())?;
        Self::open(
            config,
            Arc::new(connector),
            Arc::new(source),
            Arc::new(kv),
            metrics,
        )
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn resolver(&self) -> &NetworkResolver {
        &self.resolver
    }

    pub fn generation(&self) -> ContextGeneration {
        self.generation.clone()
    }

    pub fn ledger(&self, network: PortalNetwork) -> PortalResult<Arc<TransactionLedger>> {
        self.ledgers
            .get(&network)
            .cloned()
            .ok_or_else(|| PortalError::Config(format!("network {} is not configured", network)))
    }

    pub async fn history(&self) -> Option<Arc<BridgeTxHistory>> {
        self.active.lock().await.as_ref().map(|a| a.history.clone())
    }

    pub async fn resolution(&self) -> Option<ResolvedNetwork> {
        self.active.lock().await.as_ref().map(|a| a.resolution.clone())
    }

    pub async fn latest_block(&self, chain_id: u64) -> Option<u64> {
        let probe = self.active.lock().await.as_ref().map(|a| a.probe.clone())?;
        probe.latest_block(chain_id).await
    }

    /// Replace the mounted session. Any previous session is torn down first.
    /// Returns `None` when the selection is unresolved or no wallet is known.
    pub async fn mount(
        &self,
        selection: NetworkSelection,
        wallet: Option<Address>,
        connected_chain_id: Option<u64>,
    ) -> PortalResult<Option<Arc<BridgeTxHistory>>> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.teardown(previous).await;
        }
        self.generation.bump();

        let resolution = self.resolver.resolve(&selection, connected_chain_id);
        let Resolution::Resolved(resolved) = &resolution else {
            info!("[PortalSession] Selection {:?} is unresolved", selection);
            return Ok(None);
        };
        let Some(account) = wallet else {
            info!("[PortalSession] No wallet connected, nothing to track");
            return Ok(None);
        };
        let ledger = self.ledger(resolved.network)?;

        let mut sources = Vec::with_capacity(2);
        for chain in [&resolved.l1, &resolved.l2] {
            sources.push(self.connector.block_source(chain).await.tap_err(|e| {
                warn!(
                    "[PortalSession] Failed to connect to chain {}: {}",
                    chain.id, e
                )
            })?);
        }
        let probe = Arc::new(ChainProbe::new(sources, self.metrics.clone()));
        let probe_handle = ChainProbe::is_enabled(wallet, &resolution)
            .then(|| probe.start(self.config.polling.probe_interval()));

        let history = Arc::new(BridgeTxHistory::new(
            HistoryContext {
                account,
                l1_chain_id: resolved.l1.id,
            },
            ledger,
            self.source.clone(),
            Some(probe.heights()),
            self.config.polling.clone(),
            self.config.assumed_status.clone(),
        ));
        let history_handle = history.start();

        info!(
            "[PortalSession] Mounted {} {} for {:?}, probe {}",
            resolved.network,
            resolved.direction,
            account,
            if probe_handle.is_some() { "on" } else { "off" }
        );
        *active = Some(ActiveSession {
            resolution: resolved.clone(),
            probe,
            probe_handle,
            history: history.clone(),
            history_handle,
        });
        Ok(Some(history))
    }

    /// Stop every loop of the mounted session. Persisted ledger data is kept.
    pub async fn unmount(&self) {
        let previous = self.active.lock().await.take();
        self.generation.bump();
        if let Some(previous) = previous {
            self.teardown(previous).await;
        }
    }

    async fn teardown(&self, session: ActiveSession) {
        if let Some(handle) = session.probe_handle {
            handle.stop().await;
        }
        session.probe.reset().await;
        let context = session.history.context();
        session.history.stop(session.history_handle).await;
        let _ = session
            .history
            .ledger()
            .evict(context.account)
            .await
            .tap_err(|e| warn!("[PortalSession] Failed to evict {:?}: {}", context.account, e));
        info!(
            "[PortalSession] Unmounted {} for {:?}",
            session.resolution.network, context.account
        );
    }

    /// Approval tracker for the given network, sharing this session's
    /// context generation so that a remount discards its in-flight results
    pub fn approval_tracker(
        &self,
        network: PortalNetwork,
        wallet: Arc<dyn WalletClient>,
    ) -> PortalResult<ApprovalTracker> {
        let strategy = strategy_for(self.config.family, self.config.network(network)?);
        Ok(ApprovalTracker::new(
            strategy,
            wallet,
            self.generation.clone(),
            self.metrics.clone(),
        ))
    }
}
