// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Latest block heights for the chains of the active selection
//!
//! ```text
//!   interval tick
//!        │
//!        ├── L1 source ──► get_block_number ──┐
//!        │                                    ├─ join_all ─► heights (keep old on error)
//!        └── L2 source ──► get_block_number ──┘
//! ```

use crate::metrics::PortalMetrics;
use crate::network::Resolution;
use crate::poll::PollHandle;
use crate::rpc::BlockHeightSource;
use ethers::types::Address;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Shared view of the latest known height per chain ID
#[derive(Debug, Clone, Default)]
pub struct BlockHeights(Arc<RwLock<HashMap<u64, u64>>>);

impl BlockHeights {
    pub async fn get(&self, chain_id: u64) -> Option<u64> {
        self.0.read().await.get(&chain_id).copied()
    }

    pub async fn snapshot(&self) -> HashMap<u64, u64> {
        self.0.read().await.clone()
    }

    /// Record a height; returns false if it did not move the height forward.
    async fn advance(&self, chain_id: u64, height: u64) -> bool {
        let mut heights = self.0.write().await;
        match heights.get(&chain_id) {
            Some(current) if *current >= height => false,
            _ => {
                heights.insert(chain_id, height);
                true
            }
        }
    }

    async fn clear(&self) {
        self.0.write().await.clear();
    }
}

pub struct ChainProbe {
    sources: Vec<Arc<dyn BlockHeightSource>>,
    heights: BlockHeights,
    metrics: Arc<PortalMetrics>,
}

impl ChainProbe {
    pub fn new(sources: Vec<Arc<dyn BlockHeightSource>>, metrics: Arc<PortalMetrics>) -> Self {
        Self {
            sources,
            heights: BlockHeights::default(),
            metrics,
        }
    }

    /// Polling runs only while a wallet is known and sits on the source chain
    pub fn is_enabled(wallet: Option<Address>, resolution: &Resolution) -> bool {
        wallet.is_some() && resolution.is_correct_network_set()
    }

    pub fn heights(&self) -> BlockHeights {
        self.heights.clone()
    }

    pub async fn latest_block(&self, chain_id: u64) -> Option<u64> {
        self.heights.get(chain_id).await
    }

    /// One probe cycle. Requests run concurrently; a failing chain keeps its
    /// previous height and never affects the others.
    pub async fn tick(&self) {
        let results = join_all(self.sources.iter().map(|source| async move {
            let chain_id = source.chain_id();
            (chain_id, source.latest_block_number().await)
        }))
        .await;

        for (chain_id, result) in results {
            let label = chain_id.to_string();
            self.metrics
                .probe_requests
                .with_label_values(&[&label])
                .inc();
            match result {
                Ok(height) => {
                    if self.heights.advance(chain_id, height).await {
                        self.metrics
                            .latest_block
                            .with_label_values(&[&label])
                            .set(height as i64);
                        debug!("[ChainProbe] chain {} at block {}", chain_id, height);
                    }
                }
                Err(e) => {
                    self.metrics
                        .probe_errors
                        .with_label_values(&[&label, e.error_type()])
                        .inc();
                    warn!(
                        "[ChainProbe] Failed to fetch latest block for chain {}: {}",
                        chain_id, e
                    );
                }
            }
        }
    }

    pub fn start(self: &Arc<Self>, interval: Duration) -> PollHandle {
        info!(
            "[ChainProbe] Starting for chains {:?}",
            self.sources.iter().map(|s| s.chain_id()).collect::<Vec<_>>()
        );
        let probe = self.clone();
        PollHandle::spawn("ChainProbe", interval, move || {
            let probe = probe.clone();
            async move { probe.tick().await }
        })
    }

    /// Forget all heights, e.g. after the selection changed
    pub async fn reset(&self) {
        self.heights.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{test_pair, Direction, NetworkResolver, NetworkSelection, PortalNetwork};
    use crate::test_utils::MockBlockSource;

    fn probe(sources: Vec<Arc<MockBlockSource>>) -> ChainProbe {
        ChainProbe::new(
            sources
                .into_iter()
                .map(|s| s as Arc<dyn BlockHeightSource>)
                .collect(),
            Arc::new(PortalMetrics::new_for_testing()),
        )
    }

    #[tokio::test]
    async fn test_tick_records_heights() {
        let l1 = Arc::new(MockBlockSource::new(1));
        let l2 = Arc::new(MockBlockSource::new(534352));
        l1.set_height(100);
        l2.set_height(2_000);
        let probe = probe(vec![l1, l2]);

        assert_eq!(probe.latest_block(1).await, None);
        probe.tick().await;
        assert_eq!(probe.latest_block(1).await, Some(100));
        assert_eq!(probe.latest_block(534352).await, Some(2_000));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_previous_value() {
        let l1 = Arc::new(MockBlockSource::new(1));
        let l2 = Arc::new(MockBlockSource::new(534352));
        l1.set_height(100);
        l2.set_height(2_000);
        let probe = probe(vec![l1.clone(), l2.clone()]);
        probe.tick().await;

        l1.set_failing(true);
        l2.set_height(2_010);
        probe.tick().await;

        assert_eq!(probe.latest_block(1).await, Some(100));
        assert_eq!(probe.latest_block(534352).await, Some(2_010));
    }

    #[tokio::test]
    async fn test_height_never_moves_backwards() {
        let l1 = Arc::new(MockBlockSource::new(1));
        l1.set_height(100);
        let probe = probe(vec![l1.clone()]);
        probe.tick().await;
        l1.set_height(95);
        probe.tick().await;
        assert_eq!(probe.latest_block(1).await, Some(100));
    }

    #[tokio::test]
    async fn test_reset_clears_heights() {
        let l1 = Arc::new(MockBlockSource::new(1));
        l1.set_height(7);
        let probe = probe(vec![l1]);
        probe.tick().await;
        probe.reset().await;
        assert_eq!(probe.latest_block(1).await, None);
    }

    #[test]
    fn test_enabled_gate() {
        let resolver = NetworkResolver::new(Some(test_pair(1, 534352)), None);
        let sel = NetworkSelection::new(PortalNetwork::Mainnet, Direction::Deposit);
        let wallet = Some(Address::from_low_u64_be(9));

        assert!(ChainProbe::is_enabled(wallet, &resolver.resolve(&sel, Some(1))));
        assert!(!ChainProbe::is_enabled(None, &resolver.resolve(&sel, Some(1))));
        assert!(!ChainProbe::is_enabled(wallet, &resolver.resolve(&sel, Some(534352))));
        assert!(!ChainProbe::is_enabled(wallet, &Resolution::Unresolved));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polls_on_interval() {
        let l1 = Arc::new(MockBlockSource::new(1));
        l1.set_height(1);
        let probe = Arc::new(probe(vec![l1.clone()]));
        let handle = probe.start(Duration::from_secs(3));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(probe.latest_block(1).await, Some(1));

        l1.set_height(2);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(probe.latest_block(1).await, Some(2));
        assert!(l1.calls() >= 2);

        handle.stop().await;
        let calls = l1.calls();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(l1.calls(), calls);
    }
}
