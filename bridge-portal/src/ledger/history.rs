// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reconciliation loop and the history surface for one account
//!
//! Each tick: look up counterparts for a rotating batch of unresolved
//! hashes, merge the claimable set, then apply the confirmation heuristic.
//! Failures never touch ledger data; after `failure_threshold` consecutive
//! failed ticks an error message is surfaced, and the next good tick clears it.

use super::transaction_ledger::TransactionLedger;
use super::types::LedgerPage;
use crate::config::{AssumedStatusConfig, PollingConfig};
use crate::error::{PortalError, PortalResult};
use crate::indexer::ExternalTxSource;
use crate::poll::PollHandle;
use crate::probe::BlockHeights;
use ethers::types::{Address, TxHash};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Who and where the history is tracked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryContext {
    pub account: Address,
    pub l1_chain_id: u64,
}

#[derive(Debug, Default)]
struct SessionState {
    error_message: Option<String>,
    // Whether `error_message` was set by the failure policy
    auto_error: bool,
    consecutive_failures: u32,
    batch_cursor: usize,
    current_page: Option<LedgerPage>,
}

pub struct BridgeTxHistory {
    context: HistoryContext,
    ledger: Arc<TransactionLedger>,
    source: Arc<dyn ExternalTxSource>,
    heights: Option<BlockHeights>,
    polling: PollingConfig,
    assumed: AssumedStatusConfig,
    session: RwLock<SessionState>,
}

impl BridgeTxHistory {
    pub fn new(
        context: HistoryContext,
        ledger: Arc<TransactionLedger>,
        source: Arc<dyn ExternalTxSource>,
        heights: Option<BlockHeights>,
        polling: PollingConfig,
        assumed: AssumedStatusConfig,
    ) -> Self {
        Self {
            context,
            ledger,
            source,
            heights,
            polling,
            assumed,
            session: RwLock::new(SessionState::default()),
        }
    }

    pub fn context(&self) -> HistoryContext {
        self.context
    }

    pub fn ledger(&self) -> &Arc<TransactionLedger> {
        &self.ledger
    }

    fn is_mainnet(&self) -> bool {
        self.ledger.network().is_mainnet()
    }

    pub async fn error_message(&self) -> Option<String> {
        self.session.read().await.error_message.clone()
    }

    /// Set or clear the surfaced message from the UI
    pub async fn change_error_message(&self, message: Option<String>) {
        let mut session = self.session.write().await;
        session.error_message = message;
        session.auto_error = false;
    }

    pub async fn current_page(&self) -> Option<LedgerPage> {
        self.session.read().await.current_page.clone()
    }

    /// Re-fetch page `page_number`: resolve its unresolved entries now,
    /// then return the page from the ledger. Indexer failures count toward
    /// the failure policy but the local page is still returned.
    pub async fn refresh_page(&self, page_number: usize) -> PortalResult<LedgerPage> {
        let account = self.context.account;
        let page = self
            .ledger
            .page(account, page_number, DEFAULT_PAGE_SIZE)
            .await?;
        let pending: Vec<TxHash> = page
            .items
            .iter()
            .filter(|t| t.counterpart_hash.is_none() && t.assumed_status.is_none())
            .map(|t| t.hash)
            .collect();

        if !pending.is_empty() {
            let result = self.resolve(&pending).await;
            self.record_outcome(result.err()).await;
        }

        let page = self
            .ledger
            .page(account, page_number, DEFAULT_PAGE_SIZE)
            .await?;
        self.session.write().await.current_page = Some(page.clone());
        Ok(page)
    }

    async fn resolve(&self, hashes: &[TxHash]) -> PortalResult<usize> {
        let resolved = self
            .source
            .resolve_counterparts(self.is_mainnet(), hashes)
            .await?;
        self.ledger.reconcile(self.context.account, &resolved).await
    }

    /// Next batch of refresh candidates, rotating so a few never-resolving
    /// hashes cannot starve the rest
    async fn next_batch(&self) -> Vec<TxHash> {
        let candidates = self.ledger.needs_refresh(self.context.account).await;
        let max = self.polling.max_batch_size.max(1);
        if candidates.len() <= max {
            return candidates;
        }
        let mut session = self.session.write().await;
        let start = session.batch_cursor % candidates.len();
        session.batch_cursor = start + max;
        candidates.iter().cycle().skip(start).take(max).copied().collect()
    }

    /// One reconciliation cycle
    pub async fn tick(&self) {
        let account = self.context.account;
        let mut failure: Option<PortalError> = None;

        let batch = self.next_batch().await;
        if !batch.is_empty() {
            match self.resolve(&batch).await {
                Ok(updated) if updated > 0 => {
                    debug!("[BridgeTxHistory] Reconciled {} entries", updated)
                }
                Ok(_) => {}
                Err(e) => failure = Some(e),
            }
        }

        match self.source.fetch_claimable(self.is_mainnet(), account).await {
            Ok(claims) => {
                if let Err(e) = self.ledger.merge_claimable(account, &claims).await {
                    failure.get_or_insert(e);
                }
            }
            Err(e) => {
                failure.get_or_insert(e);
            }
        }

        if let Some(heights) = &self.heights {
            if let Some(height) = heights.get(self.context.l1_chain_id).await {
                if let Err(e) = self
                    .ledger
                    .apply_confirmations(account, height, self.assumed.confirmations)
                    .await
                {
                    failure.get_or_insert(e);
                }
            }
        }

        self.record_outcome(failure).await;

        let page_number = self
            .session
            .read()
            .await
            .current_page
            .as_ref()
            .map(|p| p.page);
        if let Some(page_number) = page_number {
            if let Ok(page) = self
                .ledger
                .page(account, page_number, DEFAULT_PAGE_SIZE)
                .await
            {
                self.session.write().await.current_page = Some(page);
            }
        }
    }

    async fn record_outcome(&self, failure: Option<PortalError>) {
        let mut session = self.session.write().await;
        match failure {
            None => {
                session.consecutive_failures = 0;
                if session.auto_error {
                    session.error_message = None;
                    session.auto_error = false;
                }
            }
            Some(e) => {
                session.consecutive_failures += 1;
                warn!(
                    "[BridgeTxHistory] Sync failed ({} in a row): {}",
                    session.consecutive_failures, e
                );
                if session.consecutive_failures >= self.polling.failure_threshold
                    && session.error_message.is_none()
                {
                    session.error_message = Some(format!("Failed to sync bridge history: {}", e));
                    session.auto_error = true;
                }
            }
        }
    }

    pub fn start(self: &Arc<Self>) -> PollHandle {
        info!(
            "[BridgeTxHistory] Starting for {:?} on {}",
            self.context.account,
            self.ledger.network()
        );
        let history = self.clone();
        PollHandle::spawn(
            "BridgeTxHistory",
            self.polling.reconcile_interval(),
            move || {
                let history = history.clone();
                async move { history.tick().await }
            },
        )
    }

    /// Stop the loop and drop session state. Ledger data stays persisted.
    pub async fn stop(&self, handle: PollHandle) {
        handle.stop().await;
        *self.session.write().await = SessionState::default();
    }
}
