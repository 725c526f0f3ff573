// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Allowance gating for the active transfer

use super::strategy::{ApprovalRequest, ApprovalState, BridgeStrategy, TokenKind};
use crate::error::{PortalError, PortalResult};
use crate::metrics::PortalMetrics;
use crate::poll::ContextGeneration;
use crate::rpc::WalletClient;
use ethers::types::U256;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct TrackerState {
    request: Option<ApprovalRequest>,
    approval: Option<ApprovalState>,
    // Generation of the operation currently in flight
    loading: Option<u64>,
    error: Option<String>,
}

pub struct ApprovalTracker {
    strategy: Arc<dyn BridgeStrategy>,
    wallet: Arc<dyn WalletClient>,
    generation: ContextGeneration,
    state: RwLock<TrackerState>,
    // One approval sequence at a time
    approve_lock: Mutex<()>,
    metrics: Arc<PortalMetrics>,
}

impl ApprovalTracker {
    /// `generation` is shared with whoever owns the network selection; bumping
    /// it discards every check or approval still in flight.
    pub fn new(
        strategy: Arc<dyn BridgeStrategy>,
        wallet: Arc<dyn WalletClient>,
        generation: ContextGeneration,
        metrics: Arc<PortalMetrics>,
    ) -> Self {
        Self {
            strategy,
            wallet,
            generation,
            state: RwLock::new(TrackerState::default()),
            approve_lock: Mutex::new(()),
            metrics,
        }
    }

    /// Switch to a new transfer (token, amount, selection). Clears prior results.
    pub async fn set_request(&self, request: Option<ApprovalRequest>) {
        self.generation.bump();
        let mut state = self.state.write().await;
        *state = TrackerState {
            request,
            ..Default::default()
        };
    }

    pub async fn need_approval(&self) -> bool {
        let state = self.state.read().await;
        match (&state.approval, &state.request) {
            (Some(approval), _) => approval.needs_approval,
            // Unchecked ERC-20 transfers are gated until proven otherwise
            (None, Some(req)) => matches!(req.token, TokenKind::Erc20(_)),
            (None, None) => false,
        }
    }

    pub async fn loading(&self) -> bool {
        self.state.read().await.loading.is_some()
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    pub async fn state(&self) -> Option<ApprovalState> {
        self.state.read().await.approval.clone()
    }

    async fn begin(&self) -> PortalResult<(u64, ApprovalRequest)> {
        let mut state = self.state.write().await;
        let request = state
            .request
            .ok_or_else(|| PortalError::InvalidArgument("no approval request set".into()))?;
        let generation = self.generation.current();
        state.loading = Some(generation);
        Ok((generation, request))
    }

    /// A stale result only clears the loading flag it raised itself; a newer
    /// operation may already be in flight.
    async fn discard_if_stale(&self, generation: u64, op: &'static str) -> PortalResult<()> {
        if self.generation.is_current(generation) {
            return Ok(());
        }
        let mut state = self.state.write().await;
        if state.loading == Some(generation) {
            state.loading = None;
        }
        drop(state);
        self.metrics
            .stale_responses_discarded
            .with_label_values(&[op])
            .inc();
        debug!("[ApprovalTracker] Discarding stale {} result", op);
        Err(PortalError::Stale)
    }

    pub async fn check_approval(&self) -> PortalResult<bool> {
        let (generation, request) = self.begin().await?;
        let result = self
            .strategy
            .check_approval(self.wallet.as_ref(), &request)
            .await;
        self.discard_if_stale(generation, "check_approval").await?;

        let mut state = self.state.write().await;
        state.loading = None;
        match result {
            Ok(approval) => {
                let needs = approval.needs_approval;
                state.approval = Some(approval);
                state.error = None;
                Ok(needs)
            }
            Err(e) => {
                warn!("[ApprovalTracker] Allowance check failed: {}", e);
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn approve(&self) -> PortalResult<()> {
        let _guard = self.approve_lock.lock().await;
        if self.state.read().await.approval.is_none() {
            self.check_approval().await?;
        }
        let (generation, request) = self.begin().await?;
        let mut approval = self
            .state
            .read()
            .await
            .approval
            .clone()
            .ok_or_else(|| PortalError::Internal("approval state missing".into()))?;

        let result = self
            .strategy
            .approve(self.wallet.as_ref(), &request, &mut approval)
            .await;
        self.discard_if_stale(generation, "approve").await?;

        let mut state = self.state.write().await;
        state.loading = None;
        state.approval = Some(approval);
        match result {
            Ok(count) => {
                self.metrics.approvals_submitted.inc_by(count as u64);
                info!("[ApprovalTracker] Approved {} spender(s)", count);
                state.error = None;
                Ok(())
            }
            Err(e) => {
                self.metrics
                    .approvals_failed
                    .with_label_values(&[e.error_type()])
                    .inc();
                warn!("[ApprovalTracker] Approval failed: {}", e);
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Cost of the approvals still missing, in wei
    pub async fn estimate_fee(&self) -> PortalResult<U256> {
        let (request, approval) = {
            let state = self.state.read().await;
            let request = state
                .request
                .ok_or_else(|| PortalError::InvalidArgument("no approval request set".into()))?;
            (request, state.approval.clone())
        };
        let Some(approval) = approval else {
            return Err(PortalError::InvalidArgument(
                "check approval before estimating fees".into(),
            ));
        };
        let generation = self.generation.current();
        let fee = self
            .strategy
            .estimate_fee(self.wallet.as_ref(), &request, &approval)
            .await?;
        self.discard_if_stale(generation, "estimate_fee").await?;
        Ok(fee)
    }
}
