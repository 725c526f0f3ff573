// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-bridge-family approval rules

use crate::config::{GatewayConfig, NetworkConfig, PreApprovedPair};
use crate::error::{PortalError, PortalResult};
use crate::network::ChainRole;
use crate::rpc::{ReceiptStatus, WalletClient};
use async_trait::async_trait;
use ethers::types::{Address, U256};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeFamily {
    #[default]
    Scroll,
    #[serde(alias = "zk-sync")]
    Zksync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Native,
    Erc20(Address),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub token: TokenKind,
    pub owner: Address,
    pub amount: U256,
    /// Chain the transfer leaves from; allowances are read there
    pub from: ChainRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalState {
    pub token: TokenKind,
    pub spender_contracts: Vec<Address>,
    pub approved_contracts: Vec<Address>,
    pub needs_approval: bool,
}

impl ApprovalState {
    pub fn not_required(token: TokenKind) -> Self {
        Self {
            token,
            spender_contracts: vec![],
            approved_contracts: vec![],
            needs_approval: false,
        }
    }

    pub fn missing(&self) -> Vec<Address> {
        self.spender_contracts
            .iter()
            .filter(|s| !self.approved_contracts.contains(s))
            .copied()
            .collect()
    }

    fn mark_approved(&mut self, spender: Address) {
        if !self.approved_contracts.contains(&spender) {
            self.approved_contracts.push(spender);
        }
        self.needs_approval = !self.missing().is_empty();
    }
}

#[async_trait]
pub trait BridgeStrategy: Send + Sync {
    fn family(&self) -> BridgeFamily;

    /// Contracts that pull `token` from the owner. Empty means no approval.
    fn spenders(&self, token: Address, from: ChainRole) -> PortalResult<Vec<Address>>;

    fn is_pre_approved(&self, token: Address, spender: Address) -> bool;

    async fn check_approval(
        &self,
        wallet: &dyn WalletClient,
        request: &ApprovalRequest,
    ) -> PortalResult<ApprovalState> {
        let TokenKind::Erc20(token) = request.token else {
            return Ok(ApprovalState::not_required(request.token));
        };
        let spenders = self.spenders(token, request.from)?;
        let (pre_approved, to_read): (Vec<Address>, Vec<Address>) = spenders
            .iter()
            .copied()
            .partition(|s| self.is_pre_approved(token, *s));

        let mut state = ApprovalState {
            token: request.token,
            spender_contracts: spenders.clone(),
            approved_contracts: pre_approved,
            needs_approval: !to_read.is_empty(),
        };
        if to_read.is_empty() {
            return Ok(state);
        }

        let allowances = join_all(
            to_read
                .iter()
                .map(|spender| wallet.allowance(token, request.owner, *spender)),
        )
        .await;
        for (spender, allowance) in to_read.iter().zip(allowances) {
            let allowance = allowance?;
            debug!(
                "[{:?}] allowance of {:?} for {:?}: {}",
                self.family(),
                token,
                spender,
                allowance
            );
            if allowance >= request.amount {
                state.mark_approved(*spender);
            }
        }
        Ok(state)
    }

    /// Approve every missing spender for the max amount, one at a time.
    /// `state` reflects progress even when an error is returned.
    async fn approve(
        &self,
        wallet: &dyn WalletClient,
        request: &ApprovalRequest,
        state: &mut ApprovalState,
    ) -> PortalResult<usize> {
        let TokenKind::Erc20(token) = request.token else {
            return Ok(0);
        };
        let mut approved = 0;
        for spender in state.missing() {
            let tx_hash = wallet.send_approval(token, spender, U256::MAX).await?;
            match wallet.wait_for_receipt(tx_hash).await? {
                ReceiptStatus::Confirmed => {}
                ReceiptStatus::Reverted => return Err(PortalError::TransactionReverted(tx_hash)),
            }
            let allowance = wallet.allowance(token, request.owner, spender).await?;
            if allowance >= request.amount {
                info!("[{:?}] Approved {:?} for {:?}", self.family(), spender, token);
                state.mark_approved(spender);
                approved += 1;
            } else {
                warn!(
                    "[{:?}] Allowance for {:?} still {} after approval {:?}",
                    self.family(),
                    spender,
                    allowance,
                    tx_hash
                );
            }
        }
        Ok(approved)
    }

    /// Gas cost of the approvals still missing
    async fn estimate_fee(
        &self,
        wallet: &dyn WalletClient,
        request: &ApprovalRequest,
        state: &ApprovalState,
    ) -> PortalResult<U256> {
        let TokenKind::Erc20(token) = request.token else {
            return Ok(U256::zero());
        };
        let missing = state.missing();
        if missing.is_empty() {
            return Ok(U256::zero());
        }
        let gas_price = wallet.gas_price().await?;
        let mut total = U256::zero();
        for spender in missing {
            let gas = wallet.estimate_approval_gas(token, spender, U256::MAX).await?;
            total = total.saturating_add(gas.saturating_mul(gas_price));
        }
        Ok(total)
    }
}

/// Scroll: gateway router on the source chain, plus a token-specific
/// custom gateway when configured
pub struct ScrollStrategy {
    gateways: GatewayConfig,
    pre_approved: Vec<PreApprovedPair>,
}

impl ScrollStrategy {
    pub fn new(gateways: GatewayConfig, pre_approved: Vec<PreApprovedPair>) -> Self {
        Self {
            gateways,
            pre_approved,
        }
    }
}

#[async_trait]
impl BridgeStrategy for ScrollStrategy {
    fn family(&self) -> BridgeFamily {
        BridgeFamily::Scroll
    }

    fn spenders(&self, token: Address, from: ChainRole) -> PortalResult<Vec<Address>> {
        let router = match from {
            ChainRole::L1 => self.gateways.require_l1_gateway_router()?,
            ChainRole::L2 => self.gateways.require_l2_gateway_router()?,
        };
        let mut spenders = vec![router];
        if let Some(custom) = self.gateways.custom_gateway(token, from) {
            if custom != router {
                spenders.push(custom);
            }
        }
        Ok(spenders)
    }

    fn is_pre_approved(&self, token: Address, spender: Address) -> bool {
        self.pre_approved
            .iter()
            .any(|p| p.token == token && p.spender == spender)
    }
}

/// zkSync: L1 deposits go through the shared bridge; L2 withdrawals burn
/// without an allowance
pub struct ZksyncStrategy {
    gateways: GatewayConfig,
    pre_approved: Vec<PreApprovedPair>,
}

impl ZksyncStrategy {
    pub fn new(gateways: GatewayConfig, pre_approved: Vec<PreApprovedPair>) -> Self {
        Self {
            gateways,
            pre_approved,
        }
    }
}

#[async_trait]
impl BridgeStrategy for ZksyncStrategy {
    fn family(&self) -> BridgeFamily {
        BridgeFamily::Zksync
    }

    fn spenders(&self, _token: Address, from: ChainRole) -> PortalResult<Vec<Address>> {
        match from {
            ChainRole::L1 => Ok(vec![self.gateways.require_l1_shared_bridge()?]),
            ChainRole::L2 => Ok(vec![]),
        }
    }

    fn is_pre_approved(&self, token: Address, spender: Address) -> bool {
        self.pre_approved
            .iter()
            .any(|p| p.token == token && p.spender == spender)
    }
}

pub fn strategy_for(family: BridgeFamily, network: &NetworkConfig) -> Arc<dyn BridgeStrategy> {
    let gateways = network.gateways.clone();
    let pre_approved = network.pre_approved.clone();
    match family {
        BridgeFamily::Scroll => Arc::new(ScrollStrategy::new(gateways, pre_approved)),
        BridgeFamily::Zksync => Arc::new(ZksyncStrategy::new(gateways, pre_approved)),
    }
}
