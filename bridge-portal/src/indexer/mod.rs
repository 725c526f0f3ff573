// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bridge history indexer access

mod rest;
pub mod types;

pub use rest::RestTxSource;

use crate::error::PortalResult;
use crate::ledger::{ClaimTransaction, CounterpartInfo};
use async_trait::async_trait;
use ethers::types::{Address, TxHash};
use std::collections::HashMap;

#[async_trait]
pub trait ExternalTxSource: Send + Sync {
    /// Look up counterpart transactions for source-chain hashes.
    /// Hashes unknown to the indexer are absent from the result.
    async fn resolve_counterparts(
        &self,
        is_mainnet: bool,
        hashes: &[TxHash],
    ) -> PortalResult<HashMap<TxHash, CounterpartInfo>>;

    /// Every withdrawal of `account` that is claimable or already claimed
    async fn fetch_claimable(
        &self,
        is_mainnet: bool,
        account: Address,
    ) -> PortalResult<Vec<ClaimTransaction>>;
}

/// Deduplicate hashes, keeping first-occurrence order
pub fn dedup_hashes(hashes: &[TxHash]) -> Vec<TxHash> {
    let mut seen = std::collections::HashSet::with_capacity(hashes.len());
    hashes.iter().copied().filter(|h| seen.insert(*h)).collect()
}
