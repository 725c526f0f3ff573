// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Indexer wire format

use crate::error::{PortalError, PortalResult};
use crate::ledger::{ClaimTransaction, CounterpartInfo, TxStatus};
use ethers::types::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};

/// Common response envelope: `errcode == 0` means success
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn into_data(self) -> PortalResult<T> {
        if self.errcode != 0 {
            return Err(PortalError::Indexer(format!(
                "errcode {}: {}",
                self.errcode, self.errmsg
            )));
        }
        self.data
            .ok_or_else(|| PortalError::Indexer("response without data".into()))
    }
}

#[derive(Debug, Serialize)]
pub struct TxsByHashesRequest<'a> {
    pub txs: &'a [TxHash],
}

#[derive(Debug, Deserialize)]
pub struct TxsByHashesData {
    #[serde(default)]
    pub results: Vec<IndexedTx>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexedTxStatus {
    Pending,
    Relayed,
    ReadyToClaim,
    Claimed,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CounterpartTx {
    pub hash: TxHash,
    #[serde(default)]
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexedTx {
    pub hash: TxHash,
    /// "deposit" or "withdraw"
    pub message_type: String,
    pub tx_status: IndexedTxStatus,
    #[serde(default)]
    pub counterpart_chain_tx: Option<CounterpartTx>,
}

impl IndexedTx {
    /// Map to the ledger's per-direction status
    pub fn counterpart_info(&self) -> CounterpartInfo {
        let is_deposit = self.message_type.eq_ignore_ascii_case("deposit");
        let status = match (self.tx_status, is_deposit) {
            (IndexedTxStatus::Pending, _) => TxStatus::Pending,
            (IndexedTxStatus::Relayed, true) => TxStatus::Completed,
            (IndexedTxStatus::Relayed, false) => TxStatus::Claimed,
            (IndexedTxStatus::ReadyToClaim, true) => TxStatus::Relaying,
            (IndexedTxStatus::ReadyToClaim, false) => TxStatus::ReadyToClaim,
            (IndexedTxStatus::Claimed, true) => TxStatus::Completed,
            (IndexedTxStatus::Claimed, false) => TxStatus::Claimed,
            (IndexedTxStatus::Failed, _) => TxStatus::Failed,
        };
        CounterpartInfo {
            counterpart_hash: self.counterpart_chain_tx.as_ref().map(|c| c.hash),
            status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClaimablePage {
    #[serde(default)]
    pub results: Vec<ClaimableTx>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimableTx {
    pub hash: TxHash,
    #[serde(default)]
    pub token_amounts: Vec<U256>,
    #[serde(default)]
    pub l1_token_address: Option<Address>,
    #[serde(default)]
    pub token_decimals: Option<u8>,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub block_timestamp: Option<u64>,
    #[serde(default)]
    pub counterpart_chain_tx: Option<CounterpartTx>,
    #[serde(default)]
    pub claimed_at: Option<u64>,
}

impl From<ClaimableTx> for ClaimTransaction {
    fn from(tx: ClaimableTx) -> Self {
        ClaimTransaction {
            source_hash: tx.hash,
            counterpart_hash: tx.counterpart_chain_tx.map(|c| c.hash),
            claimed_at_timestamp: tx.claimed_at,
            amount: tx.token_amounts.first().copied(),
            // The zero address denotes the native token
            token_address: tx.l1_token_address.filter(|a| !a.is_zero()),
            token_decimals: tx.token_decimals,
            source_block_number: tx.block_number,
            source_timestamp: tx.block_timestamp,
        }
    }
}
