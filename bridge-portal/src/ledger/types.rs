// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ledger record types

use crate::network::Direction;
use ethers::types::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a bridge transaction
///
/// Deposit:  Pending -> Relaying -> Completed
/// Withdraw: Pending -> ReadyToClaim -> Claiming -> Claimed
/// Either:   any non-terminal -> Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Relaying,
    Completed,
    ReadyToClaim,
    Claiming,
    Claimed,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Completed | TxStatus::Claimed | TxStatus::Failed
        )
    }

    /// Position along the direction's path
    fn stage(&self) -> u8 {
        match self {
            TxStatus::Pending => 0,
            TxStatus::Relaying | TxStatus::ReadyToClaim => 1,
            TxStatus::Completed | TxStatus::Claiming => 2,
            TxStatus::Claimed => 3,
            TxStatus::Failed => u8::MAX,
        }
    }

    pub fn is_valid_for(&self, direction: Direction) -> bool {
        match self {
            TxStatus::Pending | TxStatus::Failed => true,
            TxStatus::Relaying | TxStatus::Completed => direction == Direction::Deposit,
            TxStatus::ReadyToClaim | TxStatus::Claiming | TxStatus::Claimed => {
                direction == Direction::Withdraw
            }
        }
    }

    /// Forward-only transition check
    pub fn can_advance_to(&self, next: TxStatus, direction: Direction) -> bool {
        if self.is_terminal() || !next.is_valid_for(direction) {
            return false;
        }
        next == TxStatus::Failed || next.stage() > self.stage()
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxStatus::Pending => "pending",
            TxStatus::Relaying => "relaying",
            TxStatus::Completed => "completed",
            TxStatus::ReadyToClaim => "ready_to_claim",
            TxStatus::Claiming => "claiming",
            TxStatus::Claimed => "claimed",
            TxStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A user-submitted transaction about to enter the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub hash: TxHash,
    pub direction: Direction,
    pub account: Address,
    pub amount: U256,
    /// `None` for the native token
    pub token_address: Option<Address>,
    pub token_decimals: u8,
    pub source_block_number: Option<u64>,
    pub source_timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeTransaction {
    pub hash: TxHash,
    #[serde(default)]
    pub counterpart_hash: Option<TxHash>,
    pub direction: Direction,
    pub account: Address,
    pub amount: U256,
    #[serde(default)]
    pub token_address: Option<Address>,
    #[serde(default = "default_decimals")]
    pub token_decimals: u8,
    #[serde(default)]
    pub source_block_number: Option<u64>,
    #[serde(default)]
    pub source_timestamp: Option<u64>,
    pub status: TxStatus,
    #[serde(default)]
    pub assumed_status: Option<TxStatus>,
    #[serde(default)]
    pub claim_tx_hash: Option<TxHash>,
    /// Assigned once on first insertion; newest entries have the highest value
    #[serde(default)]
    pub first_seen_seq: u64,
}

fn default_decimals() -> u8 {
    18
}

impl BridgeTransaction {
    pub(crate) fn from_submission(s: Submission, seq: u64) -> Self {
        Self {
            hash: s.hash,
            counterpart_hash: None,
            direction: s.direction,
            account: s.account,
            amount: s.amount,
            token_address: s.token_address,
            token_decimals: s.token_decimals,
            source_block_number: s.source_block_number,
            source_timestamp: s.source_timestamp,
            status: TxStatus::Pending,
            assumed_status: None,
            claim_tx_hash: None,
            first_seen_seq: seq,
        }
    }

    pub(crate) fn from_claim(account: Address, claim: &ClaimTransaction, seq: u64) -> Self {
        Self {
            hash: claim.source_hash,
            counterpart_hash: claim.counterpart_hash,
            direction: Direction::Withdraw,
            account,
            amount: claim.amount.unwrap_or_default(),
            token_address: claim.token_address,
            token_decimals: claim.token_decimals.unwrap_or_else(default_decimals),
            source_block_number: claim.source_block_number,
            source_timestamp: claim.source_timestamp,
            status: claim.status(),
            assumed_status: None,
            claim_tx_hash: None,
            first_seen_seq: seq,
        }
    }

    pub fn is_native(&self) -> bool {
        self.token_address.is_none()
    }

    /// Status to show: a heuristic assumption overrides only non-terminal confirmed status
    pub fn display_status(&self) -> TxStatus {
        match self.assumed_status {
            Some(assumed) if !self.status.is_terminal() => assumed,
            _ => self.status,
        }
    }

    /// Apply a confirmed status under the forward-only rule.
    /// Returns true if the status changed.
    pub(crate) fn advance(&mut self, next: TxStatus) -> bool {
        if self.status.can_advance_to(next, self.direction) {
            self.status = next;
            self.assumed_status = None;
            true
        } else {
            false
        }
    }

    /// No further counterpart lookups can move this entry. Deposits settle at a
    /// terminal status; withdrawals once they are claimable, since claims arrive
    /// through the claimable set.
    pub fn is_settled(&self) -> bool {
        match self.direction {
            Direction::Deposit => self.status.is_terminal(),
            Direction::Withdraw => self.status.is_terminal() || self.status.stage() >= 1,
        }
    }
}

/// Counterpart lookup result for one source hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterpartInfo {
    pub counterpart_hash: Option<TxHash>,
    pub status: TxStatus,
}

/// A withdrawal the indexer reports as claimable (or already claimed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTransaction {
    pub source_hash: TxHash,
    #[serde(default)]
    pub counterpart_hash: Option<TxHash>,
    #[serde(default)]
    pub claimed_at_timestamp: Option<u64>,
    #[serde(default)]
    pub amount: Option<U256>,
    #[serde(default)]
    pub token_address: Option<Address>,
    #[serde(default)]
    pub token_decimals: Option<u8>,
    #[serde(default)]
    pub source_block_number: Option<u64>,
    #[serde(default)]
    pub source_timestamp: Option<u64>,
}

impl ClaimTransaction {
    pub fn new(source_hash: TxHash) -> Self {
        Self {
            source_hash,
            counterpart_hash: None,
            claimed_at_timestamp: None,
            amount: None,
            token_address: None,
            token_decimals: None,
            source_block_number: None,
            source_timestamp: None,
        }
    }

    pub fn status(&self) -> TxStatus {
        if self.claimed_at_timestamp.is_some() {
            TxStatus::Claimed
        } else {
            TxStatus::ReadyToClaim
        }
    }
}

/// A token the user added to their list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub chain_id: u64,
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletContact {
    pub address: Address,
    pub label: String,
}

/// One page of an account's ledger, newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPage {
    pub items: Vec<BridgeTransaction>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

impl LedgerPage {
    pub fn total_pages(&self) -> usize {
        if self.page_size == 0 {
            0
        } else {
            self.total.div_ceil(self.page_size)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub updated: usize,
    pub synthesized: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_path_is_forward_only() {
        let d = Direction::Deposit;
        assert!(TxStatus::Pending.can_advance_to(TxStatus::Relaying, d));
        assert!(TxStatus::Pending.can_advance_to(TxStatus::Completed, d));
        assert!(TxStatus::Relaying.can_advance_to(TxStatus::Completed, d));
        assert!(!TxStatus::Relaying.can_advance_to(TxStatus::Pending, d));
        assert!(!TxStatus::Completed.can_advance_to(TxStatus::Relaying, d));
        assert!(!TxStatus::Pending.can_advance_to(TxStatus::ReadyToClaim, d));
    }

    #[test]
    fn test_withdraw_path_is_forward_only() {
        let w = Direction::Withdraw;
        assert!(TxStatus::Pending.can_advance_to(TxStatus::ReadyToClaim, w));
        assert!(TxStatus::ReadyToClaim.can_advance_to(TxStatus::Claiming, w));
        assert!(TxStatus::Claiming.can_advance_to(TxStatus::Claimed, w));
        assert!(!TxStatus::Claiming.can_advance_to(TxStatus::ReadyToClaim, w));
        assert!(!TxStatus::Claimed.can_advance_to(TxStatus::Failed, w));
        assert!(!TxStatus::Pending.can_advance_to(TxStatus::Relaying, w));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        for status in [TxStatus::Pending, TxStatus::Relaying] {
            assert!(status.can_advance_to(TxStatus::Failed, Direction::Deposit));
        }
        for status in [TxStatus::ReadyToClaim, TxStatus::Claiming] {
            assert!(status.can_advance_to(TxStatus::Failed, Direction::Withdraw));
        }
        assert!(!TxStatus::Failed.can_advance_to(TxStatus::Failed, Direction::Deposit));
        assert!(!TxStatus::Completed.can_advance_to(TxStatus::Failed, Direction::Deposit));
    }

    #[test]
    fn test_display_status_prefers_confirmed_terminal() {
        let mut tx = BridgeTransaction::from_submission(
            Submission {
                hash: TxHash::from_low_u64_be(1),
                direction: Direction::Deposit,
                account: Address::from_low_u64_be(2),
                amount: U256::from(1u64),
                token_address: None,
                token_decimals: 18,
                source_block_number: Some(10),
                source_timestamp: None,
            },
            1,
        );
        tx.assumed_status = Some(TxStatus::Completed);
        assert_eq!(tx.display_status(), TxStatus::Completed);
        assert!(tx.advance(TxStatus::Failed));
        assert_eq!(tx.assumed_status, None);
        assert_eq!(tx.display_status(), TxStatus::Failed);
    }

    #[test]
    fn test_claim_status() {
        let mut claim = ClaimTransaction::new(TxHash::from_low_u64_be(1));
        assert_eq!(claim.status(), TxStatus::ReadyToClaim);
        claim.claimed_at_timestamp = Some(1_700_000_000);
        assert_eq!(claim.status(), TxStatus::Claimed);
    }

    #[test]
    fn test_status_serde_is_snake_case() {
        let json = serde_json::to_string(&TxStatus::ReadyToClaim).unwrap();
        assert_eq!(json, "\"ready_to_claim\"");
        assert_eq!(TxStatus::ReadyToClaim.to_string(), "ready_to_claim");
    }

    #[test]
    fn test_total_pages() {
        let page = LedgerPage {
            items: vec![],
            page: 1,
            page_size: 10,
            total: 21,
        };
        assert_eq!(page.total_pages(), 3);
    }
}
