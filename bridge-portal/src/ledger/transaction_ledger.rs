// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-network transaction ledger
//!
//! Owns every status transition. All mutations go through one writer lock
//! that is held across the in-memory change and the persistence write, so a
//! concurrent poll completion and a user submission can never interleave.

use super::store::{account_key, PortalState, PortalStateStore};
use super::types::*;
use crate::error::{PortalError, PortalResult};
use crate::metrics::PortalMetrics;
use crate::network::{Direction, PortalNetwork};
use ethers::types::{Address, TxHash};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub struct TransactionLedger {
    network: PortalNetwork,
    store: PortalStateStore,
    state: RwLock<PortalState>,
    metrics: Arc<PortalMetrics>,
}

impl TransactionLedger {
    /// Read the persisted state once and take ownership of it
    pub fn open(
        network: PortalNetwork,
        store: PortalStateStore,
        metrics: Arc<PortalMetrics>,
    ) -> PortalResult<Self> {
        let state = store.load()?;
        let entries: usize = state.account_txs.values().map(Vec::len).sum();
        info!(
            "[Ledger] Opened {} ledger from {} with {} entries",
            network,
            store.key(),
            entries
        );
        metrics
            .ledger_entries
            .with_label_values(&[&network.to_string()])
            .set(entries as i64);
        Ok(Self {
            network,
            store,
            state: RwLock::new(state),
            metrics,
        })
    }

    pub fn network(&self) -> PortalNetwork {
        self.network
    }

    async fn persist(&self, state: &PortalState) -> PortalResult<()> {
        let entries: usize = state.account_txs.values().map(Vec::len).sum();
        self.metrics
            .ledger_entries
            .with_label_values(&[&self.network.to_string()])
            .set(entries as i64);
        self.store.save(state).await.map_err(|e| {
            self.metrics.persistence_errors.inc();
            error!("[Ledger] Failed to persist {} ledger: {}", self.network, e);
            e
        })
    }

    /// Insert a freshly submitted transaction at the head as `Pending`.
    /// Returns false if the same `(account, direction, hash)` is already present.
    pub async fn record_submission(&self, submission: Submission) -> PortalResult<bool> {
        let mut state = self.state.write().await;
        let key = account_key(&submission.account);
        let exists = state.account_txs.get(&key).is_some_and(|txs| {
            txs.iter()
                .any(|t| t.hash == submission.hash && t.direction == submission.direction)
        });
        if exists {
            warn!(
                "[Ledger] Duplicate submission {:?} for {:?}, ignoring",
                submission.hash, submission.account
            );
            return Ok(false);
        }

        let seq = next_seq(&mut state);
        info!(
            "[Ledger] Recorded {} {:?} for {:?}",
            submission.direction, submission.hash, submission.account
        );
        let tx = BridgeTransaction::from_submission(submission, seq);
        state.account_txs.entry(key).or_default().insert(0, tx);
        self.persist(&state).await?;
        Ok(true)
    }

    /// Apply counterpart lookups to entries that still lack a counterpart hash.
    /// Status only ever moves forward; the counterpart hash is kept once the
    /// entry settles. Returns the number of changed entries.
    pub async fn reconcile(
        &self,
        account: Address,
        resolved: &HashMap<TxHash, CounterpartInfo>,
    ) -> PortalResult<usize> {
        if resolved.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.write().await;
        let Some(txs) = state.account_txs.get_mut(&account_key(&account)) else {
            return Ok(0);
        };

        let mut changed = 0;
        for tx in txs.iter_mut().filter(|t| t.counterpart_hash.is_none()) {
            let Some(info) = resolved.get(&tx.hash) else {
                continue;
            };
            let mut touched = false;
            if tx.advance(info.status) {
                debug!("[Ledger] {:?} -> {}", tx.hash, tx.status);
                touched = true;
            } else if info.status != tx.status {
                self.metrics.stale_updates_ignored.inc();
                debug!(
                    "[Ledger] Ignoring status {} for {:?} at {}",
                    info.status, tx.hash, tx.status
                );
            }
            // An in-flight counterpart is not recorded so the entry keeps refreshing
            if let Some(counterpart) = info.counterpart_hash.filter(|_| tx.is_settled()) {
                tx.counterpart_hash = Some(counterpart);
                touched = true;
            }
            if touched {
                changed += 1;
            }
        }

        if changed > 0 {
            self.metrics.reconcile_updates.inc_by(changed as u64);
            self.persist(&state).await?;
        }
        Ok(changed)
    }

    /// Merge the indexer's claimable set into the account's withdrawals.
    /// Claims with no matching entry become new entries at the head.
    pub async fn merge_claimable(
        &self,
        account: Address,
        claims: &[ClaimTransaction],
    ) -> PortalResult<MergeOutcome> {
        let mut state = self.state.write().await;
        let key = account_key(&account);
        let mut outcome = MergeOutcome::default();

        for claim in claims {
            let txs = state.account_txs.entry(key.clone()).or_default();
            let existing = txs.iter_mut().find(|t| {
                t.hash == claim.source_hash
                    || (t.counterpart_hash.is_some() && t.counterpart_hash == claim.counterpart_hash)
            });
            match existing {
                Some(tx) if tx.direction != Direction::Withdraw => {
                    warn!(
                        "[Ledger] Claim {:?} matches deposit {:?}, ignoring",
                        claim.source_hash, tx.hash
                    );
                }
                Some(tx) => {
                    let mut touched = false;
                    if tx.counterpart_hash.is_none() && claim.counterpart_hash.is_some() {
                        tx.counterpart_hash = claim.counterpart_hash;
                        touched = true;
                    }
                    if tx.advance(claim.status()) {
                        touched = true;
                    } else if tx.status != claim.status() {
                        self.metrics.stale_updates_ignored.inc();
                    }
                    if touched {
                        outcome.updated += 1;
                    }
                }
                None => {
                    let seq = next_seq(&mut state);
                    let tx = BridgeTransaction::from_claim(account, claim, seq);
                    info!(
                        "[Ledger] Synthesized withdraw {:?} ({}) for {:?}",
                        tx.hash, tx.status, account
                    );
                    state.account_txs.entry(key.clone()).or_default().insert(0, tx);
                    outcome.synthesized += 1;
                }
            }
        }

        let claims_changed = state
            .claim_records
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or_default()
            != claims;
        if claims_changed {
            state.claim_records.insert(key, claims.to_vec());
        }
        if claims_changed || outcome.updated > 0 || outcome.synthesized > 0 {
            self.metrics.reconcile_updates.inc_by(outcome.updated as u64);
            self.persist(&state).await?;
        }
        Ok(outcome)
    }

    /// The user broadcast the claim for a withdrawal
    pub async fn record_claim_submission(
        &self,
        account: Address,
        hash: TxHash,
        claim_tx_hash: TxHash,
    ) -> PortalResult<bool> {
        self.update_entry(account, hash, |tx| {
            if tx.direction != Direction::Withdraw || !tx.advance(TxStatus::Claiming) {
                return false;
            }
            tx.claim_tx_hash = Some(claim_tx_hash);
            true
        })
        .await
    }

    pub async fn mark_failed(&self, account: Address, hash: TxHash) -> PortalResult<bool> {
        self.update_entry(account, hash, |tx| tx.advance(TxStatus::Failed))
            .await
    }

    async fn update_entry<F>(&self, account: Address, hash: TxHash, f: F) -> PortalResult<bool>
    where
        F: FnOnce(&mut BridgeTransaction) -> bool,
    {
        let mut state = self.state.write().await;
        let tx = state
            .account_txs
            .get_mut(&account_key(&account))
            .and_then(|txs| txs.iter_mut().find(|t| t.hash == hash))
            .ok_or_else(|| {
                PortalError::InvalidArgument(format!("unknown transaction {:?}", hash))
            })?;
        let changed = f(tx);
        if changed {
            debug!("[Ledger] {:?} -> {}", hash, tx.status);
            self.persist(&state).await?;
        }
        Ok(changed)
    }

    /// Give pending deposits an assumed `Completed` once their source block is
    /// at least `threshold` blocks deep on L1. Withdrawals are never assumed.
    pub async fn apply_confirmations(
        &self,
        account: Address,
        l1_height: u64,
        threshold: u64,
    ) -> PortalResult<usize> {
        let mut state = self.state.write().await;
        let Some(txs) = state.account_txs.get_mut(&account_key(&account)) else {
            return Ok(0);
        };
        let mut changed = 0;
        for tx in txs.iter_mut().filter(|t| {
            t.direction == Direction::Deposit
                && t.status == TxStatus::Pending
                && t.counterpart_hash.is_none()
                && t.assumed_status.is_none()
        }) {
            let Some(block) = tx.source_block_number else {
                continue;
            };
            if l1_height.saturating_sub(block) >= threshold {
                tx.assumed_status = Some(TxStatus::Completed);
                debug!(
                    "[Ledger] Assuming {:?} completed at L1 height {}",
                    tx.hash, l1_height
                );
                changed += 1;
            }
        }
        if changed > 0 {
            self.persist(&state).await?;
        }
        Ok(changed)
    }

    /// 1-based page of the account's ledger, newest first
    pub async fn page(
        &self,
        account: Address,
        page_number: usize,
        page_size: usize,
    ) -> PortalResult<LedgerPage> {
        if page_size == 0 {
            return Err(PortalError::InvalidArgument("page size must be > 0".into()));
        }
        if page_number == 0 {
            return Err(PortalError::InvalidArgument("pages start at 1".into()));
        }
        let state = self.state.read().await;
        let txs = state
            .account_txs
            .get(&account_key(&account))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let items = txs
            .iter()
            .skip((page_number - 1).saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect();
        Ok(LedgerPage {
            items,
            page: page_number,
            page_size,
            total: txs.len(),
        })
    }

    /// Hashes still waiting on the indexer
    pub async fn needs_refresh(&self, account: Address) -> Vec<TxHash> {
        let state = self.state.read().await;
        state
            .account_txs
            .get(&account_key(&account))
            .map(|txs| {
                txs.iter()
                    .filter(|t| t.counterpart_hash.is_none() && t.assumed_status.is_none())
                    .map(|t| t.hash)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn transaction(&self, account: Address, hash: TxHash) -> Option<BridgeTransaction> {
        let state = self.state.read().await;
        state
            .account_txs
            .get(&account_key(&account))
            .and_then(|txs| txs.iter().find(|t| t.hash == hash).cloned())
    }

    pub async fn len(&self, account: Address) -> usize {
        let state = self.state.read().await;
        state
            .account_txs
            .get(&account_key(&account))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Drop the in-memory copy of an account and reload it from the store
    pub async fn evict(&self, account: Address) -> PortalResult<()> {
        let mut state = self.state.write().await;
        let key = account_key(&account);
        let mut stored = self.store.reload().await?;
        match stored.account_txs.remove(&key) {
            Some(txs) => state.account_txs.insert(key.clone(), txs),
            None => state.account_txs.remove(&key),
        };
        match stored.claim_records.remove(&key) {
            Some(claims) => state.claim_records.insert(key, claims),
            None => state.claim_records.remove(&key),
        };
        state.next_seq = state.next_seq.max(stored.next_seq);
        debug!("[Ledger] Evicted {:?} from {} ledger", account, self.network);
        Ok(())
    }

    pub async fn claim_records(&self, account: Address) -> Vec<ClaimTransaction> {
        let state = self.state.read().await;
        state
            .claim_records
            .get(&account_key(&account))
            .cloned()
            .unwrap_or_default()
    }

    /// Add a token to the user's list; re-adding replaces the entry
    pub async fn add_token(&self, token: TokenInfo) -> PortalResult<()> {
        let mut state = self.state.write().await;
        state
            .added_token_list
            .retain(|t| !(t.chain_id == token.chain_id && t.address == token.address));
        state.added_token_list.push(token);
        self.persist(&state).await
    }

    pub async fn added_tokens(&self) -> Vec<TokenInfo> {
        self.state.read().await.added_token_list.clone()
    }

    /// Add or relabel a wallet contact
    pub async fn add_contact(&self, contact: WalletContact) -> PortalResult<()> {
        let mut state = self.state.write().await;
        match state
            .wallet_contacts
            .iter_mut()
            .find(|c| c.address == contact.address)
        {
            Some(existing) => existing.label = contact.label,
            None => state.wallet_contacts.push(contact),
        }
        self.persist(&state).await
    }

    pub async fn contacts(&self) -> Vec<WalletContact> {
        self.state.read().await.wallet_contacts.clone()
    }
}

fn next_seq(state: &mut PortalState) -> u64 {
    state.next_seq += 1;
    state.next_seq
}
