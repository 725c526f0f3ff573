// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{PortalError, PortalResult};
use crate::indexer::{dedup_hashes, ExternalTxSource};
use crate::ledger::{ClaimTransaction, CounterpartInfo};
use crate::network::ChainDescriptor;
use crate::rpc::{AllowanceReader, BlockHeightSource, ReceiptStatus, WalletClient};
use crate::session::ChainConnector;
use async_trait::async_trait;
use ethers::types::{Address, TxHash, U256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug)]
pub struct MockBlockSource {
    chain_id: u64,
    height: AtomicU64,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockBlockSource {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            height: AtomicU64::new(0),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockHeightSource for MockBlockSource {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn latest_block_number(&self) -> PortalResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PortalError::TransientRpc("connection refused".into()));
        }
        Ok(self.height.load(Ordering::SeqCst))
    }
}

/// Hands out one shared `MockBlockSource` per chain ID
#[derive(Default)]
pub struct MockConnector {
    sources: Mutex<HashMap<u64, Arc<MockBlockSource>>>,
    fail_chain: Mutex<Option<u64>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self, chain_id: u64) -> Arc<MockBlockSource> {
        self.sources
            .lock()
            .unwrap()
            .entry(chain_id)
            .or_insert_with(|| Arc::new(MockBlockSource::new(chain_id)))
            .clone()
    }

    /// Refuse to connect to `chain_id`
    pub fn fail_connect(&self, chain_id: u64) {
        *self.fail_chain.lock().unwrap() = Some(chain_id);
    }
}

#[async_trait]
impl ChainConnector for MockConnector {
    async fn block_source(
        &self,
        chain: &ChainDescriptor,
    ) -> PortalResult<Arc<dyn BlockHeightSource>> {
        if *self.fail_chain.lock().unwrap() == Some(chain.id) {
            return Err(PortalError::Config(format!(
                "invalid rpc url {}",
                chain.rpc_url
            )));
        }
        let source: Arc<dyn BlockHeightSource> = self.source(chain.id);
        Ok(source)
    }
}

#[derive(Default)]
pub struct MockTxSource {
    resolved: Mutex<HashMap<TxHash, CounterpartInfo>>,
    claims: Mutex<Vec<ClaimTransaction>>,
    failing: AtomicBool,
    requests: Mutex<Vec<Vec<TxHash>>>,
    claim_fetches: AtomicUsize,
}

impl MockTxSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_resolved(&self, hash: TxHash, info: CounterpartInfo) {
        self.resolved.lock().unwrap().insert(hash, info);
    }

    pub fn set_claims(&self, claims: Vec<ClaimTransaction>) {
        *self.claims.lock().unwrap() = claims;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hash batches passed to `resolve_counterparts`, after dedup
    pub fn requests(&self) -> Vec<Vec<TxHash>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn claim_fetches(&self) -> usize {
        self.claim_fetches.load(Ordering::SeqCst)
    }

    fn check_failing(&self) -> PortalResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PortalError::Indexer("HTTP 502".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalTxSource for MockTxSource {
    async fn resolve_counterparts(
        &self,
        _is_mainnet: bool,
        hashes: &[TxHash],
    ) -> PortalResult<HashMap<TxHash, CounterpartInfo>> {
        let hashes = dedup_hashes(hashes);
        self.requests.lock().unwrap().push(hashes.clone());
        self.check_failing()?;
        let resolved = self.resolved.lock().unwrap();
        Ok(hashes
            .iter()
            .filter_map(|h| resolved.get(h).map(|info| (*h, *info)))
            .collect())
    }

    async fn fetch_claimable(
        &self,
        _is_mainnet: bool,
        _account: Address,
    ) -> PortalResult<Vec<ClaimTransaction>> {
        self.claim_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        Ok(self.claims.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct WalletState {
    allowances: HashMap<(Address, Address), U256>,
    rejected: HashSet<Address>,
    reverted: HashSet<Address>,
    sent: Vec<(Address, Address, U256)>,
    // tx hash -> index into `sent`
    pending: HashMap<TxHash, usize>,
}

/// In-memory ERC-20 wallet. Allowances are keyed by (token, spender).
#[derive(Default)]
pub struct MockWallet {
    state: Mutex<WalletState>,
    allowance_reads: AtomicUsize,
    read_delay: Mutex<Option<Duration>>,
}

impl MockWallet {
    pub const APPROVAL_GAS: u64 = 50_000;
    pub const GAS_PRICE: u64 = 1_000_000_000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_allowance(&self, token: Address, spender: Address, amount: U256) {
        self.state
            .lock()
            .unwrap()
            .allowances
            .insert((token, spender), amount);
    }

    /// The user declines the signature prompt for this spender
    pub fn reject_spender(&self, spender: Address) {
        self.state.lock().unwrap().rejected.insert(spender);
    }

    /// Approvals for this spender are mined but revert
    pub fn revert_spender(&self, spender: Address) {
        self.state.lock().unwrap().reverted.insert(spender);
    }

    /// Broadcast approvals as (token, spender, amount)
    pub fn sent(&self) -> Vec<(Address, Address, U256)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn allowance_reads(&self) -> usize {
        self.allowance_reads.load(Ordering::SeqCst)
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl AllowanceReader for MockWallet {
    async fn allowance(
        &self,
        token: Address,
        _owner: Address,
        spender: Address,
    ) -> PortalResult<U256> {
        self.allowance_reads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .allowances
            .get(&(token, spender))
            .copied()
            .unwrap_or_default())
    }
}

#[async_trait]
impl WalletClient for MockWallet {
    async fn send_approval(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> PortalResult<TxHash> {
        let mut state = self.state.lock().unwrap();
        if state.rejected.contains(&spender) {
            return Err(PortalError::UserRejected);
        }
        state.sent.push((token, spender, amount));
        let index = state.sent.len() - 1;
        let hash = TxHash::from_low_u64_be(0xa000 + index as u64);
        state.pending.insert(hash, index);
        Ok(hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> PortalResult<ReceiptStatus> {
        let mut state = self.state.lock().unwrap();
        let index = state
            .pending
            .remove(&tx_hash)
            .ok_or_else(|| PortalError::Rpc(format!("unknown transaction {:?}", tx_hash)))?;
        let (token, spender, amount) = state.sent[index];
        if state.reverted.contains(&spender) {
            return Ok(ReceiptStatus::Reverted);
        }
        state.allowances.insert((token, spender), amount);
        Ok(ReceiptStatus::Confirmed)
    }

    async fn estimate_approval_gas(
        &self,
        _token: Address,
        _spender: Address,
        _amount: U256,
    ) -> PortalResult<U256> {
        Ok(U256::from(Self::APPROVAL_GAS))
    }

    async fn gas_price(&self) -> PortalResult<U256> {
        Ok(U256::from(Self::GAS_PRICE))
    }
}
