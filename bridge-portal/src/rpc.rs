// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain RPC access
//!
//! Traits at the seams the probe and the approval tracker depend on, plus
//! the ethers-backed implementation and an explicit provider cache.

use crate::error::{PortalError, PortalResult};
use crate::network::ChainDescriptor;
use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TxHash, U256, U64};
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

abigen!(
    Erc20Token,
    r#"[
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
    ]"#
);

#[async_trait]
pub trait BlockHeightSource: Send + Sync + Debug {
    fn chain_id(&self) -> u64;

    async fn latest_block_number(&self) -> PortalResult<u64>;
}

#[async_trait]
pub trait AllowanceReader: Send + Sync {
    async fn allowance(&self, token: Address, owner: Address, spender: Address)
        -> PortalResult<U256>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Confirmed,
    Reverted,
}

/// Wallet-side operations: everything that needs a signer
#[async_trait]
pub trait WalletClient: AllowanceReader {
    async fn send_approval(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> PortalResult<TxHash>;

    /// Waits until the transaction is mined. There is no timeout shorter
    /// than the chain's own confirmation time.
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> PortalResult<ReceiptStatus>;

    async fn estimate_approval_gas(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> PortalResult<U256>;

    async fn gas_price(&self) -> PortalResult<U256>;
}

/// Map a provider/contract error to a portal error by its message
pub(crate) fn classify_rpc_error(e: impl Display) -> PortalError {
    let msg = e.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("user rejected")
        || lower.contains("user denied")
        || lower.contains("code: 4001")
    {
        PortalError::UserRejected
    } else if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("429")
        || lower.contains("rate limit")
        || lower.contains("503")
    {
        PortalError::TransientRpc(msg)
    } else {
        PortalError::Rpc(msg)
    }
}

pub struct EthChainClient<M> {
    chain_id: u64,
    client: Arc<M>,
    receipt_poll_interval: Duration,
}

impl<M> Debug for EthChainClient<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthChainClient")
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

impl<M: Middleware + 'static> EthChainClient<M> {
    pub fn new(chain_id: u64, client: Arc<M>, receipt_poll_interval: Duration) -> Self {
        Self {
            chain_id,
            client,
            receipt_poll_interval,
        }
    }

    fn token(&self, token: Address) -> Erc20Token<M> {
        Erc20Token::new(token, self.client.clone())
    }
}

#[async_trait]
impl<M: Middleware + 'static> BlockHeightSource for EthChainClient<M> {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn latest_block_number(&self) -> PortalResult<u64> {
        self.client
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(classify_rpc_error)
            .tap_err(|e| {
                debug!(
                    "[EthChainClient] chain {} get_block_number failed: {}",
                    self.chain_id, e
                )
            })
    }
}

#[async_trait]
impl<M: Middleware + 'static> AllowanceReader for EthChainClient<M> {
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> PortalResult<U256> {
        self.token(token)
            .allowance(owner, spender)
            .call()
            .await
            .map_err(classify_rpc_error)
    }
}

#[async_trait]
impl<M: Middleware + 'static> WalletClient for EthChainClient<M> {
    async fn send_approval(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> PortalResult<TxHash> {
        let call = self.token(token).approve(spender, amount);
        let tx_hash = call
            .send()
            .await
            .map_err(classify_rpc_error)
            .tap_err(|e| {
                warn!(
                    "[EthChainClient] approve({:?}) on {:?} failed: {}",
                    spender, token, e
                )
            })?
            .tx_hash();
        info!(
            "[EthChainClient] Submitted approval of {:?} for {:?}: {:?}",
            token, spender, tx_hash
        );
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> PortalResult<ReceiptStatus> {
        loop {
            match self.client.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    let status = if receipt.status == Some(U64::from(1)) {
                        ReceiptStatus::Confirmed
                    } else {
                        ReceiptStatus::Reverted
                    };
                    debug!("[EthChainClient] Receipt for {:?}: {:?}", tx_hash, status);
                    return Ok(status);
                }
                Ok(None) => {}
                Err(e) => {
                    let err = classify_rpc_error(e);
                    if !err.is_transient() {
                        return Err(err);
                    }
                    warn!(
                        "[EthChainClient] Transient error fetching receipt {:?}: {}",
                        tx_hash, err
                    );
                }
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }

    async fn estimate_approval_gas(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> PortalResult<U256> {
        self.token(token)
            .approve(spender, amount)
            .estimate_gas()
            .await
            .map_err(classify_rpc_error)
    }

    async fn gas_price(&self) -> PortalResult<U256> {
        self.client
            .get_gas_price()
            .await
            .map_err(classify_rpc_error)
    }
}

/// HTTP providers keyed by RPC URL. Owned by whoever builds clients;
/// there is no process-wide instance.
#[derive(Debug, Default)]
pub struct ProviderCache {
    providers: RwLock<HashMap<Url, Arc<Provider<Http>>>>,
}

impl ProviderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_connect(&self, url: &Url) -> PortalResult<Arc<Provider<Http>>> {
        if let Some(provider) = self.providers.read().await.get(url) {
            return Ok(provider.clone());
        }
        let mut providers = self.providers.write().await;
        // Another caller may have inserted while we waited for the write lock
        if let Some(provider) = providers.get(url) {
            return Ok(provider.clone());
        }
        let provider = Provider::<Http>::try_from(url.as_str())
            .map_err(|e| PortalError::Config(format!("invalid rpc url {}: {}", url, e)))?;
        let provider = Arc::new(provider);
        providers.insert(url.clone(), provider.clone());
        debug!("[ProviderCache] Created provider for {}", url);
        Ok(provider)
    }

    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    pub async fn clear(&self) {
        self.providers.write().await.clear();
    }
}

/// Builds chain clients over a shared [`ProviderCache`]
#[derive(Debug)]
pub struct ChainClientFactory {
    cache: ProviderCache,
    receipt_poll_interval: Duration,
}

impl ChainClientFactory {
    pub fn new(receipt_poll_interval: Duration) -> Self {
        Self {
            cache: ProviderCache::new(),
            receipt_poll_interval,
        }
    }

    pub fn cache(&self) -> &ProviderCache {
        &self.cache
    }

    pub async fn read_only(
        &self,
        chain: &ChainDescriptor,
    ) -> PortalResult<Arc<EthChainClient<Provider<Http>>>> {
        let provider = self.cache.get_or_connect(&chain.rpc_url).await?;
        Ok(Arc::new(EthChainClient::new(
            chain.id,
            provider,
            self.receipt_poll_interval,
        )))
    }

    pub async fn block_source(
        &self,
        chain: &ChainDescriptor,
    ) -> PortalResult<Arc<dyn BlockHeightSource>> {
        let client: Arc<dyn BlockHeightSource> = self.read_only(chain).await?;
        Ok(client)
    }

    pub async fn signing(
        &self,
        chain: &ChainDescriptor,
        wallet: LocalWallet,
    ) -> PortalResult<Arc<EthChainClient<SignerMiddleware<Provider<Http>, LocalWallet>>>> {
        let provider = self.cache.get_or_connect(&chain.rpc_url).await?;
        let signer = SignerMiddleware::new(
            provider.as_ref().clone(),
            wallet.with_chain_id(chain.id),
        );
        Ok(Arc::new(EthChainClient::new(
            chain.id,
            Arc::new(signer),
            self.receipt_poll_interval,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ChainRole;
    use ethers::abi::Token;
    use ethers::providers::MockProvider;
    use ethers::types::Bytes;

    fn mocked(chain_id: u64) -> (EthChainClient<Provider<MockProvider>>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        (
            EthChainClient::new(chain_id, Arc::new(provider), Duration::from_millis(10)),
            mock,
        )
    }

    #[tokio::test]
    async fn test_latest_block_number() {
        let (client, mock) = mocked(1);
        mock.push::<U64, _>(U64::from(19_000_000)).unwrap();
        assert_eq!(client.latest_block_number().await.unwrap(), 19_000_000);
        assert_eq!(client.chain_id(), 1);
    }

    #[tokio::test]
    async fn test_latest_block_number_error() {
        // No queued response: the mock returns an error
        let (client, _mock) = mocked(1);
        assert!(client.latest_block_number().await.is_err());
    }

    #[tokio::test]
    async fn test_allowance_decodes_uint() {
        let (client, mock) = mocked(1);
        let encoded = ethers::abi::encode(&[Token::Uint(U256::from(500u64))]);
        mock.push::<Bytes, _>(Bytes::from(encoded)).unwrap();
        let allowance = client
            .allowance(
                Address::from_low_u64_be(1),
                Address::from_low_u64_be(2),
                Address::from_low_u64_be(3),
            )
            .await
            .unwrap();
        assert_eq!(allowance, U256::from(500u64));
    }

    #[test]
    fn test_classify_rpc_error() {
        assert_eq!(
            classify_rpc_error("MetaMask Tx Signature: User rejected the transaction"),
            PortalError::UserRejected
        );
        assert!(classify_rpc_error("request timed out").is_transient());
        assert!(classify_rpc_error("HTTP error 429 Too Many Requests").is_transient());
        assert_eq!(
            classify_rpc_error("execution reverted").error_type(),
            "rpc"
        );
    }

    #[tokio::test]
    async fn test_provider_cache_reuses_provider_per_url() {
        let cache = ProviderCache::new();
        let a = Url::parse("http://127.0.0.1:8545").unwrap();
        let b = Url::parse("http://127.0.0.1:8546").unwrap();
        let p1 = cache.get_or_connect(&a).await.unwrap();
        let p2 = cache.get_or_connect(&a).await.unwrap();
        let p3 = cache.get_or_connect(&b).await.unwrap();
        assert!(Arc::ptr_eq(&p1, &p2));
        assert!(!Arc::ptr_eq(&p1, &p3));
        assert_eq!(cache.len().await, 2);
        cache.clear().await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_factory_shares_cache_across_clients() {
        let factory = ChainClientFactory::new(Duration::from_secs(1));
        let chain = ChainDescriptor {
            id: 534352,
            role: ChainRole::L2,
            rpc_url: Url::parse("http://127.0.0.1:8546").unwrap(),
            block_explorer_url: None,
        };
        let source = factory.block_source(&chain).await.unwrap();
        let _reader = factory.read_only(&chain).await.unwrap();
        assert_eq!(source.chain_id(), 534352);
        assert_eq!(factory.cache().len().await, 1);
    }
}
