// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! REST client for the bridge history indexer
//!
//! ```text
//!   resolve_counterparts ──► POST {base}/api/txsbyhashes        {"txs": [...]}
//!   fetch_claimable      ──► GET  {base}/api/l2/claimable?address=..&page=..&page_size=..
//! ```

use super::types::{ApiResponse, ClaimablePage, TxsByHashesData, TxsByHashesRequest};
use super::{dedup_hashes, ExternalTxSource};
use crate::config::PortalConfig;
use crate::error::{PortalError, PortalResult};
use crate::ledger::{ClaimTransaction, CounterpartInfo};
use crate::metrics::PortalMetrics;
use crate::network::PortalNetwork;
use async_trait::async_trait;
use ethers::types::{Address, TxHash};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const REQUEST_TIMEOUT_SECS: u64 = 15;
const CLAIMABLE_PAGE_SIZE: usize = 100;
const MAX_CLAIMABLE_PAGES: usize = 50;

pub struct RestTxSource {
    client: Client,
    mainnet_url: Option<Url>,
    testnet_url: Option<Url>,
    metrics: Arc<PortalMetrics>,
}

impl RestTxSource {
    pub fn new(
        mainnet_url: Option<Url>,
        testnet_url: Option<Url>,
        metrics: Arc<PortalMetrics>,
    ) -> PortalResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PortalError::Internal(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            mainnet_url,
            testnet_url,
            metrics,
        })
    }

    pub fn from_config(config: &PortalConfig, metrics: Arc<PortalMetrics>) -> PortalResult<Self> {
        Self::new(
            config.mainnet.as_ref().and_then(|n| n.indexer_url.clone()),
            config.testnet.as_ref().and_then(|n| n.indexer_url.clone()),
            metrics,
        )
    }

    fn endpoint(&self, is_mainnet: bool, path: &str) -> PortalResult<Url> {
        let base = if is_mainnet {
            self.mainnet_url.as_ref()
        } else {
            self.testnet_url.as_ref()
        };
        let network = if is_mainnet {
            PortalNetwork::Mainnet
        } else {
            PortalNetwork::Testnet
        };
        let base = base.ok_or_else(|| {
            PortalError::Config(format!("{}: indexer-url is not configured", network))
        })?;
        let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|e| PortalError::Config(format!("bad indexer url: {}", e)))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        op: &'static str,
        request: reqwest::RequestBuilder,
    ) -> PortalResult<T> {
        self.metrics.indexer_requests.with_label_values(&[op]).inc();
        let result = async {
            let response = request
                .send()
                .await
                .map_err(|e| PortalError::Indexer(format!("{} request failed: {}", op, e)))?;
            let status = response.status();
            if !status.is_success() {
                return Err(PortalError::Indexer(format!("{} returned HTTP {}", op, status)));
            }
            let body: ApiResponse<T> = response
                .json()
                .await
                .map_err(|e| PortalError::Indexer(format!("{} bad response body: {}", op, e)))?;
            body.into_data()
        }
        .await;
        if let Err(e) = &result {
            self.metrics
                .indexer_errors
                .with_label_values(&[op, e.error_type()])
                .inc();
            warn!("[RestTxSource] {}", e);
        }
        result
    }
}

#[async_trait]
impl ExternalTxSource for RestTxSource {
    async fn resolve_counterparts(
        &self,
        is_mainnet: bool,
        hashes: &[TxHash],
    ) -> PortalResult<HashMap<TxHash, CounterpartInfo>> {
        let hashes = dedup_hashes(hashes);
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        let url = self.endpoint(is_mainnet, "api/txsbyhashes")?;
        let data: TxsByHashesData = self
            .send(
                "txsbyhashes",
                self.client
                    .post(url)
                    .json(&TxsByHashesRequest { txs: &hashes }),
            )
            .await?;
        debug!(
            "[RestTxSource] Resolved {} of {} hashes",
            data.results.len(),
            hashes.len()
        );
        Ok(data
            .results
            .iter()
            .map(|tx| (tx.hash, tx.counterpart_info()))
            .collect())
    }

    async fn fetch_claimable(
        &self,
        is_mainnet: bool,
        account: Address,
    ) -> PortalResult<Vec<ClaimTransaction>> {
        let url = self.endpoint(is_mainnet, "api/l2/claimable")?;
        let address = format!("{:?}", account);
        let mut claims = Vec::new();
        for page in 1..=MAX_CLAIMABLE_PAGES {
            let data: ClaimablePage = self
                .send(
                    "claimable",
                    self.client.get(url.clone()).query(&[
                        ("address", address.clone()),
                        ("page", page.to_string()),
                        ("page_size", CLAIMABLE_PAGE_SIZE.to_string()),
                    ]),
                )
                .await?;
            let fetched = data.results.len();
            claims.extend(data.results.into_iter().map(ClaimTransaction::from));
            if fetched < CLAIMABLE_PAGE_SIZE || claims.len() >= data.total {
                break;
            }
        }
        debug!(
            "[RestTxSource] {} claimable withdrawals for {:?}",
            claims.len(),
            account
        );
        Ok(claims)
    }
}
