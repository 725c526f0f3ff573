// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Portal configuration
//!
//! Loaded from YAML or JSON (chosen by file extension). `${VAR}` placeholders
//! are substituted from the environment before parsing.

use crate::approval::BridgeFamily;
use crate::error::{PortalError, PortalResult};
use crate::network::{ChainDescriptor, ChainPair, ChainRole, NetworkResolver, PortalNetwork};
use anyhow::{Context, Result};
use ethers::types::Address;
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub trait Config: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let content = substitute_env_vars(&content)?;
        let ext = path.extension().and_then(|s| s.to_str());
        let config: Self = if ext == Some("yaml") || ext == Some("yml") {
            serde_yaml::from_str(&content).context("Failed to parse config YAML")?
        } else {
            serde_json::from_str(&content).context("Failed to parse config JSON")?
        };
        Ok(config)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config {}", path.as_ref().display()))?;
        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").context("Invalid env var pattern")?;
    let mut result = content.to_string();

    for cap in re.captures_iter(content) {
        let full_match = &cap[0];
        let var_name = &cap[1];

        match std::env::var(var_name) {
            Ok(var_value) => result = result.replace(full_match, &var_value),
            Err(_) => {
                // Keep the placeholder if env var is not set
                tracing::warn!(
                    "Environment variable {} not found, keeping placeholder",
                    var_name
                );
            }
        }
    }

    Ok(result)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PortalConfig {
    #[serde(default)]
    pub family: BridgeFamily,
    #[serde(default)]
    pub mainnet: Option<NetworkConfig>,
    #[serde(default)]
    pub testnet: Option<NetworkConfig>,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub assumed_status: AssumedStatusConfig,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

impl Config for PortalConfig {}

impl PortalConfig {
    pub fn network(&self, network: PortalNetwork) -> PortalResult<&NetworkConfig> {
        match network {
            PortalNetwork::Mainnet => self.mainnet.as_ref(),
            PortalNetwork::Testnet => self.testnet.as_ref(),
        }
        .ok_or_else(|| PortalError::Config(format!("network {} is not configured", network)))
    }

    pub fn resolver(&self) -> NetworkResolver {
        NetworkResolver::new(
            self.mainnet.as_ref().map(|n| n.chain_pair()),
            self.testnet.as_ref().map(|n| n.chain_pair()),
        )
    }

    pub fn validate(&self) -> PortalResult<()> {
        if self.mainnet.is_none() && self.testnet.is_none() {
            return Err(PortalError::Config(
                "at least one of mainnet/testnet must be configured".into(),
            ));
        }
        for (name, network) in [("mainnet", &self.mainnet), ("testnet", &self.testnet)] {
            if let Some(n) = network {
                if n.l1.chain_id == n.l2.chain_id {
                    return Err(PortalError::Config(format!(
                        "{}: l1 and l2 share chain id {}",
                        name, n.l1.chain_id
                    )));
                }
            }
        }
        self.polling.validate()
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".bridge-portal")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    pub l1: ChainConfig,
    pub l2: ChainConfig,
    /// Base URL of the bridge history indexer
    #[serde(default)]
    pub indexer_url: Option<Url>,
    #[serde(default)]
    pub gateways: GatewayConfig,
    /// (token, spender) pairs known to need no approval
    #[serde(default)]
    pub pre_approved: Vec<PreApprovedPair>,
}

impl NetworkConfig {
    pub fn chain_pair(&self) -> ChainPair {
        ChainPair {
            l1: self.l1.descriptor(ChainRole::L1),
            l2: self.l2.descriptor(ChainRole::L2),
        }
    }

    pub fn indexer_url(&self) -> PortalResult<&Url> {
        self.indexer_url
            .as_ref()
            .ok_or_else(|| PortalError::Config("indexer-url is not configured".into()))
    }

    pub fn is_pre_approved(&self, token: Address, spender: Address) -> bool {
        self.pre_approved
            .iter()
            .any(|p| p.token == token && p.spender == spender)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: Url,
    #[serde(default)]
    pub block_explorer_url: Option<Url>,
}

impl ChainConfig {
    fn descriptor(&self, role: ChainRole) -> ChainDescriptor {
        ChainDescriptor {
            id: self.chain_id,
            role,
            rpc_url: self.rpc_url.clone(),
            block_explorer_url: self.block_explorer_url.clone(),
        }
    }
}

/// Bridge contracts that act as ERC-20 spenders
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GatewayConfig {
    #[serde(default)]
    pub l1_gateway_router: Option<Address>,
    #[serde(default)]
    pub l2_gateway_router: Option<Address>,
    #[serde(default)]
    pub l1_shared_bridge: Option<Address>,
    #[serde(default)]
    pub custom_gateways: Vec<CustomGateway>,
}

impl GatewayConfig {
    pub fn require_l1_gateway_router(&self) -> PortalResult<Address> {
        self.l1_gateway_router
            .ok_or_else(|| PortalError::Config("gateways.l1-gateway-router is not set".into()))
    }

    pub fn require_l2_gateway_router(&self) -> PortalResult<Address> {
        self.l2_gateway_router
            .ok_or_else(|| PortalError::Config("gateways.l2-gateway-router is not set".into()))
    }

    pub fn require_l1_shared_bridge(&self) -> PortalResult<Address> {
        self.l1_shared_bridge
            .ok_or_else(|| PortalError::Config("gateways.l1-shared-bridge is not set".into()))
    }

    pub fn custom_gateway(&self, token: Address, role: ChainRole) -> Option<Address> {
        self.custom_gateways
            .iter()
            .find(|g| match role {
                ChainRole::L1 => g.l1_token == Some(token),
                ChainRole::L2 => g.l2_token == Some(token),
            })
            .and_then(|g| match role {
                ChainRole::L1 => g.l1_gateway,
                ChainRole::L2 => g.l2_gateway,
            })
    }
}

/// Token-specific gateway (e.g. USDC on Scroll)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CustomGateway {
    #[serde(default)]
    pub l1_token: Option<Address>,
    #[serde(default)]
    pub l2_token: Option<Address>,
    #[serde(default)]
    pub l1_gateway: Option<Address>,
    #[serde(default)]
    pub l2_gateway: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreApprovedPair {
    pub token: Address,
    pub spender: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PollingConfig {
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
    /// Consecutive failed reconcile ticks before an error is surfaced
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Max hashes per counterpart lookup
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
}

fn default_probe_interval_ms() -> u64 {
    3_000
}

fn default_reconcile_interval_ms() -> u64 {
    2_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_max_batch_size() -> usize {
    100
}

fn default_receipt_poll_interval_ms() -> u64 {
    3_000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
            failure_threshold: default_failure_threshold(),
            max_batch_size: default_max_batch_size(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
        }
    }
}

impl PollingConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    fn validate(&self) -> PortalResult<()> {
        if self.probe_interval_ms == 0
            || self.reconcile_interval_ms == 0
            || self.receipt_poll_interval_ms == 0
        {
            return Err(PortalError::Config("polling intervals must be non-zero".into()));
        }
        if self.max_batch_size == 0 {
            return Err(PortalError::Config("max-batch-size must be non-zero".into()));
        }
        Ok(())
    }
}

/// Block-confirmation heuristic for transactions the indexer has not yet resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AssumedStatusConfig {
    #[serde(default = "default_assumed_confirmations")]
    pub confirmations: u64,
}

fn default_assumed_confirmations() -> u64 {
    64
}

impl Default for AssumedStatusConfig {
    fn default() -> Self {
        Self {
            confirmations: default_assumed_confirmations(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const YAML: &str = r#"
family: scroll
mainnet:
  l1:
    chain-id: 1
    rpc-url: "${PORTAL_TEST_L1_RPC}"
    block-explorer-url: "https://etherscan.io"
  l2:
    chain-id: 534352
    rpc-url: "https://rpc.scroll.io"
  indexer-url: "https://mainnet-api-bridge.scroll.io"
  gateways:
    l1-gateway-router: "0xf8b1378579659d8f7ee5f3c929c2f3e332e41fd6"
  pre-approved:
    - token: "0x0000000000000000000000000000000000000001"
      spender: "0xf8b1378579659d8f7ee5f3c929c2f3e332e41fd6"
polling:
  probe-interval-ms: 1500
"#;

    fn write_temp(ext: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(ext).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_load_yaml_with_env_substitution() {
        std::env::set_var("PORTAL_TEST_L1_RPC", "http://localhost:8545");
        let file = write_temp(".yaml", YAML);
        let config = PortalConfig::load(file.path()).unwrap();
        std::env::remove_var("PORTAL_TEST_L1_RPC");

        assert_eq!(config.family, BridgeFamily::Scroll);
        let mainnet = config.mainnet.as_ref().unwrap();
        assert_eq!(mainnet.l1.rpc_url.as_str(), "http://localhost:8545/");
        assert_eq!(mainnet.l2.chain_id, 534352);
        assert!(config.testnet.is_none());
        assert_eq!(config.polling.probe_interval(), Duration::from_millis(1500));
        // Unset fields take defaults
        assert_eq!(config.polling.reconcile_interval_ms, 2_000);
        assert_eq!(config.polling.failure_threshold, 5);
        assert_eq!(config.assumed_status.confirmations, 64);
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_missing_env_var_keeps_placeholder() {
        std::env::remove_var("PORTAL_TEST_MISSING");
        let result = substitute_env_vars("rpc: ${PORTAL_TEST_MISSING}").unwrap();
        assert_eq!(result, "rpc: ${PORTAL_TEST_MISSING}");
    }

    #[test]
    #[serial]
    fn test_save_and_reload_json() {
        std::env::set_var("PORTAL_TEST_L1_RPC", "http://localhost:8545");
        let file = write_temp(".yaml", YAML);
        let config = PortalConfig::load(file.path()).unwrap();
        std::env::remove_var("PORTAL_TEST_L1_RPC");

        let dir = tempfile::TempDir::new().unwrap();
        let json_path = dir.path().join("portal.json");
        config.save(&json_path).unwrap();
        let reloaded = PortalConfig::load(&json_path).unwrap();
        assert_eq!(
            reloaded.mainnet.unwrap().gateways.l1_gateway_router,
            config.mainnet.unwrap().gateways.l1_gateway_router
        );
    }

    #[test]
    #[serial]
    fn test_missing_gateway_fails_at_point_of_use() {
        std::env::set_var("PORTAL_TEST_L1_RPC", "http://localhost:8545");
        let file = write_temp(".yml", YAML);
        let config = PortalConfig::load(file.path()).unwrap();
        std::env::remove_var("PORTAL_TEST_L1_RPC");

        let gateways = &config.mainnet.as_ref().unwrap().gateways;
        assert!(gateways.require_l1_gateway_router().is_ok());
        let err = gateways.require_l2_gateway_router().unwrap_err();
        assert_eq!(err.error_type(), "config");
        assert!(config.network(PortalNetwork::Testnet).is_err());
    }

    #[test]
    #[serial]
    fn test_pre_approved_lookup() {
        std::env::set_var("PORTAL_TEST_L1_RPC", "http://localhost:8545");
        let file = write_temp(".yaml", YAML);
        let config = PortalConfig::load(file.path()).unwrap();
        std::env::remove_var("PORTAL_TEST_L1_RPC");

        let mainnet = config.network(PortalNetwork::Mainnet).unwrap();
        let token = Address::from_low_u64_be(1);
        let spender = mainnet.gateways.l1_gateway_router.unwrap();
        assert!(mainnet.is_pre_approved(token, spender));
        assert!(!mainnet.is_pre_approved(Address::from_low_u64_be(2), spender));
    }

    #[test]
    fn test_validate_rejects_duplicate_chain_ids() {
        let chain = ChainConfig {
            chain_id: 1,
            rpc_url: Url::parse("http://localhost:8545").unwrap(),
            block_explorer_url: None,
        };
        let config = PortalConfig {
            family: BridgeFamily::Scroll,
            mainnet: Some(NetworkConfig {
                l1: chain.clone(),
                l2: chain,
                indexer_url: None,
                gateways: GatewayConfig::default(),
                pre_approved: vec![],
            }),
            testnet: None,
            polling: PollingConfig::default(),
            assumed_status: AssumedStatusConfig::default(),
            storage_dir: default_storage_dir(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let polling = PollingConfig {
            reconcile_interval_ms: 0,
            ..Default::default()
        };
        assert!(polling.validate().is_err());
    }

    #[test]
    fn test_custom_gateway_lookup_by_role() {
        let usdc_l1 = Address::from_low_u64_be(10);
        let usdc_l2 = Address::from_low_u64_be(11);
        let gateways = GatewayConfig {
            custom_gateways: vec![CustomGateway {
                l1_token: Some(usdc_l1),
                l2_token: Some(usdc_l2),
                l1_gateway: Some(Address::from_low_u64_be(20)),
                l2_gateway: Some(Address::from_low_u64_be(21)),
            }],
            ..Default::default()
        };
        assert_eq!(
            gateways.custom_gateway(usdc_l1, ChainRole::L1),
            Some(Address::from_low_u64_be(20))
        );
        assert_eq!(
            gateways.custom_gateway(usdc_l2, ChainRole::L2),
            Some(Address::from_low_u64_be(21))
        );
        assert_eq!(gateways.custom_gateway(usdc_l1, ChainRole::L2), None);
    }
}
