// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Network selection and chain resolution
//!
//! Maps a `(network, direction)` selection plus the wallet's connected chain
//! to the concrete L1/L2 chain pair, the source/destination for the
//! direction, and whether the wallet sits on the source chain.

use crate::error::PortalError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortalNetwork {
    Mainnet,
    Testnet,
}

impl PortalNetwork {
    pub fn is_mainnet(&self) -> bool {
        matches!(self, PortalNetwork::Mainnet)
    }

    /// Detect the network from a well known chain ID
    /// Chain IDs:
    /// - 1: Ethereum mainnet
    /// - 534352: Scroll mainnet
    /// - 324: zkSync Era mainnet
    /// - 11155111: Sepolia (testnet)
    /// - 534351: Scroll Sepolia (testnet)
    /// - 300: zkSync Sepolia (testnet)
    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        match chain_id {
            1 | 534352 | 324 => Some(PortalNetwork::Mainnet),
            11155111 | 534351 | 300 => Some(PortalNetwork::Testnet),
            _ => None,
        }
    }

    /// Storage key of the persisted portal state for this network.
    /// Mainnet and testnet never share a key.
    pub fn storage_key(&self) -> &'static str {
        match self {
            PortalNetwork::Mainnet => "bridge-portal.mainnet",
            PortalNetwork::Testnet => "bridge-portal.testnet",
        }
    }
}

impl fmt::Display for PortalNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortalNetwork::Mainnet => write!(f, "mainnet"),
            PortalNetwork::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for PortalNetwork {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(PortalNetwork::Mainnet),
            "testnet" | "sepolia" => Ok(PortalNetwork::Testnet),
            other => Err(PortalError::InvalidArgument(format!(
                "unknown network: {}",
                other
            ))),
        }
    }
}

/// Bridge direction. Deposits move L1 -> L2, withdrawals L2 -> L1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Deposit,
    Withdraw,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Deposit => write!(f, "deposit"),
            Direction::Withdraw => write!(f, "withdraw"),
        }
    }
}

impl FromStr for Direction {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deposit" => Ok(Direction::Deposit),
            "withdraw" => Ok(Direction::Withdraw),
            other => Err(PortalError::InvalidArgument(format!(
                "unknown direction: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainRole {
    L1,
    L2,
}

/// Immutable description of one chain, built from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDescriptor {
    pub id: u64,
    pub role: ChainRole,
    pub rpc_url: Url,
    pub block_explorer_url: Option<Url>,
}

impl ChainDescriptor {
    /// Explorer link for a transaction, when an explorer is configured
    pub fn explorer_tx_url(&self, tx_hash: &str) -> Option<String> {
        self.block_explorer_url.as_ref().map(|base| {
            format!("{}/tx/{}", base.as_str().trim_end_matches('/'), tx_hash)
        })
    }
}

/// The L1/L2 pair of one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPair {
    pub l1: ChainDescriptor,
    pub l2: ChainDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSelection {
    pub network: Option<PortalNetwork>,
    pub direction: Direction,
}

impl NetworkSelection {
    pub fn new(network: PortalNetwork, direction: Direction) -> Self {
        Self {
            network: Some(network),
            direction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNetwork {
    pub network: PortalNetwork,
    pub direction: Direction,
    pub l1: ChainDescriptor,
    pub l2: ChainDescriptor,
    pub from: ChainDescriptor,
    pub to: ChainDescriptor,
    pub is_correct_network_set: bool,
}

impl ResolvedNetwork {
    pub fn chain_ids(&self) -> [u64; 2] {
        [self.l1.id, self.l2.id]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Network not selected or not configured. Consumers do nothing.
    Unresolved,
    Resolved(ResolvedNetwork),
}

impl Resolution {
    pub fn resolved(&self) -> Option<&ResolvedNetwork> {
        match self {
            Resolution::Resolved(r) => Some(r),
            Resolution::Unresolved => None,
        }
    }

    pub fn is_correct_network_set(&self) -> bool {
        self.resolved()
            .map(|r| r.is_correct_network_set)
            .unwrap_or(false)
    }
}

/// Pure resolver over the configured chain pairs
#[derive(Debug, Clone, Default)]
pub struct NetworkResolver {
    mainnet: Option<ChainPair>,
    testnet: Option<ChainPair>,
}

impl NetworkResolver {
    pub fn new(mainnet: Option<ChainPair>, testnet: Option<ChainPair>) -> Self {
        Self { mainnet, testnet }
    }

    pub fn pair(&self, network: PortalNetwork) -> Option<&ChainPair> {
        match network {
            PortalNetwork::Mainnet => self.mainnet.as_ref(),
            PortalNetwork::Testnet => self.testnet.as_ref(),
        }
    }

    /// Resolve a selection against the wallet's connected chain.
    ///
    /// `connected_chain_id` is `None` when no wallet is connected, in which case
    /// the resolution is still produced but `is_correct_network_set` is false.
    pub fn resolve(
        &self,
        selection: &NetworkSelection,
        connected_chain_id: Option<u64>,
    ) -> Resolution {
        let Some(network) = selection.network else {
            return Resolution::Unresolved;
        };
        let Some(pair) = self.pair(network) else {
            return Resolution::Unresolved;
        };
        let (from, to) = match selection.direction {
            Direction::Deposit => (pair.l1.clone(), pair.l2.clone()),
            Direction::Withdraw => (pair.l2.clone(), pair.l1.clone()),
        };
        let is_correct_network_set = connected_chain_id == Some(from.id);
        Resolution::Resolved(ResolvedNetwork {
            network,
            direction: selection.direction,
            l1: pair.l1.clone(),
            l2: pair.l2.clone(),
            from,
            to,
            is_correct_network_set,
        })
    }

    /// Which configured network a chain ID belongs to, if any
    pub fn network_of(&self, chain_id: u64) -> Option<PortalNetwork> {
        [PortalNetwork::Mainnet, PortalNetwork::Testnet]
            .into_iter()
            .find(|n| {
                self.pair(*n)
                    .map(|p| p.l1.id == chain_id || p.l2.id == chain_id)
                    .unwrap_or(false)
            })
    }
}

#[cfg(test)]
pub(crate) fn test_pair(l1_id: u64, l2_id: u64) -> ChainPair {
    ChainPair {
        l1: ChainDescriptor {
            id: l1_id,
            role: ChainRole::L1,
            rpc_url: Url::parse("http://127.0.0.1:8545").unwrap(),
            block_explorer_url: Some(Url::parse("https://etherscan.io").unwrap()),
        },
        l2: ChainDescriptor {
            id: l2_id,
            role: ChainRole::L2,
            rpc_url: Url::parse("http://127.0.0.1:8546").unwrap(),
            block_explorer_url: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> NetworkResolver {
        NetworkResolver::new(
            Some(test_pair(1, 534352)),
            Some(test_pair(11155111, 534351)),
        )
    }

    #[test]
    fn test_deposit_resolves_l1_to_l2() {
        let sel = NetworkSelection::new(PortalNetwork::Mainnet, Direction::Deposit);
        let r = resolver().resolve(&sel, Some(1));
        let r = r.resolved().unwrap();
        assert_eq!(r.from.id, 1);
        assert_eq!(r.to.id, 534352);
        assert!(r.is_correct_network_set);
    }

    #[test]
    fn test_withdraw_resolves_l2_to_l1() {
        let sel = NetworkSelection::new(PortalNetwork::Testnet, Direction::Withdraw);
        let r = resolver().resolve(&sel, Some(11155111));
        let r = r.resolved().unwrap();
        assert_eq!(r.from.id, 534351);
        assert_eq!(r.to.id, 11155111);
        // Connected to the destination, not the source
        assert!(!r.is_correct_network_set);
    }

    #[test]
    fn test_missing_network_is_unresolved() {
        let sel = NetworkSelection {
            network: None,
            direction: Direction::Deposit,
        };
        assert_eq!(resolver().resolve(&sel, Some(1)), Resolution::Unresolved);

        let only_mainnet = NetworkResolver::new(Some(test_pair(1, 534352)), None);
        let sel = NetworkSelection::new(PortalNetwork::Testnet, Direction::Deposit);
        assert_eq!(only_mainnet.resolve(&sel, Some(1)), Resolution::Unresolved);
    }

    #[test]
    fn test_no_wallet_is_not_correct_network() {
        let sel = NetworkSelection::new(PortalNetwork::Mainnet, Direction::Deposit);
        assert!(!resolver().resolve(&sel, None).is_correct_network_set());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let sel = NetworkSelection::new(PortalNetwork::Mainnet, Direction::Withdraw);
        let r = resolver();
        assert_eq!(r.resolve(&sel, Some(534352)), r.resolve(&sel, Some(534352)));
    }

    #[test]
    fn test_network_of_configured_chains() {
        let r = resolver();
        assert_eq!(r.network_of(534352), Some(PortalNetwork::Mainnet));
        assert_eq!(r.network_of(11155111), Some(PortalNetwork::Testnet));
        assert_eq!(r.network_of(42), None);
    }

    #[test]
    fn test_well_known_chain_ids() {
        assert_eq!(PortalNetwork::from_chain_id(1), Some(PortalNetwork::Mainnet));
        assert_eq!(PortalNetwork::from_chain_id(324), Some(PortalNetwork::Mainnet));
        assert_eq!(PortalNetwork::from_chain_id(300), Some(PortalNetwork::Testnet));
        assert_eq!(PortalNetwork::from_chain_id(31337), None);
    }

    #[test]
    fn test_storage_keys_are_disjoint() {
        assert_ne!(
            PortalNetwork::Mainnet.storage_key(),
            PortalNetwork::Testnet.storage_key()
        );
    }

    #[test]
    fn test_parse_network_and_direction() {
        assert_eq!("Mainnet".parse::<PortalNetwork>().unwrap(), PortalNetwork::Mainnet);
        assert_eq!("withdraw".parse::<Direction>().unwrap(), Direction::Withdraw);
        assert!("moon".parse::<PortalNetwork>().is_err());
    }

    #[test]
    fn test_explorer_tx_url() {
        let pair = test_pair(1, 2);
        assert_eq!(
            pair.l1.explorer_tx_url("0xabc").as_deref(),
            Some("https://etherscan.io/tx/0xabc")
        );
        assert_eq!(pair.l2.explorer_tx_url("0xabc"), None);
    }
}
