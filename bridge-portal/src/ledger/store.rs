// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Persisted portal state
//!
//! One blob per network storage key, wrapped in a versioned envelope:
//! `{"schema_version": N, "payload": {...}}`. Older versions are migrated;
//! unknown versions and malformed blobs load as empty state.

use super::types::{BridgeTransaction, ClaimTransaction, TokenInfo, WalletContact};
use crate::error::{PortalError, PortalResult};
use anyhow::Context;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub const SCHEMA_VERSION: u32 = 2;

/// Everything stored under one network's key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalState {
    #[serde(default)]
    pub added_token_list: Vec<TokenInfo>,
    #[serde(default)]
    pub wallet_contacts: Vec<WalletContact>,
    /// Account (lowercase hex) -> transactions, newest first
    #[serde(default)]
    pub account_txs: BTreeMap<String, Vec<BridgeTransaction>>,
    /// Account (lowercase hex) -> latest claimable set
    #[serde(default)]
    pub claim_records: BTreeMap<String, Vec<ClaimTransaction>>,
    #[serde(default)]
    pub next_seq: u64,
}

pub(crate) fn account_key(account: &Address) -> String {
    format!("{:?}", account)
}

/// Version 1 payload: no claim records, no sequence numbers
#[derive(Debug, Deserialize)]
struct PortalStateV1 {
    #[serde(default)]
    added_token_list: Vec<TokenInfo>,
    #[serde(default)]
    wallet_contacts: Vec<WalletContact>,
    #[serde(default)]
    account_txs: BTreeMap<String, Vec<BridgeTransaction>>,
}

impl From<PortalStateV1> for PortalState {
    fn from(v1: PortalStateV1) -> Self {
        // Legacy keys were not normalized; keys differing only in case are one account
        let mut merged: BTreeMap<String, Vec<BridgeTransaction>> = BTreeMap::new();
        for (account, txs) in v1.account_txs {
            let entry = merged.entry(account.to_ascii_lowercase()).or_default();
            for tx in txs {
                if !entry
                    .iter()
                    .any(|t| t.hash == tx.hash && t.direction == tx.direction)
                {
                    entry.push(tx);
                }
            }
        }

        let mut next_seq = 1;
        let mut account_txs = BTreeMap::new();
        for (account, mut txs) in merged {
            // Stored newest first; number from the back so the head gets the highest seq
            for tx in txs.iter_mut().rev() {
                tx.first_seen_seq = next_seq;
                next_seq += 1;
            }
            account_txs.insert(account, txs);
        }
        PortalState {
            added_token_list: v1.added_token_list,
            wallet_contacts: v1.wallet_contacts,
            account_txs,
            claim_records: BTreeMap::new(),
            next_seq,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    schema_version: u32,
    payload: T,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Current(PortalState),
    Migrated { from: u32, state: PortalState },
    Reset { reason: String },
}

impl Decoded {
    pub fn into_state(self) -> PortalState {
        match self {
            Decoded::Current(state) | Decoded::Migrated { state, .. } => state,
            Decoded::Reset { .. } => PortalState::default(),
        }
    }
}

pub fn encode(state: &PortalState) -> PortalResult<String> {
    Ok(serde_json::to_string(&Envelope {
        schema_version: SCHEMA_VERSION,
        payload: state,
    })?)
}

pub fn decode(raw: &str) -> Decoded {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            return Decoded::Reset {
                reason: format!("malformed json: {}", e),
            }
        }
    };

    let versioned = value
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .zip(value.get("payload"));
    let Some((version, payload)) = versioned else {
        // Unversioned legacy blob: the bare version 1 payload
        return match serde_json::from_value::<PortalStateV1>(value) {
            Ok(v1) => Decoded::Migrated {
                from: 0,
                state: v1.into(),
            },
            Err(e) => Decoded::Reset {
                reason: format!("unrecognized legacy state: {}", e),
            },
        };
    };

    let payload = payload.clone();
    match version {
        2 => match serde_json::from_value::<PortalState>(payload) {
            Ok(state) => Decoded::Current(state),
            Err(e) => Decoded::Reset {
                reason: format!("malformed v2 payload: {}", e),
            },
        },
        1 => match serde_json::from_value::<PortalStateV1>(payload) {
            Ok(v1) => Decoded::Migrated {
                from: 1,
                state: v1.into(),
            },
            Err(e) => Decoded::Reset {
                reason: format!("malformed v1 payload: {}", e),
            },
        },
        other => Decoded::Reset {
            reason: format!("unknown schema version {}", other),
        },
    }
}

/// Byte-level storage for serialized state
pub trait KeyValueStore: Send + Sync {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>>;

    fn write(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// One `<key>.json` file per key under a directory
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create storage dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        Ok(Some(content))
    }

    fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)
            .with_context(|| format!("Failed to write state file {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace state file {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Typed access to one storage key
#[derive(Clone)]
pub struct PortalStateStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl PortalStateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the state. Only an unreadable store is an error; bad contents
    /// load as empty state.
    pub fn load(&self) -> PortalResult<PortalState> {
        let raw = self
            .kv
            .read(&self.key)
            .map_err(|e| PortalError::Persistence(format!("{:#}", e)))?;
        Ok(self.decode_raw(raw))
    }

    /// `load` on the blocking pool, for callers already on the runtime
    pub async fn reload(&self) -> PortalResult<PortalState> {
        let kv = self.kv.clone();
        let key = self.key.clone();
        let raw = tokio::task::spawn_blocking(move || kv.read(&key))
            .await
            .map_err(|e| PortalError::Internal(format!("state read task failed: {}", e)))?
            .map_err(|e| PortalError::Persistence(format!("{:#}", e)))?;
        Ok(self.decode_raw(raw))
    }

    fn decode_raw(&self, raw: Option<String>) -> PortalState {
        let Some(raw) = raw else {
            return PortalState::default();
        };
        let decoded = decode(&raw);
        match &decoded {
            Decoded::Current(_) => {}
            Decoded::Migrated { from, .. } => info!(
                "[PortalStateStore] Migrated {} from schema v{} to v{}",
                self.key, from, SCHEMA_VERSION
            ),
            Decoded::Reset { reason } => warn!(
                "[PortalStateStore] Resetting {} to empty state: {}",
                self.key, reason
            ),
        }
        decoded.into_state()
    }

    /// Encode on the caller, write on the blocking pool
    pub async fn save(&self, state: &PortalState) -> PortalResult<()> {
        let raw = encode(state)?;
        let kv = self.kv.clone();
        let key = self.key.clone();
        tokio::task::spawn_blocking(move || kv.write(&key, &raw))
            .await
            .map_err(|e| PortalError::Internal(format!("state write task failed: {}", e)))?
            .map_err(|e| PortalError::Persistence(format!("{:#}", e)))
    }
}
