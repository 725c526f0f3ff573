// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::types::TxHash;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortalError {
    // Transient RPC failure (timeout, connection reset, rate limit)
    #[error("transient rpc error: {0}")]
    TransientRpc(String),
    // Non-retryable RPC failure (bad response, unsupported method)
    #[error("rpc error: {0}")]
    Rpc(String),
    // Indexer request failed or returned a non-zero errcode
    #[error("indexer error: {0}")]
    Indexer(String),
    // Reading or writing the persisted portal state failed
    #[error("persistence error: {0}")]
    Persistence(String),
    // Missing or malformed configuration (e.g. contract address not set)
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    // The network selection could not be resolved
    #[error("network selection is unresolved")]
    Unresolved,
    // The user declined to sign in the wallet
    #[error("user rejected the request")]
    UserRejected,
    #[error("transaction {0:?} reverted")]
    TransactionReverted(TxHash),
    // The caller's context changed while the request was in flight
    #[error("stale response discarded")]
    Stale,
    #[error("internal error: {0}")]
    Internal(String),
}

impl PortalError {
    /// Returns a static string label suitable for Prometheus metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            PortalError::TransientRpc(_) => "transient_rpc",
            PortalError::Rpc(_) => "rpc",
            PortalError::Indexer(_) => "indexer",
            PortalError::Persistence(_) => "persistence",
            PortalError::Config(_) => "config",
            PortalError::InvalidArgument(_) => "invalid_argument",
            PortalError::Unresolved => "unresolved",
            PortalError::UserRejected => "user_rejected",
            PortalError::TransactionReverted(_) => "transaction_reverted",
            PortalError::Stale => "stale",
            PortalError::Internal(_) => "internal",
        }
    }

    /// Whether retrying on the next poll cycle may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PortalError::TransientRpc(_) | PortalError::Indexer(_) | PortalError::Stale
        )
    }
}

impl From<anyhow::Error> for PortalError {
    fn from(e: anyhow::Error) -> Self {
        PortalError::Internal(format!("{:#}", e))
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(e: serde_json::Error) -> Self {
        PortalError::Persistence(e.to_string())
    }
}

pub type PortalResult<T> = Result<T, PortalError>;
