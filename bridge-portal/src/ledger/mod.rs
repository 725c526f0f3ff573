// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bridge transaction ledger
//!
//! ```text
//!   user submission ──► record_submission ─┐
//!   indexer lookups ──► reconcile ─────────┼──► TransactionLedger ──► PortalStateStore
//!   claimable set   ──► merge_claimable ───┘      (single writer)      (versioned blob)
//!                                                      │
//!   BridgeTxHistory ◄── page / needs_refresh ──────────┘
//! ```

pub mod history;
pub mod store;
mod transaction_ledger;
pub mod types;


pub use history::{BridgeTxHistory, HistoryContext};
pub use store::{
    FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, PortalState, PortalStateStore,
    SCHEMA_VERSION,
};
pub use transaction_ledger::TransactionLedger;
pub use types::*;
