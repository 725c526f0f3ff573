// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_vec_with_registry, IntCounter, IntCounterVec, IntGaugeVec, Registry,
};

#[derive(Clone, Debug)]
pub struct PortalMetrics {
    pub(crate) probe_requests: IntCounterVec,
    pub(crate) probe_errors: IntCounterVec,
    pub(crate) latest_block: IntGaugeVec,

    pub(crate) indexer_requests: IntCounterVec,
    pub(crate) indexer_errors: IntCounterVec,

    pub(crate) reconcile_updates: IntCounter,
    pub(crate) stale_updates_ignored: IntCounter,
    pub(crate) ledger_entries: IntGaugeVec,
    pub(crate) persistence_errors: IntCounter,

    pub(crate) approvals_submitted: IntCounter,
    pub(crate) approvals_failed: IntCounterVec,
    pub(crate) stale_responses_discarded: IntCounterVec,
}

impl PortalMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            probe_requests: register_int_counter_vec_with_registry!(
                "portal_probe_requests",
                "Total latest-block requests issued by the chain probe",
                &["chain_id"],
                registry,
            )
            .unwrap(),
            probe_errors: register_int_counter_vec_with_registry!(
                "portal_probe_errors",
                "Total failed latest-block requests",
                &["chain_id", "type"],
                registry,
            )
            .unwrap(),
            latest_block: register_int_gauge_vec_with_registry!(
                "portal_latest_block",
                "Latest block height observed per chain",
                &["chain_id"],
                registry,
            )
            .unwrap(),
            indexer_requests: register_int_counter_vec_with_registry!(
                "portal_indexer_requests",
                "Total requests sent to the history indexer",
                &["op"],
                registry,
            )
            .unwrap(),
            indexer_errors: register_int_counter_vec_with_registry!(
                "portal_indexer_errors",
                "Total failed history indexer requests",
                &["op", "type"],
                registry,
            )
            .unwrap(),
            reconcile_updates: register_int_counter_with_registry!(
                "portal_reconcile_updates",
                "Total ledger entries updated by reconciliation",
                registry,
            )
            .unwrap(),
            stale_updates_ignored: register_int_counter_with_registry!(
                "portal_stale_updates_ignored",
                "Total status updates ignored because they would move a transaction backwards",
                registry,
            )
            .unwrap(),
            ledger_entries: register_int_gauge_vec_with_registry!(
                "portal_ledger_entries",
                "Number of ledger entries held in memory per network",
                &["network"],
                registry,
            )
            .unwrap(),
            persistence_errors: register_int_counter_with_registry!(
                "portal_persistence_errors",
                "Total failed writes of the persisted portal state",
                registry,
            )
            .unwrap(),
            approvals_submitted: register_int_counter_with_registry!(
                "portal_approvals_submitted",
                "Total ERC-20 approval transactions submitted",
                registry,
            )
            .unwrap(),
            approvals_failed: register_int_counter_vec_with_registry!(
                "portal_approvals_failed",
                "Total failed approval attempts",
                &["type"],
                registry,
            )
            .unwrap(),
            stale_responses_discarded: register_int_counter_vec_with_registry!(
                "portal_stale_responses_discarded",
                "Total async responses discarded because their context changed",
                &["op"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
