// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::new_without_default, clippy::too_many_arguments)]

pub mod approval;
pub mod config;
pub mod error;
pub mod indexer;
pub mod ledger;
pub mod metrics;
pub mod network;
pub mod poll;
pub mod probe;
pub mod rpc;
pub mod session;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{Config, PortalConfig};
pub use error::{PortalError, PortalResult};
pub use metrics::PortalMetrics;
pub use network::{Direction, NetworkSelection, PortalNetwork};
pub use session::PortalSession;
