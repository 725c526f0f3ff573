// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! ERC-20 approval gating
//!
//! `BridgeStrategy` decides which contracts must be approved per bridge
//! family; `ApprovalTracker` drives checks and approvals for the active
//! transfer and exposes `need_approval` / `loading` / `error`.

mod strategy;
mod tracker;

pub use strategy::{
    strategy_for, ApprovalRequest, ApprovalState, BridgeFamily, BridgeStrategy, ScrollStrategy,
    TokenKind, ZksyncStrategy,
};
pub use tracker::ApprovalTracker;
