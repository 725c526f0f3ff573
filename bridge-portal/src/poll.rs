// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Interval loops with explicit lifecycle handles

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns a spawned polling loop. Dropping the handle cancels the loop;
/// `stop` cancels and waits for the task to exit.
#[derive(Debug)]
pub struct PollHandle {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Spawn `tick` every `period`, starting immediately.
    ///
    /// A tick in flight when the handle is stopped is abandoned at its next
    /// await point and its result is never observed.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            info!("[{}] Polling started, interval {:?}", name, period);
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("[{}] Polling cancelled", name);
                        break;
                    }
                    _ = interval.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => {
                                debug!("[{}] Tick abandoned on cancel", name);
                                break;
                            }
                            _ = tick() => {}
                        }
                    }
                }
            }
        });
        Self {
            name,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("[{}] Polling task ended abnormally: {}", self.name, e);
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Monotonic counter identifying the current request context.
///
/// Callers capture `current()` before issuing an async request and check
/// `is_current` before applying its result; `bump` invalidates every
/// request issued under an older generation.
#[derive(Debug, Clone, Default)]
pub struct ContextGeneration(Arc<AtomicU64>);

impl ContextGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}
