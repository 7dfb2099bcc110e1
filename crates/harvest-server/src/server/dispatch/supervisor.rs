//! Ownership of running dispatch loops.
//!
//! The [`DispatchSupervisor`] spawns exactly one [`dispatch_loop`] per open
//! donation, tracks them on a [`TaskTracker`], and drains them on shutdown.
//! All loops share a single [`CancellationToken`]; cancelling it wakes every
//! loop at its next suspension point.

use crate::server::{
    dispatch::worker::{DispatchContext, LoopExit, dispatch_loop},
    store::{DonationStore, OrganizationDirectory},
    telemetry::{decrement_loops_inflight, increment_loops_inflight},
};
use core::time::Duration;
use harvest_core::{Result, ids::DonationId, types::ClaimStatus};
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc};
use tokio::time::timeout;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

pub struct DispatchSupervisor<S, D> {
    ctx: Arc<DispatchContext<S, D>>,
    active: Arc<Mutex<HashSet<DonationId>>>,
    tracker: TaskTracker,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl<S, D> DispatchSupervisor<S, D>
where
    S: DonationStore,
    D: OrganizationDirectory,
{
    pub fn new(ctx: Arc<DispatchContext<S, D>>, shutdown_timeout: Duration) -> Self {
        Self {
            ctx,
            active: Arc::new(Mutex::new(HashSet::new())),
            tracker: TaskTracker::new(),
            shutdown_token: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    /// Starts a dispatch loop for `donation_id` unless one is already running
    /// or the supervisor is shutting down. Returns whether a loop was started.
    pub fn spawn(&self, donation_id: DonationId) -> bool {
        if self.shutdown_token.is_cancelled() {
            tracing::warn!(donation = %donation_id, "refusing to dispatch during shutdown");
            return false;
        }
        if !self.active.lock().insert(donation_id) {
            tracing::debug!(donation = %donation_id, "dispatch loop already running");
            return false;
        }

        let ctx = Arc::clone(&self.ctx);
        let active = Arc::clone(&self.active);
        let token = self.shutdown_token.child_token();

        increment_loops_inflight();
        self.tracker.spawn(async move {
            let gate = Arc::clone(&ctx.gate);
            let exit = dispatch_loop(ctx, donation_id, token).await;
            active.lock().remove(&donation_id);
            if exit != LoopExit::Shutdown {
                gate.forget(&donation_id);
            }
            decrement_loops_inflight();
        });
        true
    }

    /// Starts loops for every open donation in the store. Used at startup so
    /// donations survive a restart.
    ///
    /// # Errors
    ///
    /// Propagates a store failure while listing open donations.
    pub async fn resume_open(&self) -> Result<usize> {
        let open = self.ctx.store.list_by_status(ClaimStatus::Open).await?;
        let resumed = open
            .into_iter()
            .filter(|donation| self.spawn(donation.id))
            .count();
        tracing::info!(resumed, "resumed dispatch for open donations");
        Ok(resumed)
    }

    pub fn is_running(&self, donation_id: &DonationId) -> bool {
        self.active.lock().contains(donation_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Stops every dispatch loop.
    ///
    /// - Cancels the shared token so loops exit at their next suspension point
    ///   and no new loops start.
    /// - Closes the tracker and waits up to `shutdown_timeout` for the loops
    ///   to finish.
    ///
    /// Loops never leave a half-applied update behind: each conditional
    /// write completes before the loop observes cancellation.
    pub async fn shutdown(&self) {
        // === Phase 0: Stop accepting new loops and wake running ones ===
        tracing::info!(active = self.active_count(), "stopping dispatch loops");
        self.shutdown_token.cancel();
        self.tracker.close();

        // === Phase 1: Wait for loops to drain ===
        match timeout(self.shutdown_timeout, self.tracker.wait()).await {
            Ok(()) => tracing::debug!("all dispatch loops exited"),
            Err(_) => tracing::warn!(
                remaining = self.tracker.len(),
                "dispatch loop drain timed out"
            ),
        }

        tracing::info!("dispatch supervisor shutdown complete");
    }
}
