use crate::server::{
    claim::arbiter::clear_notified,
    config::{DispatchSettings, ExpiryPolicy},
    dispatch::{gate::DonationGate, selector::select_next_batch},
    notify::hub::Hub,
    store::{DonationStore, OrganizationDirectory},
    telemetry::increment_rounds_dispatched,
};
use chrono::Utc;
use harvest_core::{
    Result,
    events::{DonationAvailable, ServerEvent},
    ids::{DonationId, OrganizationId},
    types::{ClaimStatus, Donation, Organization},
};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

/// Everything a dispatch loop needs, shared by all loops.
pub struct DispatchContext<S, D> {
    pub store: Arc<S>,
    pub directory: Arc<D>,
    pub hub: Arc<Hub>,
    pub gate: Arc<DonationGate>,
    pub settings: DispatchSettings,
}

/// Why a dispatch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// An organization claimed the donation.
    Claimed,
    /// An operator withdrew the donation.
    Cancelled,
    /// The use-by deadline passed and the loop cancelled it.
    Expired,
    /// The donation record disappeared from the store.
    Vanished,
    /// The process is shutting down.
    Shutdown,
}

#[derive(Debug)]
enum Phase {
    Selecting,
    Notifying {
        donation: Donation,
        batch: Vec<Organization>,
    },
    Waiting,
    Terminated(LoopExit),
}

const fn terminal_exit(donation: &Donation) -> Option<LoopExit> {
    match donation.status {
        ClaimStatus::Open => None,
        ClaimStatus::Claimed => Some(LoopExit::Claimed),
        ClaimStatus::Cancelled => Some(LoopExit::Cancelled),
    }
}

/// Drives one donation through `SELECTING → NOTIFYING → WAITING` until it
/// is claimed, cancelled, expired, gone, or the process shuts down.
///
/// Spawned as a Tokio task, one per open donation. `shutdown` is observed
/// only while WAITING and during error backoff, so an in-flight conditional
/// update always completes.
///
/// Store or directory failures do not end the loop: the step is logged and
/// retried from SELECTING after one poll interval.
#[tracing::instrument(name = "dispatch", skip_all, fields(donation = %donation_id))]
pub async fn dispatch_loop<S, D>(
    ctx: Arc<DispatchContext<S, D>>,
    donation_id: DonationId,
    shutdown: CancellationToken,
) -> LoopExit
where
    S: DonationStore,
    D: OrganizationDirectory,
{
    tracing::debug!("dispatch loop started");
    let mut phase = Phase::Selecting;

    loop {
        let step = match phase {
            Phase::Selecting => select(&ctx, donation_id).await,
            Phase::Notifying { donation, batch } => notify(&ctx, &donation, batch).await,
            Phase::Waiting => wait(&ctx, donation_id, &shutdown).await,
            Phase::Terminated(exit) => {
                tracing::info!(?exit, "dispatch loop terminated");
                return exit;
            }
        };

        phase = match step {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(error = %e, "dispatch step failed, retrying");
                tokio::select! {
                    () = shutdown.cancelled() => Phase::Terminated(LoopExit::Shutdown),
                    () = sleep(ctx.settings.poll_interval) => Phase::Selecting,
                }
            }
        };
    }
}

async fn select<S, D>(ctx: &DispatchContext<S, D>, donation_id: DonationId) -> Result<Phase>
where
    S: DonationStore,
    D: OrganizationDirectory,
{
    let Some(donation) = ctx.store.get(donation_id).await? else {
        return Ok(Phase::Terminated(LoopExit::Vanished));
    };
    if let Some(exit) = terminal_exit(&donation) {
        return Ok(Phase::Terminated(exit));
    }

    if ctx.settings.expiry == ExpiryPolicy::AfterUseBy && Utc::now() >= donation.expires_at() {
        let _guard = ctx.gate.lock(donation_id).await;
        if ctx.store.try_cancel(donation_id, Utc::now()).await? {
            if let Some(cancelled) = ctx.store.get(donation_id).await? {
                clear_notified(&ctx.hub, &cancelled, None);
            }
            tracing::info!(use_by = %donation.use_by, "donation expired unclaimed");
            return Ok(Phase::Terminated(LoopExit::Expired));
        }
        // Resolved concurrently; the next read sees the terminal status.
        return Ok(Phase::Selecting);
    }

    let batch = select_next_batch(
        ctx.directory.as_ref(),
        &donation,
        ctx.settings.batch_size,
        ctx.settings.radius_m,
    )
    .await?;

    Ok(Phase::Notifying { donation, batch })
}

async fn notify<S, D>(
    ctx: &DispatchContext<S, D>,
    donation: &Donation,
    batch: Vec<Organization>,
) -> Result<Phase>
where
    S: DonationStore,
{
    let ids: Vec<OrganizationId> = batch.iter().map(|org| org.id).collect();

    // Held until the frames are out so a concurrent claim either precedes the
    // round entirely or sees these organizations in the notified-set.
    let _guard = ctx.gate.lock(donation.id).await;

    let Some(updated) = ctx
        .store
        .record_round(donation.id, &ids, Utc::now())
        .await?
    else {
        tracing::debug!("donation resolved before the round was recorded");
        return Ok(Phase::Selecting);
    };
    increment_rounds_dispatched();

    if ids.is_empty() {
        tracing::debug!(round = updated.round, "no eligible organizations in range");
    } else {
        let offer = ServerEvent::DonationAvailable(DonationAvailable::new(&updated, updated.round));
        let delivered = ctx.hub.broadcast_to_set(&ids, &offer);
        tracing::info!(
            round = updated.round,
            batch = ids.len(),
            delivered,
            "round dispatched"
        );
    }

    Ok(Phase::Waiting)
}

async fn wait<S, D>(
    ctx: &DispatchContext<S, D>,
    donation_id: DonationId,
    shutdown: &CancellationToken,
) -> Result<Phase>
where
    S: DonationStore,
{
    let poll_every = ctx.settings.poll_interval;
    let start = Instant::now();
    let window = sleep_until(start + ctx.settings.wait_interval);
    tokio::pin!(window);

    let mut poll = interval_at(start + poll_every, poll_every);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return Ok(Phase::Terminated(LoopExit::Shutdown)),
            _ = poll.tick() => {
                match ctx.store.get(donation_id).await? {
                    None => return Ok(Phase::Terminated(LoopExit::Vanished)),
                    Some(current) => {
                        if let Some(exit) = terminal_exit(&current) {
                            return Ok(Phase::Terminated(exit));
                        }
                    }
                }
            }
            () = &mut window => return Ok(Phase::Selecting),
        }
    }
}
