//! Per-donation ordering gate.
//!
//! The dispatch loop's record-then-notify step and the claim arbiter's
//! claim-then-fan-out step both run while holding the donation's gate. A
//! `donation_available` frame is therefore either fully sent before a claim
//! lands (and its recipients are in the notified-set the arbiter clears) or
//! never sent at all.

use harvest_core::ids::DonationId;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct DonationGate {
    locks: Mutex<HashMap<DonationId, Arc<AsyncMutex<()>>>>,
}

impl DonationGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `id`'s gate.
    pub async fn lock(&self, id: DonationId) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.lock().entry(id).or_default());
        lock.lock_owned().await
    }

    /// Drops the gate for a donation that reached a terminal status.
    ///
    /// A holder of the old gate keeps it until released; any later `lock`
    /// gets a fresh one, which is fine because every gated write is
    /// conditioned on the donation still being open.
    pub fn forget(&self, id: &DonationId) {
        self.locks.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
