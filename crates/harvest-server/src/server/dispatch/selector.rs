use crate::server::store::OrganizationDirectory;
use harvest_core::{
    Result,
    types::{Donation, Organization},
};

/// Picks the next batch of organizations to notify about `donation`.
///
/// Queries `directory` for active organizations within `radius_m` of the
/// donation, nearest first, drops every organization already in the
/// donation's notified-set, and returns at most `batch_size` of the rest in
/// distance order. An empty result is a normal outcome: everyone in range has
/// already been asked.
///
/// This has no side effects and is safe to call concurrently.
pub async fn select_next_batch<D>(
    directory: &D,
    donation: &Donation,
    batch_size: usize,
    radius_m: f64,
) -> Result<Vec<Organization>>
where
    D: OrganizationDirectory,
{
    let nearby = directory.near(donation.location, radius_m).await?;

    Ok(nearby
        .into_iter()
        .map(|n| n.organization)
        .filter(|org| !donation.was_notified(&org.id))
        .take(batch_size)
        .collect())
}
