//! Application state shared by every HTTP route and socket connection.
//!
//! [`HarvestService`] owns the store, directory, notification hub, claim
//! arbiter and dispatch supervisor. Routes and sockets stay thin: they parse
//! wire input, call one method here, and render the result.
//!
//! ## Responsibilities
//!
//! - Validate and persist new donations, then start their dispatch loops.
//! - Register organizations and join sockets to their rooms.
//! - Route claims (HTTP or socket) through the single [`ClaimArbiter`] path.
//! - Resume dispatch for open donations at startup and drain it on shutdown.
//!
//! [`ClaimArbiter`]: crate::server::claim::arbiter::ClaimArbiter

use crate::server::{
    claim::arbiter::ClaimOutcome,
    config::ServerConfig,
    dispatch::gate::DonationGate,
    notify::hub::{ConnectionId, Hub},
    service::config::{Arbiter, Context, Directory, Store, Supervisor},
    store::{DonationStore, OrganizationDirectory},
};
use chrono::Utc;
use harvest_core::{
    Error, Result,
    events::{AcceptResult, ServerEvent, SocketRegistered},
    ids::{DonationId, OrganizationId},
    types::{
        ClaimStatus, Donation, DonationForm, NewDonation, Organization, Registration,
        RegistrationForm,
    },
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Startup fixture: records loaded into the in-memory store before serving.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub donations: Vec<Donation>,
}

#[derive(Clone)]
pub struct HarvestService {
    config: ServerConfig,
    store: Arc<Store>,
    directory: Arc<Directory>,
    hub: Arc<Hub>,
    arbiter: Arc<Arbiter>,
    supervisor: Arc<Supervisor>,
}

impl HarvestService {
    /// Builds the engine around empty in-memory stores. No dispatch loop runs
    /// until a donation is posted or [`resume`](Self::resume) is called.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(Store::new());
        let directory = Arc::new(Directory::new());
        let hub = Arc::new(Hub::new());
        let gate = Arc::new(DonationGate::new());

        let ctx = Arc::new(Context {
            store: Arc::clone(&store),
            directory: Arc::clone(&directory),
            hub: Arc::clone(&hub),
            gate: Arc::clone(&gate),
            settings: config.dispatch.clone(),
        });
        let supervisor = Supervisor::new(ctx, config.shutdown_timeout);
        let arbiter = Arbiter::new(Arc::clone(&store), Arc::clone(&hub), gate);

        Self {
            config,
            store,
            directory,
            hub,
            arbiter: Arc::new(arbiter),
            supervisor: Arc::new(supervisor),
        }
    }

    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Loads a fixture. Returns the number of organizations and donations
    /// stored.
    ///
    /// Nothing is stored unless every donation is consistent: `accepted_by`
    /// is set exactly when the status is claimed.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] naming the first inconsistent donation.
    /// - Store failures.
    pub async fn load_seed(&self, seed: Seed) -> Result<(usize, usize)> {
        if let Some(bad) = seed
            .donations
            .iter()
            .find(|d| (d.status == ClaimStatus::Claimed) != d.accepted_by.is_some())
        {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "seeded donation {} is {:?} with accepted_by {:?}",
                    bad.id, bad.status, bad.accepted_by
                ),
            });
        }

        let counts = (seed.organizations.len(), seed.donations.len());
        for organization in seed.organizations {
            self.directory.upsert(organization).await?;
        }
        for donation in seed.donations {
            self.store.insert(donation).await?;
        }
        tracing::info!(
            organizations = counts.0,
            donations = counts.1,
            "seed fixture loaded"
        );
        Ok(counts)
    }

    /// Starts a dispatch loop for every donation that is still open.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn resume(&self) -> Result<usize> {
        self.supervisor.resume_open().await
    }

    /// Validates and stores a new donation, then starts dispatching it.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] once shutdown has begun.
    /// - [`Error::InvalidRequest`] for missing or malformed fields.
    pub async fn post_donation(&self, form: DonationForm) -> Result<Donation> {
        self.ensure_running()?;
        let donation = Donation::open(NewDonation::try_from(form)?, Utc::now());
        self.store.insert(donation.clone()).await?;
        tracing::info!(donation = %donation.id, donor = %donation.donor_name, "donation posted");

        self.supervisor.spawn(donation.id);
        Ok(donation)
    }

    /// Open donations, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_open(&self) -> Result<Vec<Donation>> {
        self.store.list_by_status(ClaimStatus::Open).await
    }

    /// Claimed donations, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_claimed(&self) -> Result<Vec<Donation>> {
        self.store.list_by_status(ClaimStatus::Claimed).await
    }

    /// Inserts a new active organization, or updates the one named by the
    /// form's `organization_id` while keeping its creation time.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`]/[`Error::InvalidId`] for a malformed id, a
    ///   blank name or out-of-range coordinates.
    /// - [`Error::NotFound`] when the named organization is not registered.
    pub async fn register_organization(&self, form: RegistrationForm) -> Result<Organization> {
        let registration = Registration::try_from(form)?;
        let existing = match registration.organization_id {
            Some(id) => Some(self.directory.get(id).await?.ok_or_else(|| Error::NotFound {
                kind: OrganizationId::KIND,
                id: id.to_string(),
            })?),
            None => None,
        };
        let organization = registration.into_organization(existing.as_ref(), Utc::now());
        self.directory.upsert(organization.clone()).await?;

        tracing::info!(
            organization = %organization.id,
            name = %organization.name,
            updated = existing.is_some(),
            "organization registered"
        );
        Ok(organization)
    }

    /// Claims `donation_id` for `organization_id`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] when the organization is not registered.
    /// - Store failures.
    ///
    /// A lost race is `Ok(ClaimOutcome::Rejected(..))`.
    pub async fn claim(
        &self,
        donation_id: DonationId,
        organization_id: OrganizationId,
    ) -> Result<ClaimOutcome> {
        if self.directory.get(organization_id).await?.is_none() {
            return Err(Error::NotFound {
                kind: OrganizationId::KIND,
                id: organization_id.to_string(),
            });
        }
        self.arbiter.try_claim(donation_id, organization_id).await
    }

    /// Socket entry point for `accept_donation`. Every failure becomes a
    /// negative [`AcceptResult`]; nothing here tears down the connection.
    pub async fn accept_donation(&self, organization_id: &str, donation_id: &str) -> AcceptResult {
        let organization_id = match organization_id.parse::<OrganizationId>() {
            Ok(id) => id,
            Err(e) => return AcceptResult::rejected(e.to_string()),
        };
        let donation_id = match donation_id.parse::<DonationId>() {
            Ok(id) => id,
            Err(e) => return AcceptResult::rejected(e.to_string()),
        };

        match self.claim(donation_id, organization_id).await {
            Ok(outcome) => AcceptResult::from(&outcome),
            Err(Error::NotFound { .. }) => AcceptResult::rejected("unknown organization"),
            Err(e) => {
                tracing::error!(error = %e, "claim failed");
                AcceptResult::rejected(e.to_string())
            }
        }
    }

    /// Socket entry point for `register_ngo_socket`: joins `connection` to
    /// the organization's room.
    pub async fn register_socket(
        &self,
        organization_id: &str,
        connection: ConnectionId,
        tx: mpsc::Sender<ServerEvent>,
    ) -> SocketRegistered {
        let rejected = |reason: String| SocketRegistered {
            ok: false,
            organization_id: None,
            reason: Some(reason),
        };

        let id = match organization_id.parse::<OrganizationId>() {
            Ok(id) => id,
            Err(e) => return rejected(e.to_string()),
        };
        match self.directory.get(id).await {
            Ok(Some(_)) => {}
            Ok(None) => return rejected(String::from("unknown organization")),
            Err(e) => return rejected(e.to_string()),
        }

        self.hub.subscribe(id, connection, tx);
        SocketRegistered {
            ok: true,
            organization_id: Some(id),
            reason: None,
        }
    }

    /// Withdraws an open donation.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the donation is missing or already resolved.
    pub async fn cancel_donation(&self, donation_id: DonationId) -> Result<()> {
        if self.arbiter.cancel(donation_id).await? {
            Ok(())
        } else {
            Err(Error::NotFound {
                kind: "open donation",
                id: donation_id.to_string(),
            })
        }
    }

    /// Stops accepting donations and drains every dispatch loop.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    fn ensure_running(&self) -> Result<()> {
        if self.supervisor.is_shutting_down() {
            Err(Error::ServiceShutdown)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::server::{claim::arbiter::RejectReason, store::memory::tests::ORIGIN};

    pub(crate) fn service() -> HarvestService {
        HarvestService::new(ServerConfig::default())
    }

    pub(crate) fn donation_form() -> DonationForm {
        DonationForm {
            kind: Some("cooked".into()),
            description: Some("veg biryani".into()),
            quantity: Some("30 plates".into()),
            use_by: Some("2030-01-01".into()),
            address: Some("Lake View Hall".into()),
            contact: Some("555-0111".into()),
            donor_name: Some("Sunrise Caterers".into()),
            lat: Some(ORIGIN.lat),
            lng: Some(ORIGIN.lng),
        }
    }

    pub(crate) fn registration(name: &str, meters: f64) -> RegistrationForm {
        let at = ORIGIN.north_by(meters);
        RegistrationForm {
            organization_id: None,
            name: Some(name.into()),
            address: Some(format!("{name} road")),
            lat: Some(at.lat),
            lng: Some(at.lng),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn posting_starts_dispatch() {
        let svc = service();
        let donation = svc.post_donation(donation_form()).await.unwrap();
        assert!(svc.supervisor().is_running(&donation.id));
        assert_eq!(svc.list_open().await.unwrap().len(), 1);
        svc.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn posting_after_shutdown_is_refused() {
        let svc = service();
        svc.shutdown().await;
        assert_eq!(
            svc.post_donation(donation_form()).await,
            Err(Error::ServiceShutdown)
        );
    }

    #[tokio::test]
    async fn reregistering_keeps_identity_and_creation_time() {
        let svc = service();
        let first = svc.register_organization(registration("Hope", 100.0)).await.unwrap();

        let mut update = registration("Hope Shelter", 100.0);
        update.organization_id = Some(first.id.to_string());
        let second = svc.register_organization(update).await.unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.name, "Hope Shelter");
    }

    #[tokio::test]
    async fn socket_registration_requires_known_organization() {
        let svc = service();
        let (tx, _rx) = mpsc::channel::<ServerEvent>(4);

        let bad = svc.register_socket("not-an-id", 1, tx.clone()).await;
        assert!(!bad.ok);

        let unknown = svc
            .register_socket(&OrganizationId::new().to_string(), 1, tx.clone())
            .await;
        assert_eq!(unknown.reason.as_deref(), Some("unknown organization"));

        let org = svc.register_organization(registration("Hope", 100.0)).await.unwrap();
        let ok = svc.register_socket(&org.id.to_string(), 1, tx).await;
        assert!(ok.ok);
        assert_eq!(ok.organization_id, Some(org.id));
        assert_eq!(svc.hub().room_size(&org.id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_from_unknown_organization_is_rejected() {
        let svc = service();
        let donation = svc.post_donation(donation_form()).await.unwrap();

        let result = svc
            .accept_donation(&OrganizationId::new().to_string(), &donation.id.to_string())
            .await;
        assert_eq!(result, AcceptResult::rejected("unknown organization"));

        let malformed = svc.accept_donation("???", &donation.id.to_string()).await;
        assert!(!malformed.ok);
        svc.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_accept_loses() {
        let svc = service();
        let a = svc.register_organization(registration("A", 100.0)).await.unwrap();
        let b = svc.register_organization(registration("B", 200.0)).await.unwrap();
        let donation = svc.post_donation(donation_form()).await.unwrap();
        let id = donation.id.to_string();

        assert_eq!(
            svc.accept_donation(&a.id.to_string(), &id).await,
            AcceptResult::accepted()
        );
        assert_eq!(
            svc.accept_donation(&b.id.to_string(), &id).await,
            AcceptResult::rejected(RejectReason::AlreadyClaimed.as_str())
        );
        assert_eq!(svc.list_claimed().await.unwrap()[0].accepted_by, Some(a.id));
        svc.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_only_applies_to_open_donations() {
        let svc = service();
        let donation = svc.post_donation(donation_form()).await.unwrap();

        svc.cancel_donation(donation.id).await.unwrap();
        assert!(matches!(
            svc.cancel_donation(donation.id).await,
            Err(Error::NotFound { .. })
        ));
        svc.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_open_donations_resume() {
        let svc = service();
        let mut claimed = Donation::open(NewDonation::try_from(donation_form()).unwrap(), Utc::now());
        claimed.status = ClaimStatus::Claimed;
        claimed.accepted_by = Some(OrganizationId::new());
        let open = Donation::open(NewDonation::try_from(donation_form()).unwrap(), Utc::now());
        let open_id = open.id;

        let seed = Seed {
            organizations: Vec::new(),
            donations: vec![claimed, open],
        };
        assert_eq!(svc.load_seed(seed).await.unwrap(), (0, 2));
        assert_eq!(svc.resume().await.unwrap(), 1);
        assert!(svc.supervisor().is_running(&open_id));
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn seed_with_inconsistent_claim_is_refused_whole() {
        let svc = service();
        let open = Donation::open(NewDonation::try_from(donation_form()).unwrap(), Utc::now());
        let mut unowned = Donation::open(NewDonation::try_from(donation_form()).unwrap(), Utc::now());
        unowned.status = ClaimStatus::Claimed;

        let err = svc
            .load_seed(Seed {
                organizations: Vec::new(),
                donations: vec![open.clone(), unowned],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }), "{err:?}");
        assert!(svc.list_open().await.unwrap().is_empty());

        let mut owned_but_open = open;
        owned_but_open.accepted_by = Some(OrganizationId::new());
        let err = svc
            .load_seed(Seed {
                organizations: Vec::new(),
                donations: vec![owned_but_open],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn updating_unregistered_organization_is_not_found() {
        let svc = service();
        let ghost = OrganizationId::new();
        let mut update = registration("Ghost Kitchen", 100.0);
        update.organization_id = Some(ghost.to_string());

        let err = svc.register_organization(update).await.unwrap_err();
        assert_eq!(
            err,
            Error::NotFound {
                kind: OrganizationId::KIND,
                id: ghost.to_string(),
            }
        );
        assert!(svc.directory.get(ghost).await.unwrap().is_none());
    }
}
