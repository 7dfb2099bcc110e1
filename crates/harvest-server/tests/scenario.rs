use core::time::Duration;
use harvest_core::{
    events::{AcceptResult, ServerEvent},
    geo::GeoPoint,
    ids::OrganizationId,
    types::{ClaimStatus, DonationForm, RegistrationForm},
};
use harvest_server::server::{config::ServerConfig, service::handler::HarvestService};
use tokio::{sync::mpsc, time::sleep};

const ORIGIN: GeoPoint = GeoPoint {
    lng: 77.0,
    lat: 28.0,
};

struct Ngo {
    id: OrganizationId,
    rx: mpsc::Receiver<ServerEvent>,
}

impl Ngo {
    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

async fn connect(svc: &HarvestService, name: &str, meters: f64) -> Ngo {
    let at = ORIGIN.north_by(meters);
    let org = svc
        .register_organization(RegistrationForm {
            organization_id: None,
            name: Some(name.into()),
            address: Some(format!("{name} lane")),
            lat: Some(at.lat),
            lng: Some(at.lng),
        })
        .await
        .unwrap();

    let (tx, rx) = mpsc::channel(16);
    let connection = svc.hub().next_connection_id();
    let ack = svc.register_socket(&org.id.to_string(), connection, tx).await;
    assert!(ack.ok);

    Ngo { id: org.id, rx }
}

fn donation() -> DonationForm {
    DonationForm {
        kind: Some("produce".into()),
        description: Some("crates of tomatoes".into()),
        quantity: Some("6".into()),
        use_by: Some("2030-06-30".into()),
        address: Some("Old Mandi Gate".into()),
        contact: Some("555-0142".into()),
        donor_name: Some("Green Basket".into()),
        lat: Some(ORIGIN.lat),
        lng: Some(ORIGIN.lng),
    }
}

fn offered_rounds(events: &[ServerEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::DonationAvailable(offer) => Some(offer.round),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn nearest_batch_then_empty_round_then_claim() {
    let svc = HarvestService::new(ServerConfig::default());
    let mut a = connect(&svc, "A", 200.0).await;
    let mut b = connect(&svc, "B", 5_000.0).await;
    let mut c = connect(&svc, "C", 9_000.0).await;
    let mut far = connect(&svc, "D-prime", 15_000.0).await;

    let posted = svc.post_donation(donation()).await.unwrap();

    // Round 1 goes to the three organizations inside the radius.
    sleep(Duration::from_secs(1)).await;
    assert_eq!(offered_rounds(&a.drain()), [1]);
    assert_eq!(offered_rounds(&b.drain()), [1]);
    assert_eq!(offered_rounds(&c.drain()), [1]);
    assert!(far.drain().is_empty());

    // Round 2 finds nobody new; the loop keeps polling.
    sleep(Duration::from_secs(300)).await;
    let open = svc.list_open().await.unwrap();
    assert_eq!(open[0].round, 2);
    assert_eq!(open[0].notified, [a.id, b.id, c.id]);
    for ngo in [&mut a, &mut b, &mut c, &mut far] {
        assert!(ngo.drain().is_empty());
    }
    assert!(svc.supervisor().is_running(&posted.id));

    // B claims.
    let result = svc
        .accept_donation(&b.id.to_string(), &posted.id.to_string())
        .await;
    assert_eq!(result, AcceptResult::accepted());

    let b_events = b.drain();
    assert_eq!(b_events.len(), 1);
    assert!(matches!(&b_events[0], ServerEvent::DonationAssigned(p) if p.donation_id == posted.id));

    for ngo in [&mut a, &mut c] {
        let events = ngo.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ServerEvent::DonationCleared(p) if p.donation_id == posted.id && p.status == ClaimStatus::Claimed
        ));
    }
    assert!(far.drain().is_empty());

    let claimed = svc.list_claimed().await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].accepted_by, Some(b.id));

    // The loop notices within one poll interval and goes quiet.
    sleep(Duration::from_secs(5)).await;
    assert!(!svc.supervisor().is_running(&posted.id));
    sleep(Duration::from_secs(600)).await;
    for ngo in [&mut a, &mut b, &mut c, &mut far] {
        assert!(offered_rounds(&ngo.drain()).is_empty());
    }

    svc.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_have_one_winner() {
    let svc = HarvestService::new(ServerConfig::default());
    let mut ngos = Vec::new();
    for i in 0..16_u32 {
        ngos.push(connect(&svc, &format!("org-{i}"), 100.0 * f64::from(i + 1)).await);
    }
    let posted = svc.post_donation(donation()).await.unwrap();

    let attempts: Vec<_> = ngos
        .iter()
        .map(|ngo| {
            let svc = svc.clone();
            let org = ngo.id.to_string();
            let donation = posted.id.to_string();
            tokio::spawn(async move { svc.accept_donation(&org, &donation).await })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        let result = attempt.await.unwrap();
        if result.ok {
            winners += 1;
        } else {
            assert_eq!(result.reason.as_deref(), Some("already claimed"));
        }
    }
    assert_eq!(winners, 1);

    let claimed = svc.list_claimed().await.unwrap();
    let winner = claimed[0].accepted_by.unwrap();
    let assigned: usize = ngos
        .iter_mut()
        .map(|ngo| {
            ngo.drain()
                .iter()
                .filter(|event| matches!(event, ServerEvent::DonationAssigned(_)))
                .count()
        })
        .sum();
    assert_eq!(assigned, 1);
    assert!(ngos.iter().any(|ngo| ngo.id == winner));

    svc.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancelled_donation_clears_and_stops() {
    let svc = HarvestService::new(ServerConfig::default());
    let mut a = connect(&svc, "A", 200.0).await;
    let posted = svc.post_donation(donation()).await.unwrap();

    sleep(Duration::from_secs(1)).await;
    assert_eq!(offered_rounds(&a.drain()), [1]);

    svc.cancel_donation(posted.id).await.unwrap();
    let events = a.drain();
    assert!(matches!(
        &events[..],
        [ServerEvent::DonationCleared(p)] if p.status == ClaimStatus::Cancelled
    ));

    let late = svc
        .accept_donation(&a.id.to_string(), &posted.id.to_string())
        .await;
    assert_eq!(late, AcceptResult::rejected("donation cancelled"));

    sleep(Duration::from_secs(5)).await;
    assert!(!svc.supervisor().is_running(&posted.id));
    svc.shutdown().await;
}
