//! Publish/subscribe rooms keyed by organization.
//!
//! Each live connection owns a bounded [`mpsc`] queue drained by its socket
//! writer. An organization's *room* is the set of connections that
//! registered for it. Publishing never blocks: frames are pushed with
//! `try_send`, and a full or closed queue simply misses the frame
//! (at-most-once, no redelivery). Closed queues are pruned as they are found.

use crate::server::telemetry::increment_notifications_sent;
use harvest_core::{events::ServerEvent, ids::OrganizationId};
use parking_lot::RwLock;
use portable_atomic::{AtomicU64, Ordering};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Identity of one live connection.
pub type ConnectionId = u64;

#[derive(Debug)]
struct Subscriber {
    connection: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
}

#[derive(Debug, Default)]
pub struct Hub {
    rooms: RwLock<HashMap<OrganizationId, Vec<Subscriber>>>,
    next_connection: AtomicU64,
}

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id for a new connection.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }

    /// Joins `connection` to `organization`'s room. Joining the same room
    /// twice replaces the earlier queue.
    pub fn subscribe(
        &self,
        organization: OrganizationId,
        connection: ConnectionId,
        tx: mpsc::Sender<ServerEvent>,
    ) {
        let mut rooms = self.rooms.write();
        let room = rooms.entry(organization).or_default();
        room.retain(|s| s.connection != connection);
        room.push(Subscriber { connection, tx });
        tracing::debug!(%organization, connection, "connection joined room");
    }

    /// Removes `connection` from every room it joined.
    pub fn unsubscribe(&self, connection: ConnectionId) {
        let mut rooms = self.rooms.write();
        rooms.retain(|_, room| {
            room.retain(|s| s.connection != connection);
            !room.is_empty()
        });
    }

    /// Number of live connections in `organization`'s room.
    pub fn room_size(&self, organization: &OrganizationId) -> usize {
        self.rooms.read().get(organization).map_or(0, Vec::len)
    }

    /// Pushes `event` to every connection in `organization`'s room and
    /// returns how many queues accepted it.
    pub fn publish(&self, organization: &OrganizationId, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        let mut saw_closed = false;

        if let Some(room) = self.rooms.read().get(organization) {
            for subscriber in room {
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(
                            %organization,
                            connection = subscriber.connection,
                            event = event.name(),
                            "outbound queue full, dropping frame"
                        );
                    }
                    Err(TrySendError::Closed(_)) => saw_closed = true,
                }
            }
        }

        if saw_closed {
            self.prune(organization);
        }
        if delivered == 0 {
            tracing::debug!(%organization, event = event.name(), "no live connection");
        }
        increment_notifications_sent(delivered as u64);
        delivered
    }

    /// Publishes `event` to each organization in `organizations`.
    pub fn broadcast_to_set<'a>(
        &self,
        organizations: impl IntoIterator<Item = &'a OrganizationId>,
        event: &ServerEvent,
    ) -> usize {
        organizations
            .into_iter()
            .map(|organization| self.publish(organization, event))
            .sum()
    }

    fn prune(&self, organization: &OrganizationId) {
        let mut rooms = self.rooms.write();
        if let Some(room) = rooms.get_mut(organization) {
            room.retain(|s| !s.tx.is_closed());
            if room.is_empty() {
                rooms.remove(organization);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::events::{EventError, SocketRegistered};

    fn frame(reason: &str) -> ServerEvent {
        ServerEvent::Error(EventError {
            reason: reason.into(),
        })
    }

    #[test]
    fn publish_reaches_only_the_room() {
        let hub = Hub::new();
        let (a, b) = (OrganizationId::new(), OrganizationId::new());
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        hub.subscribe(a, hub.next_connection_id(), tx_a);
        hub.subscribe(b, hub.next_connection_id(), tx_b);

        assert_eq!(hub.publish(&a, &frame("for a")), 1);
        assert_eq!(rx_a.try_recv().unwrap(), frame("for a"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn every_connection_in_a_room_receives() {
        let hub = Hub::new();
        let org = OrganizationId::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        hub.subscribe(org, hub.next_connection_id(), tx1);
        hub.subscribe(org, hub.next_connection_id(), tx2);

        let event = ServerEvent::SocketRegistered(SocketRegistered {
            ok: true,
            organization_id: Some(org),
            reason: None,
        });
        assert_eq!(hub.publish(&org, &event), 2);
        assert_eq!(rx1.try_recv().unwrap(), event);
        assert_eq!(rx2.try_recv().unwrap(), event);
    }

    #[test]
    fn offline_organizations_silently_miss() {
        let hub = Hub::new();
        assert_eq!(hub.publish(&OrganizationId::new(), &frame("nobody")), 0);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let hub = Hub::new();
        let org = OrganizationId::new();
        let (tx, mut rx) = mpsc::channel(1);
        hub.subscribe(org, hub.next_connection_id(), tx);

        assert_eq!(hub.publish(&org, &frame("first")), 1);
        assert_eq!(hub.publish(&org, &frame("second")), 0);
        assert_eq!(rx.try_recv().unwrap(), frame("first"));
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.room_size(&org), 1);
    }

    #[test]
    fn closed_connections_are_pruned() {
        let hub = Hub::new();
        let org = OrganizationId::new();
        let (tx, rx) = mpsc::channel(1);
        hub.subscribe(org, hub.next_connection_id(), tx);
        drop(rx);

        assert_eq!(hub.publish(&org, &frame("gone")), 0);
        assert_eq!(hub.room_size(&org), 0);
    }

    #[test]
    fn unsubscribe_leaves_every_room() {
        let hub = Hub::new();
        let (a, b) = (OrganizationId::new(), OrganizationId::new());
        let conn = hub.next_connection_id();
        let (tx, _rx) = mpsc::channel(4);
        hub.subscribe(a, conn, tx.clone());
        hub.subscribe(b, conn, tx);
        assert_eq!(hub.room_size(&a), 1);

        hub.unsubscribe(conn);
        assert_eq!(hub.room_size(&a), 0);
        assert_eq!(hub.room_size(&b), 0);
    }

    #[test]
    fn broadcast_sums_deliveries() {
        let hub = Hub::new();
        let orgs: Vec<_> = (0..3).map(|_| OrganizationId::new()).collect();
        let mut receivers = Vec::new();
        for org in &orgs[..2] {
            let (tx, rx) = mpsc::channel(4);
            hub.subscribe(*org, hub.next_connection_id(), tx);
            receivers.push(rx);
        }
        assert_eq!(hub.broadcast_to_set(&orgs, &frame("all")), 2);
    }
}
