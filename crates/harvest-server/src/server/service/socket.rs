//! WebSocket notification channel.
//!
//! Every frame in either direction is a JSON text message shaped
//! `{"event": <name>, "data": <payload>}`. A connection starts anonymous and
//! joins an organization's room by sending `register_ngo_socket`; from then
//! on it receives that organization's `donation_available`,
//! `donation_assigned` and `donation_cleared` frames.
//!
//! Each connection runs two halves:
//!
//! - a writer task draining the connection's bounded outbound queue into
//!   the socket;
//! - the reader loop below, which answers each inbound frame with exactly
//!   one direct reply pushed onto the same queue.
//!
//! A malformed frame gets an `error` reply and the connection stays open.
//! When the peer goes away the connection leaves every room it joined.

use crate::server::{
    notify::hub::ConnectionId,
    service::handler::HarvestService,
    telemetry::{decrement_connections_inflight, increment_connections_inflight},
};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use harvest_core::events::{ClientEvent, EventError, ServerEvent};
use tokio::sync::mpsc;

pub async fn upgrade(ws: WebSocketUpgrade, State(service): State<HarvestService>) -> Response {
    ws.on_upgrade(move |socket| serve_connection(socket, service))
}

#[tracing::instrument(skip_all, fields(connection = tracing::field::Empty))]
async fn serve_connection(socket: WebSocket, service: HarvestService) {
    let connection = service.hub().next_connection_id();
    tracing::Span::current().record("connection", connection);
    increment_connections_inflight();
    tracing::debug!("connection opened");

    let (tx, mut rx) = mpsc::channel::<ServerEvent>(service.config().connection_buffer_size);
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, event = event.name(), "failed to encode frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        let reply = match message {
            Ok(Message::Text(text)) => handle_frame(&service, connection, &tx, text.as_str()).await,
            Ok(Message::Binary(_)) => error_frame("binary frames are not supported"),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "connection read failed");
                break;
            }
        };
        if tx.send(reply).await.is_err() {
            break;
        }
    }

    service.hub().unsubscribe(connection);
    drop(tx);
    let _ = writer.await;
    decrement_connections_inflight();
    tracing::debug!("connection closed");
}

fn error_frame(reason: impl Into<String>) -> ServerEvent {
    ServerEvent::Error(EventError {
        reason: reason.into(),
    })
}

/// Answers one inbound text frame.
pub async fn handle_frame(
    service: &HarvestService,
    connection: ConnectionId,
    tx: &mpsc::Sender<ServerEvent>,
    text: &str,
) -> ServerEvent {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, "malformed frame");
            return error_frame(format!("malformed frame: {e}"));
        }
    };

    match event {
        ClientEvent::RegisterNgoSocket { organization_id } => ServerEvent::SocketRegistered(
            service
                .register_socket(&organization_id, connection, tx.clone())
                .await,
        ),
        ClientEvent::AcceptDonation {
            organization_id,
            donation_id,
        } => ServerEvent::AcceptResult(
            service
                .accept_donation(&organization_id, &donation_id)
                .await,
        ),
    }
}
