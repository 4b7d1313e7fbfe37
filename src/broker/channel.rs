//! Server side of the event channel.
//!
//! Each WebSocket connection runs two tasks: one drains the connection's
//! outbound queue into the socket, the other reads client frames and
//! dispatches them in arrival order. Either side finishing tears the
//! connection down and removes its subscriptions.

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::router::ConnectionId;
use crate::models::events::{AttendanceNotice, ClientEvent, ScanResult, ServerEvent};
use crate::processor::attendance::ScanOutcome;
use crate::state::Hub;

pub async fn serve_connection(socket: WebSocket, hub: Arc<Hub>) {
    let (conn, mut outbound) = hub.router.register().await;
    info!(connection = %conn, "Client connected");

    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    error!(event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        debug!(connection = %conn, "Send task terminated");
    });

    let recv_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => match ClientEvent::from_frame(&text) {
                    Ok(event) => handle_event(&recv_hub, conn, event).await,
                    Err(e) => {
                        warn!(connection = %conn, error = %e, "Rejected client frame");
                        recv_hub.router.send_to(conn, ServerEvent::error(e.to_string())).await;
                    }
                },
                Message::Close(_) => break,
                Message::Binary(_) => {
                    warn!(connection = %conn, "Received unexpected binary message");
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        debug!(connection = %conn, "Receive task terminated");
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    hub.router.disconnect(conn).await;
    info!(connection = %conn, "Client disconnected");
}

/// Applies one validated client event on behalf of `conn`. Failures are
/// reported back to that connection only.
pub async fn handle_event(hub: &Hub, conn: ConnectionId, event: ClientEvent) {
    match event {
        ClientEvent::JoinRole(role) => {
            hub.router.join_role(conn, role).await;
            info!(connection = %conn, ?role, "Joined role");
        }
        ClientEvent::JoinBus(bus_id) => {
            hub.router.join_vehicle(conn, &bus_id).await;
            info!(connection = %conn, bus = %bus_id, "Joined bus");
        }
        ClientEvent::SubscribeBus(bus_id) => {
            hub.router.subscribe_vehicle(conn, &bus_id).await;
            info!(connection = %conn, bus = %bus_id, "Subscribed to bus");
        }
        ClientEvent::UnsubscribeBus(bus_id) => {
            hub.router.unsubscribe_vehicle(conn, &bus_id).await;
        }
        ClientEvent::LocationReport(report) => {
            if let Err(e) = hub.locations.report_location(report).await {
                hub.router.send_to(conn, ServerEvent::error(e.to_string())).await;
            }
        }
        ClientEvent::AttendanceScan(scan) => match scan.qr_data {
            Some(qr_data) => {
                let reply = match hub.scan_attendance(&scan.user_id, &qr_data, Utc::now()).await {
                    Ok(ScanOutcome::CheckedIn(record)) => ScanResult {
                        accepted: true,
                        record: Some(record),
                        reason: None,
                    },
                    Ok(ScanOutcome::Rejected(rejection)) => ScanResult {
                        accepted: false,
                        record: None,
                        reason: Some(rejection.reason().to_string()),
                    },
                    Err(e) => {
                        error!(user = %scan.user_id, error = %e, "Attendance store failure");
                        ScanResult {
                            accepted: false,
                            record: None,
                            reason: Some(e.to_string()),
                        }
                    }
                };
                hub.router.send_to(conn, ServerEvent::AttendanceResult(reply)).await;
            }
            None => {
                // already verified elsewhere; relay to the vehicle's audience
                let notice = ServerEvent::AttendanceScan(AttendanceNotice {
                    user_id: scan.user_id,
                    bus_id: scan.bus_id.clone(),
                });
                hub.router.publish_to_vehicle(&scan.bus_id, notice).await;
            }
        },
        ClientEvent::TripUpdate(update) => {
            if let Err(e) = hub.trips.apply(update).await {
                error!(connection = %conn, error = %e, "Trip update failed");
                hub.router.send_to(conn, ServerEvent::error(e.to_string())).await;
            }
        }
        ClientEvent::SosTrigger(sos) => {
            if let Err(e) = hub.alerts.trigger_alert(&sos.user_id, &sos.bus_id, sos.message).await {
                hub.router.send_to(conn, ServerEvent::error(e.to_string())).await;
            }
        }
    }
}
