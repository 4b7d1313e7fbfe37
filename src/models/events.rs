//! Named events exchanged over the event channel.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Frames are parsed into [`ClientEvent`] / [`ServerEvent`] at the channel
//! boundary so handlers only ever see validated, typed payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::alert::EmergencyAlert;
use super::attendance::AttendanceRecord;
use super::location::{GeoPoint, LocationReport};
use super::vehicle::VehicleStatus;
use crate::error::WireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Student,
    Driver,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TripAction {
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripUpdate {
    pub bus_id: String,
    pub driver_id: String,
    pub action: TripAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceScan {
    pub user_id: String,
    pub bus_id: String,
    /// Raw QR payload. When present the scan is verified before it is relayed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SosTrigger {
    pub user_id: String,
    pub bus_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Events a client sends to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join:role")]
    JoinRole(Role),
    #[serde(rename = "join:bus")]
    JoinBus(String),
    #[serde(rename = "subscribe:bus")]
    SubscribeBus(String),
    #[serde(rename = "unsubscribe:bus")]
    UnsubscribeBus(String),
    #[serde(rename = "location:report")]
    LocationReport(LocationReport),
    #[serde(rename = "attendance:scan")]
    AttendanceScan(AttendanceScan),
    #[serde(rename = "trip:update")]
    TripUpdate(TripUpdate),
    #[serde(rename = "sos:trigger")]
    SosTrigger(SosTrigger),
}

impl ClientEvent {
    pub fn from_frame(frame: &str) -> Result<Self, WireError> {
        let event: ClientEvent = serde_json::from_str(frame)?;
        event.validate()?;
        Ok(event)
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Membership events are replayed by clients after every reconnect.
    pub fn is_membership(&self) -> bool {
        matches!(
            self,
            ClientEvent::JoinRole(_) | ClientEvent::JoinBus(_) | ClientEvent::SubscribeBus(_)
        )
    }

    fn validate(&self) -> Result<(), WireError> {
        let ids: Vec<(&'static str, &str)> = match self {
            ClientEvent::JoinRole(_) => Vec::new(),
            ClientEvent::JoinBus(bus) | ClientEvent::SubscribeBus(bus) | ClientEvent::UnsubscribeBus(bus) => {
                vec![("busId", bus.as_str())]
            }
            ClientEvent::LocationReport(report) => vec![("busId", report.bus_id.as_str())],
            ClientEvent::AttendanceScan(scan) => {
                vec![("userId", scan.user_id.as_str()), ("busId", scan.bus_id.as_str())]
            }
            ClientEvent::TripUpdate(trip) => {
                vec![("busId", trip.bus_id.as_str()), ("driverId", trip.driver_id.as_str())]
            }
            ClientEvent::SosTrigger(sos) => {
                vec![("userId", sos.user_id.as_str()), ("busId", sos.bus_id.as_str())]
            }
        };
        match ids.into_iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(WireError::EmptyField(name)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub bus_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
}

impl From<&LocationReport> for LocationUpdate {
    fn from(report: &LocationReport) -> Self {
        Self {
            bus_id: report.bus_id.clone(),
            latitude: report.latitude,
            longitude: report.longitude,
            speed: report.speed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SosAlert {
    pub id: Uuid,
    pub user_id: String,
    pub bus_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

impl From<&EmergencyAlert> for SosAlert {
    fn from(alert: &EmergencyAlert) -> Self {
        Self {
            id: alert.id,
            user_id: alert.user_id.clone(),
            bus_id: alert.bus_id.clone(),
            message: alert.message.clone(),
            timestamp: alert.created_at,
            location: alert.location,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SosResolved {
    pub id: Uuid,
    pub bus_id: String,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceNotice {
    pub user_id: String,
    pub bus_id: String,
}

/// Reply to the scanning connection only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<AttendanceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStatus {
    pub bus_id: String,
    pub status: VehicleStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}

/// Events the broker fans out to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "location:update")]
    LocationUpdate(LocationUpdate),
    #[serde(rename = "sos:alert")]
    SosAlert(SosAlert),
    #[serde(rename = "sos:resolved")]
    SosResolved(SosResolved),
    #[serde(rename = "attendance:scan")]
    AttendanceScan(AttendanceNotice),
    #[serde(rename = "attendance:result")]
    AttendanceResult(ScanResult),
    #[serde(rename = "trip:update")]
    TripUpdate(TripUpdate),
    #[serde(rename = "bus:status")]
    BusStatus(BusStatus),
    #[serde(rename = "error")]
    Error(ErrorNotice),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::LocationUpdate(_) => "location:update",
            ServerEvent::SosAlert(_) => "sos:alert",
            ServerEvent::SosResolved(_) => "sos:resolved",
            ServerEvent::AttendanceScan(_) => "attendance:scan",
            ServerEvent::AttendanceResult(_) => "attendance:result",
            ServerEvent::TripUpdate(_) => "trip:update",
            ServerEvent::BusStatus(_) => "bus:status",
            ServerEvent::Error(_) => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorNotice {
            message: message.into(),
        })
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_frame(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_topic_joins() {
        let role = ClientEvent::from_frame(r#"{"event":"join:role","data":"ADMIN"}"#).unwrap();
        assert_eq!(role, ClientEvent::JoinRole(Role::Admin));

        let bus = ClientEvent::from_frame(r#"{"event":"subscribe:bus","data":"BUS-002"}"#).unwrap();
        assert_eq!(bus, ClientEvent::SubscribeBus("BUS-002".to_string()));
        assert!(bus.is_membership());
    }

    #[test]
    fn parses_trip_update() {
        let frame = json!({
            "event": "trip:update",
            "data": {"busId": "BUS-001", "driverId": "d7", "action": "start"}
        })
        .to_string();
        match ClientEvent::from_frame(&frame).unwrap() {
            ClientEvent::TripUpdate(t) => {
                assert_eq!(t.action, TripAction::Start);
                assert_eq!(t.driver_id, "d7");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_events_and_blank_ids() {
        assert!(matches!(
            ClientEvent::from_frame(r#"{"event":"nope","data":1}"#),
            Err(WireError::Malformed(_))
        ));
        assert!(matches!(
            ClientEvent::from_frame(r#"{"event":"join:bus","data":""}"#),
            Err(WireError::EmptyField("busId"))
        ));
        assert!(matches!(
            ClientEvent::from_frame(r#"{"event":"attendance:scan","data":{"userId":"u1"}}"#),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn location_update_wire_shape() {
        let event = ServerEvent::LocationUpdate(LocationUpdate {
            bus_id: "BUS-002".to_string(),
            latitude: 12.5,
            longitude: -3.25,
            speed: 28.0,
        });
        let value: serde_json::Value = serde_json::from_str(&event.to_frame().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "location:update",
                "data": {"busId": "BUS-002", "latitude": 12.5, "longitude": -3.25, "speed": 28.0}
            })
        );
        assert_eq!(event.name(), "location:update");
    }
}
