use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::location::GeoPoint;

pub const DEFAULT_SOS_MESSAGE: &str = "Emergency SOS triggered";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Triggered,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlert {
    pub id: Uuid,
    pub user_id: String,
    pub bus_id: String,
    pub message: String,
    pub status: AlertStatus,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub location: Option<GeoPoint>,
}

impl EmergencyAlert {
    pub fn new(
        user_id: &str,
        bus_id: &str,
        message: Option<String>,
        location: Option<GeoPoint>,
        at: DateTime<Utc>,
    ) -> Self {
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SOS_MESSAGE.to_string());
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            bus_id: bus_id.to_string(),
            message,
            status: AlertStatus::Triggered,
            resolved: false,
            created_at: at,
            resolved_at: None,
            location,
        }
    }

    pub fn status(&self) -> AlertStatus {
        self.status
    }

    /// One-way transition. Returns `true` only for the call that resolved it.
    pub fn resolve(&mut self, at: DateTime<Utc>) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(at);
        true
    }
}
