use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Validity window of a minted token.
pub const TOKEN_TTL_MS: i64 = 300_000;

/// Payload embedded in the QR code shown on a vehicle's display. Unsigned;
/// anyone who can read a code can replay it until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceToken {
    pub bus_id: String,
    pub timestamp: i64,
    pub expires_at: i64,
}

impl AttendanceToken {
    pub fn issue(bus_id: impl Into<String>, now_ms: i64) -> Self {
        Self::issue_with_ttl(bus_id, now_ms, TOKEN_TTL_MS)
    }

    pub fn issue_with_ttl(bus_id: impl Into<String>, now_ms: i64, ttl_ms: i64) -> Self {
        Self {
            bus_id: bus_id.into(),
            timestamp: now_ms,
            expires_at: now_ms + ttl_ms,
        }
    }

    /// Parses scanned QR data. Returns `None` when a required field is
    /// absent or mistyped, the vehicle id is blank, or the window is inverted.
    pub fn parse(raw: &str) -> Option<Self> {
        let token: AttendanceToken = serde_json::from_str(raw).ok()?;
        if token.bus_id.trim().is_empty() || token.expires_at < token.timestamp {
            return None;
        }
        Some(token)
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttendanceStatus {
    CheckedIn,
    CheckedOut,
    Duplicate,
    Expired,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::CheckedIn => "checked-in",
            AttendanceStatus::CheckedOut => "checked-out",
            AttendanceStatus::Duplicate => "duplicate",
            AttendanceStatus::Expired => "expired",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "checked-in" => Some(AttendanceStatus::CheckedIn),
            "checked-out" => Some(AttendanceStatus::CheckedOut),
            "duplicate" => Some(AttendanceStatus::Duplicate),
            "expired" => Some(AttendanceStatus::Expired),
            _ => None,
        }
    }
}

/// One attendance session per calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn for_time(at: DateTime<Utc>) -> Self {
        SessionId(at.format("%Y-%m-%d").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Uniqueness key for checked-in records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttendanceKey {
    pub user_id: String,
    pub bus_id: String,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub user_id: String,
    pub bus_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: AttendanceStatus,
    pub session_id: SessionId,
}

impl AttendanceRecord {
    pub fn check_in(user_id: &str, bus_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            bus_id: bus_id.to_string(),
            timestamp: at,
            status: AttendanceStatus::CheckedIn,
            session_id: SessionId::for_time(at),
        }
    }

    pub fn key(&self) -> AttendanceKey {
        AttendanceKey {
            user_id: self.user_id.clone(),
            bus_id: self.bus_id.clone(),
            session_id: self.session_id.clone(),
        }
    }
}
