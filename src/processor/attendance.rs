//! QR attendance verification.
//!
//! A scan is checked in a fixed order: payload shape, then expiry, then the
//! per-session duplicate rule. The first two are stateless and never touch
//! the store.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::AttendanceError;
use crate::models::attendance::{AttendanceRecord, AttendanceToken};
use crate::store::{AttendanceStore, InsertOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRejection {
    Malformed,
    Expired,
    Duplicate,
}

impl ScanRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            ScanRejection::Malformed => "Invalid QR code",
            ScanRejection::Expired => "QR code has expired. Please request a fresh code.",
            ScanRejection::Duplicate => "Attendance already marked for this session.",
        }
    }
}

impl fmt::Display for ScanRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    CheckedIn(AttendanceRecord),
    Rejected(ScanRejection),
}

pub struct AttendanceEngine {
    store: Arc<dyn AttendanceStore>,
}

impl AttendanceEngine {
    pub fn new(store: Arc<dyn AttendanceStore>) -> Self {
        Self { store }
    }

    pub async fn verify(
        &self,
        user_id: &str,
        qr_data: &str,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, AttendanceError> {
        let token = match AttendanceToken::parse(qr_data) {
            Some(token) => token,
            None => return Ok(self.reject(user_id, None, ScanRejection::Malformed)),
        };

        if token.is_expired_at(now.timestamp_millis()) {
            return Ok(self.reject(user_id, Some(&token.bus_id), ScanRejection::Expired));
        }

        let record = AttendanceRecord::check_in(user_id, &token.bus_id, now);
        if self.store.find_checked_in(&record.key()).await?.is_some() {
            return Ok(self.reject(user_id, Some(&token.bus_id), ScanRejection::Duplicate));
        }

        // a concurrent scan may have committed since the lookup
        match self.store.append(&record).await? {
            InsertOutcome::Inserted => {
                info!(
                    user = %user_id,
                    bus = %record.bus_id,
                    session = %record.session_id,
                    "Attendance checked in"
                );
                Ok(ScanOutcome::CheckedIn(record))
            }
            InsertOutcome::AlreadyExists => {
                Ok(self.reject(user_id, Some(&token.bus_id), ScanRejection::Duplicate))
            }
        }
    }

    fn reject(&self, user_id: &str, bus_id: Option<&str>, rejection: ScanRejection) -> ScanOutcome {
        warn!(user = %user_id, bus = ?bus_id, reason = %rejection, "Attendance scan rejected");
        ScanOutcome::Rejected(rejection)
    }
}
