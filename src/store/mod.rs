//! Persistence interface consumed by the processors.
//!
//! Only attendance and alert writes need mutual exclusion. Both backends
//! enforce it inside the store: the checked-in uniqueness key is checked and
//! inserted atomically, and alert resolution is a compare-and-set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::StoreError;
use crate::models::alert::EmergencyAlert;
use crate::models::attendance::{AttendanceKey, AttendanceRecord};
use crate::models::location::LocationReport;
use crate::models::vehicle::{Vehicle, VehicleStatus};

pub mod memory;
pub mod postgres;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationWrite {
    Applied,
    /// A newer report was already stored; nothing changed.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Resolved(EmergencyAlert),
    AlreadyResolved(EmergencyAlert),
}

#[async_trait]
pub trait VehicleStore: Send + Sync {
    /// Creates the vehicle, or refreshes `number`, `route` and `capacity` of
    /// an existing one. Returns the stored vehicle.
    async fn register(&self, vehicle: Vehicle) -> Result<Vehicle, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Vehicle>, StoreError>;

    async fn list(&self) -> Result<Vec<Vehicle>, StoreError>;

    /// Last-write-wins per vehicle, except that a report older than the
    /// stored one is dropped. Unknown vehicles are created on first report.
    async fn record_location(&self, report: &LocationReport) -> Result<LocationWrite, StoreError>;

    async fn set_status(&self, id: &str, status: VehicleStatus) -> Result<Vehicle, StoreError>;
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn find_checked_in(&self, key: &AttendanceKey) -> Result<Option<AttendanceRecord>, StoreError>;

    /// Append-only. A checked-in record whose key already exists is not
    /// written and yields [`InsertOutcome::AlreadyExists`].
    async fn append(&self, record: &AttendanceRecord) -> Result<InsertOutcome, StoreError>;

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<AttendanceRecord>, StoreError>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn create(&self, alert: &EmergencyAlert) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<EmergencyAlert>, StoreError>;

    /// Newest first.
    async fn list(&self) -> Result<Vec<EmergencyAlert>, StoreError>;

    /// Fails with [`StoreError::NotFound`] for an unknown id.
    async fn resolve(&self, id: Uuid, at: DateTime<Utc>) -> Result<ResolveOutcome, StoreError>;
}

/// The three stores the service runs against.
#[derive(Clone)]
pub struct Stores {
    pub vehicles: Arc<dyn VehicleStore>,
    pub attendance: Arc<dyn AttendanceStore>,
    pub alerts: Arc<dyn AlertStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            vehicles: Arc::new(memory::MemoryVehicleStore::default()),
            attendance: Arc::new(memory::MemoryAttendanceStore::default()),
            alerts: Arc::new(memory::MemoryAlertStore::default()),
        }
    }

    pub fn postgres(pool: DbPool) -> Self {
        let store = Arc::new(postgres::PgStore::new(pool));
        Self {
            vehicles: store.clone(),
            attendance: store.clone(),
            alerts: store,
        }
    }
}
