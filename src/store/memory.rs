use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{AlertStore, AttendanceStore, InsertOutcome, LocationWrite, ResolveOutcome, VehicleStore};
use crate::error::StoreError;
use crate::models::alert::EmergencyAlert;
use crate::models::attendance::{AttendanceKey, AttendanceRecord, AttendanceStatus};
use crate::models::location::LocationReport;
use crate::models::vehicle::{Vehicle, VehicleStatus};

#[derive(Default)]
pub struct MemoryVehicleStore {
    vehicles: RwLock<HashMap<String, Vehicle>>,
}

#[async_trait]
impl VehicleStore for MemoryVehicleStore {
    async fn register(&self, vehicle: Vehicle) -> Result<Vehicle, StoreError> {
        let mut vehicles = self.vehicles.write().await;
        let stored = vehicles
            .entry(vehicle.id.clone())
            .and_modify(|existing| {
                existing.number = vehicle.number.clone();
                existing.route = vehicle.route.clone();
                existing.capacity = vehicle.capacity;
            })
            .or_insert(vehicle);
        Ok(stored.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Vehicle>, StoreError> {
        Ok(self.vehicles.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Vehicle>, StoreError> {
        let mut vehicles: Vec<Vehicle> = self.vehicles.read().await.values().cloned().collect();
        vehicles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(vehicles)
    }

    async fn record_location(&self, report: &LocationReport) -> Result<LocationWrite, StoreError> {
        let mut vehicles = self.vehicles.write().await;
        let vehicle = vehicles
            .entry(report.bus_id.clone())
            .or_insert_with(|| Vehicle::unregistered(&report.bus_id));
        if vehicle.apply_report(report) {
            Ok(LocationWrite::Applied)
        } else {
            Ok(LocationWrite::Stale)
        }
    }

    async fn set_status(&self, id: &str, status: VehicleStatus) -> Result<Vehicle, StoreError> {
        let mut vehicles = self.vehicles.write().await;
        let vehicle = vehicles.get_mut(id).ok_or(StoreError::NotFound)?;
        vehicle.status = status;
        Ok(vehicle.clone())
    }
}

#[derive(Default)]
pub struct MemoryAttendanceStore {
    records: Mutex<Vec<AttendanceRecord>>,
}

#[async_trait]
impl AttendanceStore for MemoryAttendanceStore {
    async fn find_checked_in(&self, key: &AttendanceKey) -> Result<Option<AttendanceRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|r| r.status == AttendanceStatus::CheckedIn && &r.key() == key)
            .cloned())
    }

    async fn append(&self, record: &AttendanceRecord) -> Result<InsertOutcome, StoreError> {
        let mut records = self.records.lock().await;
        if record.status == AttendanceStatus::CheckedIn {
            let key = record.key();
            let exists = records
                .iter()
                .any(|r| r.status == AttendanceStatus::CheckedIn && r.key() == key);
            if exists {
                return Ok(InsertOutcome::AlreadyExists);
            }
        }
        records.push(record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<AttendanceRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.iter().filter(|r| r.user_id == user_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: Mutex<HashMap<Uuid, EmergencyAlert>>,
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn create(&self, alert: &EmergencyAlert) -> Result<(), StoreError> {
        self.alerts.lock().await.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EmergencyAlert>, StoreError> {
        Ok(self.alerts.lock().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<EmergencyAlert>, StoreError> {
        let mut alerts: Vec<EmergencyAlert> = self.alerts.lock().await.values().cloned().collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    async fn resolve(&self, id: Uuid, at: DateTime<Utc>) -> Result<ResolveOutcome, StoreError> {
        let mut alerts = self.alerts.lock().await;
        let alert = alerts.get_mut(&id).ok_or(StoreError::NotFound)?;
        if alert.resolve(at) {
            Ok(ResolveOutcome::Resolved(alert.clone()))
        } else {
            Ok(ResolveOutcome::AlreadyResolved(alert.clone()))
        }
    }
}
