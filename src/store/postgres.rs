use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use super::{AlertStore, AttendanceStore, InsertOutcome, LocationWrite, ResolveOutcome, VehicleStore};
use crate::db::{queries, DbPool};
use crate::error::StoreError;
use crate::models::alert::{AlertStatus, EmergencyAlert};
use crate::models::attendance::{AttendanceKey, AttendanceRecord, AttendanceStatus, SessionId};
use crate::models::location::{GeoPoint, LocationReport};
use crate::models::vehicle::{Vehicle, VehicleStatus};

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn point(lat: Option<f64>, lng: Option<f64>) -> Option<GeoPoint> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
        _ => None,
    }
}

fn vehicle_from_row(row: &PgRow) -> Result<Vehicle, StoreError> {
    let status: String = row.try_get("status")?;
    let capacity: i32 = row.try_get("capacity")?;
    let occupancy: i32 = row.try_get("occupancy")?;
    Ok(Vehicle {
        id: row.try_get("id")?,
        number: row.try_get("number")?,
        route: row.try_get("route")?,
        capacity: capacity.max(0) as u32,
        status: status.parse().map_err(StoreError::Unavailable)?,
        occupancy: occupancy.max(0) as u32,
        location: point(row.try_get("last_lat")?, row.try_get("last_lng")?),
        speed: row.try_get("last_speed")?,
        heading: row.try_get("last_heading")?,
        last_report_at: row.try_get("last_report_ms")?,
    })
}

fn attendance_from_row(row: &PgRow) -> Result<AttendanceRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let session_id: String = row.try_get("session_id")?;
    Ok(AttendanceRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        bus_id: row.try_get("bus_id")?,
        timestamp: row.try_get("timestamp")?,
        status: AttendanceStatus::from_db(&status)
            .ok_or_else(|| StoreError::Unavailable(format!("unknown attendance status '{}'", status)))?,
        session_id: SessionId::from(session_id),
    })
}

fn alert_from_row(row: &PgRow) -> Result<EmergencyAlert, StoreError> {
    let resolved: bool = row.try_get("resolved")?;
    Ok(EmergencyAlert {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        bus_id: row.try_get("bus_id")?,
        message: row.try_get("message")?,
        status: if resolved {
            AlertStatus::Resolved
        } else {
            AlertStatus::Triggered
        },
        resolved,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
        location: point(row.try_get("lat")?, row.try_get("lng")?),
    })
}

#[async_trait]
impl VehicleStore for PgStore {
    async fn register(&self, vehicle: Vehicle) -> Result<Vehicle, StoreError> {
        let row = sqlx::query(queries::REGISTER_VEHICLE)
            .bind(&vehicle.id)
            .bind(&vehicle.number)
            .bind(&vehicle.route)
            .bind(vehicle.capacity as i32)
            .bind(vehicle.status.as_str())
            .fetch_one(&self.pool)
            .await?;
        vehicle_from_row(&row)
    }

    async fn get(&self, id: &str) -> Result<Option<Vehicle>, StoreError> {
        let row = sqlx::query(queries::SELECT_VEHICLE)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(vehicle_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Vehicle>, StoreError> {
        let rows = sqlx::query(queries::SELECT_VEHICLES).fetch_all(&self.pool).await?;
        rows.iter().map(vehicle_from_row).collect()
    }

    async fn record_location(&self, report: &LocationReport) -> Result<LocationWrite, StoreError> {
        let applied = sqlx::query(queries::RECORD_LOCATION)
            .bind(&report.bus_id)
            .bind(report.latitude)
            .bind(report.longitude)
            .bind(report.speed)
            .bind(report.heading)
            .bind(report.timestamp)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match applied {
            Some(_) => LocationWrite::Applied,
            None => LocationWrite::Stale,
        })
    }

    async fn set_status(&self, id: &str, status: VehicleStatus) -> Result<Vehicle, StoreError> {
        let row = sqlx::query(queries::UPDATE_VEHICLE_STATUS)
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        vehicle_from_row(&row)
    }
}

#[async_trait]
impl AttendanceStore for PgStore {
    async fn find_checked_in(&self, key: &AttendanceKey) -> Result<Option<AttendanceRecord>, StoreError> {
        let row = sqlx::query(queries::SELECT_CHECKED_IN)
            .bind(&key.user_id)
            .bind(&key.bus_id)
            .bind(key.session_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(attendance_from_row).transpose()
    }

    async fn append(&self, record: &AttendanceRecord) -> Result<InsertOutcome, StoreError> {
        // the partial unique index turns a concurrent duplicate into a no-op insert
        let result = sqlx::query(queries::INSERT_ATTENDANCE)
            .bind(record.id)
            .bind(&record.user_id)
            .bind(&record.bus_id)
            .bind(record.timestamp)
            .bind(record.status.as_str())
            .bind(record.session_id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            Ok(InsertOutcome::AlreadyExists)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<AttendanceRecord>, StoreError> {
        let rows = sqlx::query(queries::SELECT_ATTENDANCE_FOR_USER)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(attendance_from_row).collect()
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn create(&self, alert: &EmergencyAlert) -> Result<(), StoreError> {
        sqlx::query(queries::INSERT_ALERT)
            .bind(alert.id)
            .bind(&alert.user_id)
            .bind(&alert.bus_id)
            .bind(&alert.message)
            .bind(alert.resolved)
            .bind(alert.created_at)
            .bind(alert.resolved_at)
            .bind(alert.location.map(|p| p.latitude))
            .bind(alert.location.map(|p| p.longitude))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EmergencyAlert>, StoreError> {
        let row = sqlx::query(queries::SELECT_ALERT)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(alert_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<EmergencyAlert>, StoreError> {
        let rows = sqlx::query(queries::SELECT_ALERTS).fetch_all(&self.pool).await?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn resolve(&self, id: Uuid, at: DateTime<Utc>) -> Result<ResolveOutcome, StoreError> {
        let updated = sqlx::query(queries::RESOLVE_ALERT)
            .bind(id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = updated {
            return Ok(ResolveOutcome::Resolved(alert_from_row(&row)?));
        }
        match AlertStore::get(self, id).await? {
            Some(alert) => Ok(ResolveOutcome::AlreadyResolved(alert)),
            None => Err(StoreError::NotFound),
        }
    }
}
