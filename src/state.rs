use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::broker::router::TopicRouter;
use crate::config::AppConfig;
use crate::error::{AttendanceError, StoreError};
use crate::models::attendance::AttendanceToken;
use crate::models::events::{AttendanceNotice, BusStatus, ServerEvent};
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::processor::attendance::{AttendanceEngine, ScanOutcome};
use crate::processor::emergency::{AlertDispatcher, LastKnownLocation, LocationSource};
use crate::processor::location::LocationProcessor;
use crate::processor::trips::TripTracker;
use crate::store::{Stores, VehicleStore};

/// Everything a connection handler, REST handler or the device consumer
/// needs. Built once per process and shared behind an `Arc`.
pub struct Hub {
    pub config: AppConfig,
    pub stores: Stores,
    pub router: Arc<TopicRouter>,
    pub locations: LocationProcessor,
    pub attendance: AttendanceEngine,
    pub alerts: AlertDispatcher,
    pub trips: TripTracker,
}

impl Hub {
    pub fn new(config: AppConfig, stores: Stores) -> Arc<Self> {
        let locator = Arc::new(LastKnownLocation::new(stores.vehicles.clone()));
        Self::with_locator(config, stores, locator)
    }

    pub fn with_locator(config: AppConfig, stores: Stores, locator: Arc<dyn LocationSource>) -> Arc<Self> {
        let router = Arc::new(TopicRouter::new(config.connection_buffer));

        let locations = LocationProcessor::new(stores.vehicles.clone(), router.clone());
        let attendance = AttendanceEngine::new(stores.attendance.clone());
        let alerts = AlertDispatcher::new(
            stores.alerts.clone(),
            router.clone(),
            locator,
            config.sos_location_timeout(),
            config.sos_fallback(),
        );
        let trips = TripTracker::new(stores.vehicles.clone(), router.clone());

        Arc::new(Self {
            config,
            stores,
            router,
            locations,
            attendance,
            alerts,
            trips,
        })
    }

    /// Verifies a scan and, on check-in, tells the vehicle's topic about it.
    pub async fn scan_attendance(
        &self,
        user_id: &str,
        qr_data: &str,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, AttendanceError> {
        let outcome = self.attendance.verify(user_id, qr_data, now).await?;
        if let ScanOutcome::CheckedIn(record) = &outcome {
            let notice = ServerEvent::AttendanceScan(AttendanceNotice {
                user_id: record.user_id.clone(),
                bus_id: record.bus_id.clone(),
            });
            self.router.publish_to_vehicle(&record.bus_id, notice).await;
        }
        Ok(outcome)
    }

    /// Administrative status change, announced on the vehicle's topic.
    pub async fn set_vehicle_status(&self, bus_id: &str, status: VehicleStatus) -> Result<Vehicle, StoreError> {
        let vehicle = self.stores.vehicles.set_status(bus_id, status).await?;
        info!(bus = %bus_id, %status, "Vehicle status changed");
        let event = ServerEvent::BusStatus(BusStatus {
            bus_id: vehicle.id.clone(),
            status,
        });
        self.router.publish_to_vehicle(bus_id, event).await;
        Ok(vehicle)
    }

    pub fn issue_token(&self, bus_id: &str, now: DateTime<Utc>) -> AttendanceToken {
        AttendanceToken::issue_with_ttl(bus_id, now.timestamp_millis(), self.config.attendance_token_ttl_ms)
    }
}
