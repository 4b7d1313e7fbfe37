use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::router::TopicRouter;
use crate::error::{AlertError, StoreError};
use crate::models::alert::EmergencyAlert;
use crate::models::events::{ServerEvent, SosAlert, SosResolved};
use crate::models::location::GeoPoint;
use crate::store::{AlertStore, ResolveOutcome, VehicleStore};

/// Best-effort position fix for an SOS trigger.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn locate(&self, user_id: &str, bus_id: &str) -> Option<GeoPoint>;
}

/// Uses the vehicle's last reported position.
pub struct LastKnownLocation {
    vehicles: Arc<dyn VehicleStore>,
}

impl LastKnownLocation {
    pub fn new(vehicles: Arc<dyn VehicleStore>) -> Self {
        Self { vehicles }
    }
}

#[async_trait]
impl LocationSource for LastKnownLocation {
    async fn locate(&self, _user_id: &str, bus_id: &str) -> Option<GeoPoint> {
        match self.vehicles.get(bus_id).await {
            Ok(vehicle) => vehicle.and_then(|v| v.location),
            Err(e) => {
                warn!(bus = %bus_id, error = %e, "Vehicle lookup failed during SOS fix");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub alert: EmergencyAlert,
    /// `false` when the alert had already been resolved by an earlier call.
    pub newly_resolved: bool,
}

pub struct AlertDispatcher {
    store: Arc<dyn AlertStore>,
    router: Arc<TopicRouter>,
    locator: Arc<dyn LocationSource>,
    fix_timeout: Duration,
    fallback: GeoPoint,
}

impl AlertDispatcher {
    pub fn new(
        store: Arc<dyn AlertStore>,
        router: Arc<TopicRouter>,
        locator: Arc<dyn LocationSource>,
        fix_timeout: Duration,
        fallback: GeoPoint,
    ) -> Self {
        Self {
            store,
            router,
            locator,
            fix_timeout,
            fallback,
        }
    }

    /// Records an unresolved alert and notifies the vehicle topic and every
    /// admin. A missing or slow location fix falls back to the configured
    /// point; only a store failure fails the trigger.
    pub async fn trigger_alert(
        &self,
        user_id: &str,
        bus_id: &str,
        message: Option<String>,
    ) -> Result<EmergencyAlert, AlertError> {
        let location = self.obtain_fix(user_id, bus_id).await;
        let alert = EmergencyAlert::new(user_id, bus_id, message, Some(location), Utc::now());

        if let Err(e) = self.store.create(&alert).await {
            error!(user = %user_id, bus = %bus_id, error = %e, "Failed to persist SOS alert");
            return Err(AlertError::Create(e));
        }

        // vehicle topics plus the admin broadcast
        let fan_out = self
            .router
            .publish_to_vehicle(bus_id, ServerEvent::SosAlert(SosAlert::from(&alert)))
            .await;
        info!(
            alert = %alert.id,
            user = %user_id,
            bus = %bus_id,
            delivered = fan_out.delivered,
            "SOS alert triggered"
        );
        Ok(alert)
    }

    /// Idempotent: resolving a resolved alert succeeds without notifying
    /// anyone again.
    pub async fn resolve_alert(&self, alert_id: Uuid) -> Result<Resolution, AlertError> {
        let outcome = match self.store.resolve(alert_id, Utc::now()).await {
            Ok(outcome) => outcome,
            Err(StoreError::NotFound) => return Err(AlertError::NotFound(alert_id)),
            Err(e) => return Err(AlertError::Resolve(e)),
        };

        match outcome {
            ResolveOutcome::Resolved(alert) => {
                let resolved_at = alert.resolved_at.unwrap_or_else(Utc::now);
                let event = ServerEvent::SosResolved(SosResolved {
                    id: alert.id,
                    bus_id: alert.bus_id.clone(),
                    resolved_at,
                });
                self.router.publish_to_vehicle(&alert.bus_id, event).await;
                info!(alert = %alert.id, "SOS alert resolved");
                Ok(Resolution {
                    alert,
                    newly_resolved: true,
                })
            }
            ResolveOutcome::AlreadyResolved(alert) => Ok(Resolution {
                alert,
                newly_resolved: false,
            }),
        }
    }

    pub async fn list_alerts(&self) -> Result<Vec<EmergencyAlert>, StoreError> {
        self.store.list().await
    }

    async fn obtain_fix(&self, user_id: &str, bus_id: &str) -> GeoPoint {
        match tokio::time::timeout(self.fix_timeout, self.locator.locate(user_id, bus_id)).await {
            Ok(Some(point)) => point,
            Ok(None) => {
                warn!(bus = %bus_id, "No location fix available, using fallback");
                self.fallback
            }
            Err(_) => {
                warn!(bus = %bus_id, timeout_ms = self.fix_timeout.as_millis() as u64, "Location fix timed out, using fallback");
                self.fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::alert::AlertStatus;
    use crate::models::events::Role;
    use crate::models::vehicle::Vehicle;
    use crate::store::memory::{MemoryAlertStore, MemoryVehicleStore};
    use crate::store::LocationWrite;

    struct NeverFixes;

    #[async_trait]
    impl LocationSource for NeverFixes {
        async fn locate(&self, _: &str, _: &str) -> Option<GeoPoint> {
            std::future::pending().await
        }
    }

    struct FixedPoint(GeoPoint);

    #[async_trait]
    impl LocationSource for FixedPoint {
        async fn locate(&self, _: &str, _: &str) -> Option<GeoPoint> {
            Some(self.0)
        }
    }

    struct DownStore;

    #[async_trait]
    impl AlertStore for DownStore {
        async fn create(&self, _: &EmergencyAlert) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("timeout".to_string()))
        }
        async fn get(&self, _: Uuid) -> Result<Option<EmergencyAlert>, StoreError> {
            Err(StoreError::Unavailable("timeout".to_string()))
        }
        async fn list(&self) -> Result<Vec<EmergencyAlert>, StoreError> {
            Err(StoreError::Unavailable("timeout".to_string()))
        }
        async fn resolve(&self, _: Uuid, _: chrono::DateTime<Utc>) -> Result<ResolveOutcome, StoreError> {
            Err(StoreError::Unavailable("timeout".to_string()))
        }
    }

    const FALLBACK: GeoPoint = GeoPoint {
        latitude: 19.4326,
        longitude: -99.1332,
    };

    fn dispatcher(locator: Arc<dyn LocationSource>) -> (AlertDispatcher, Arc<TopicRouter>) {
        let router = Arc::new(TopicRouter::new(16));
        let dispatcher = AlertDispatcher::new(
            Arc::new(MemoryAlertStore::default()),
            router.clone(),
            locator,
            Duration::from_secs(5),
            FALLBACK,
        );
        (dispatcher, router)
    }

    #[tokio::test(start_paused = true)]
    async fn geolocation_timeout_falls_back() {
        let (dispatcher, _) = dispatcher(Arc::new(NeverFixes));
        let alert = dispatcher.trigger_alert("u1", "BUS-001", None).await.unwrap();
        assert_eq!(alert.status(), AlertStatus::Triggered);
        assert!(!alert.resolved);
        assert_eq!(alert.location, Some(FALLBACK));
    }

    #[tokio::test]
    async fn trigger_notifies_vehicle_and_admins_once() {
        let (dispatcher, router) = dispatcher(Arc::new(FixedPoint(GeoPoint::new(1.0, 2.0))));
        let (admin, mut admin_rx) = router.register().await;
        let (driver, mut driver_rx) = router.register().await;
        let (elsewhere, mut elsewhere_rx) = router.register().await;
        router.join_role(admin, Role::Admin).await;
        router.join_vehicle(admin, "BUS-001").await;
        router.join_vehicle(driver, "BUS-001").await;
        router.join_vehicle(elsewhere, "BUS-002").await;

        let alert = dispatcher
            .trigger_alert("u1", "BUS-001", Some("Driver unwell".to_string()))
            .await
            .unwrap();
        assert_eq!(alert.location, Some(GeoPoint::new(1.0, 2.0)));

        match admin_rx.try_recv().unwrap().as_ref() {
            ServerEvent::SosAlert(sos) => {
                assert_eq!(sos.id, alert.id);
                assert_eq!(sos.message, "Driver unwell");
                assert_eq!(sos.user_id, "u1");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(admin_rx.try_recv().is_err());
        assert!(driver_rx.try_recv().is_ok());
        assert!(elsewhere_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn resolving_twice_notifies_once() {
        let (dispatcher, router) = dispatcher(Arc::new(FixedPoint(FALLBACK)));
        let alert = dispatcher.trigger_alert("u1", "BUS-001", None).await.unwrap();
        let (admin, mut admin_rx) = router.register().await;
        router.join_role(admin, Role::Admin).await;

        let first = dispatcher.resolve_alert(alert.id).await.unwrap();
        let second = dispatcher.resolve_alert(alert.id).await.unwrap();
        assert!(first.newly_resolved);
        assert!(!second.newly_resolved);
        assert!(second.alert.resolved);
        assert_eq!(first.alert.resolved_at, second.alert.resolved_at);

        assert!(matches!(admin_rx.try_recv().unwrap().as_ref(), ServerEvent::SosResolved(_)));
        assert!(admin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_alert_is_not_found() {
        let (dispatcher, _) = dispatcher(Arc::new(FixedPoint(FALLBACK)));
        let id = Uuid::new_v4();
        assert!(matches!(
            dispatcher.resolve_alert(id).await,
            Err(AlertError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn store_failure_surfaces_retryable_message() {
        let router = Arc::new(TopicRouter::new(16));
        let (admin, mut admin_rx) = router.register().await;
        router.join_role(admin, Role::Admin).await;
        let dispatcher = AlertDispatcher::new(
            Arc::new(DownStore),
            router,
            Arc::new(FixedPoint(FALLBACK)),
            Duration::from_secs(5),
            FALLBACK,
        );

        let err = dispatcher.trigger_alert("u1", "BUS-001", None).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to send SOS alert. Please try again.");
        assert!(admin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn last_known_location_reads_vehicle_store() {
        let vehicles = Arc::new(MemoryVehicleStore::default());
        vehicles.register(Vehicle::new("BUS-001", "1", "Campus", 40)).await.unwrap();
        let locator = LastKnownLocation::new(vehicles.clone());
        assert_eq!(locator.locate("u1", "BUS-001").await, None);

        let report = crate::models::location::LocationReport {
            bus_id: "BUS-001".to_string(),
            latitude: 3.0,
            longitude: 4.0,
            speed: 0.0,
            heading: 0.0,
            timestamp: 1,
        };
        assert_eq!(vehicles.record_location(&report).await.unwrap(), LocationWrite::Applied);
        assert_eq!(locator.locate("u1", "BUS-001").await, Some(GeoPoint::new(3.0, 4.0)));
    }
}
