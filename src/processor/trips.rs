use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::broker::router::TopicRouter;
use crate::error::StoreError;
use crate::models::events::{ServerEvent, TripAction, TripUpdate};
use crate::models::vehicle::VehicleStatus;
use crate::store::VehicleStore;

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTrip {
    pub driver_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripTransition {
    Started,
    Stopped,
    /// Start on a running trip or stop on an idle vehicle.
    Ignored,
}

/// Per-vehicle trip state. A start while a trip is running is ignored so
/// two near-simultaneous starts never open two trips.
pub struct TripTracker {
    vehicles: Arc<dyn VehicleStore>,
    router: Arc<TopicRouter>,
    trips: Mutex<HashMap<String, ActiveTrip>>,
}

impl TripTracker {
    pub fn new(vehicles: Arc<dyn VehicleStore>, router: Arc<TopicRouter>) -> Self {
        Self {
            vehicles,
            router,
            trips: Mutex::new(HashMap::new()),
        }
    }

    /// The trip map is held for the whole transition and only changes once
    /// the status write succeeded, so a failed write can be retried.
    pub async fn apply(&self, update: TripUpdate) -> Result<TripTransition, StoreError> {
        let mut trips = self.trips.lock().await;
        let (transition, status) = match (update.action, trips.contains_key(&update.bus_id)) {
            (TripAction::Start, false) => (TripTransition::Started, VehicleStatus::Active),
            (TripAction::Stop, true) => (TripTransition::Stopped, VehicleStatus::Inactive),
            _ => {
                info!(bus = %update.bus_id, action = ?update.action, "Ignored trip update");
                return Ok(TripTransition::Ignored);
            }
        };

        match self.vehicles.set_status(&update.bus_id, status).await {
            Ok(_) => {}
            Err(StoreError::NotFound) => {
                warn!(bus = %update.bus_id, "Trip update for unregistered vehicle");
            }
            Err(e) => return Err(e),
        }

        if transition == TripTransition::Started {
            trips.insert(
                update.bus_id.clone(),
                ActiveTrip {
                    driver_id: update.driver_id.clone(),
                    started_at: Utc::now(),
                },
            );
        } else {
            trips.remove(&update.bus_id);
        }
        drop(trips);

        info!(bus = %update.bus_id, driver = %update.driver_id, ?transition, "Trip updated");
        let bus_id = update.bus_id.clone();
        self.router
            .publish_to_vehicle(&bus_id, ServerEvent::TripUpdate(update))
            .await;
        Ok(transition)
    }

    pub async fn active_trip(&self, bus_id: &str) -> Option<ActiveTrip> {
        self.trips.lock().await.get(bus_id).cloned()
    }
}
