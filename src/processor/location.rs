use std::sync::Arc;
use tracing::{debug, warn};

use crate::broker::router::{FanOut, TopicRouter};
use crate::error::LocationError;
use crate::models::events::{LocationUpdate, ServerEvent};
use crate::models::location::LocationReport;
use crate::store::{LocationWrite, VehicleStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationOutcome {
    Published(FanOut),
    /// Older than the stored report; not applied and not published.
    Stale,
}

pub struct LocationProcessor {
    vehicles: Arc<dyn VehicleStore>,
    router: Arc<TopicRouter>,
}

impl LocationProcessor {
    pub fn new(vehicles: Arc<dyn VehicleStore>, router: Arc<TopicRouter>) -> Self {
        Self { vehicles, router }
    }

    pub async fn report_location(&self, report: LocationReport) -> Result<LocationOutcome, LocationError> {
        if let Err(e) = report.validate() {
            warn!(bus = %report.bus_id, error = %e, "Rejected location report");
            return Err(e);
        }

        match self.vehicles.record_location(&report).await? {
            LocationWrite::Applied => {
                let update = ServerEvent::LocationUpdate(LocationUpdate::from(&report));
                let fan_out = self.router.publish_to_vehicle(&report.bus_id, update).await;
                debug!(bus = %report.bus_id, delivered = fan_out.delivered, "Location updated");
                Ok(LocationOutcome::Published(fan_out))
            }
            LocationWrite::Stale => {
                warn!(bus = %report.bus_id, timestamp = report.timestamp, "Dropped out-of-order location report");
                Ok(LocationOutcome::Stale)
            }
        }
    }
}
