use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::LocationError;
use crate::models::events::{TripAction, TripUpdate};
use crate::models::message::{DeviceReport, Ignition};
use crate::processor::location::LocationOutcome;
use crate::state::Hub;

/// Driver id recorded for trips opened by the vehicle's own ignition signal.
pub const DEVICE_DRIVER_ID: &str = "device";

/// Handles one raw tracker payload from the device stream.
///
/// Undecodable or out-of-range payloads are logged and skipped; only store
/// failures are returned as errors.
pub async fn process_message(hub: &Hub, payload: &[u8]) -> anyhow::Result<()> {
    match DeviceReport::decode(payload) {
        Ok(device) => process_report(hub, device).await,
        Err(e) => {
            warn!("Failed to decode device payload: {}", e);
            Ok(())
        }
    }
}

pub async fn process_report(hub: &Hub, device: DeviceReport) -> anyhow::Result<()> {
    let DeviceReport {
        bus_id,
        report,
        ignition,
    } = device;
    info!(bus = %bus_id, ?ignition, has_fix = report.is_some(), "Processing device message");

    // Engine ON opens the trip before the first point; Engine OFF closes it after the last.
    if ignition == Some(Ignition::On) {
        hub.trips.apply(trip_update(&bus_id, TripAction::Start)).await?;
    }

    if let Some(report) = report {
        match hub.locations.report_location(report).await {
            Ok(LocationOutcome::Published(fan_out)) => {
                info!(bus = %bus_id, delivered = fan_out.delivered, "Device location published");
            }
            Ok(LocationOutcome::Stale) => {}
            Err(LocationError::Store(e)) => return Err(e.into()),
            Err(e) => {
                warn!(bus = %bus_id, error = %e, "Rejected device location");
            }
        }
    }

    if ignition == Some(Ignition::Off) {
        hub.trips.apply(trip_update(&bus_id, TripAction::Stop)).await?;
    }

    Ok(())
}

fn trip_update(bus_id: &str, action: TripAction) -> TripUpdate {
    TripUpdate {
        bus_id: bus_id.to_string(),
        driver_id: DEVICE_DRIVER_ID.to_string(),
        action,
    }
}

/// Fixed pool of ordered workers. Every report of a device hashes to the same
/// lane, so one device is processed in arrival order while different devices
/// proceed in parallel.
pub struct DeviceLanes {
    lanes: Vec<mpsc::Sender<DeviceReport>>,
    workers: Vec<JoinHandle<()>>,
}

impl DeviceLanes {
    pub fn spawn(hub: Arc<Hub>, lanes: usize, capacity: usize) -> Self {
        let (senders, workers): (Vec<_>, Vec<_>) = (0..lanes.max(1))
            .map(|lane| {
                let (tx, mut rx) = mpsc::channel::<DeviceReport>(capacity.max(1));
                let hub = hub.clone();
                let worker = tokio::spawn(async move {
                    while let Some(device) = rx.recv().await {
                        if let Err(e) = process_report(&hub, device).await {
                            error!(lane, "Error processing device message: {}", e);
                        }
                    }
                });
                (tx, worker)
            })
            .unzip();
        Self {
            lanes: senders,
            workers,
        }
    }

    /// Decodes `payload` and queues it on its device's lane. Waits when that
    /// lane is full, which holds back the consumer instead of reordering.
    pub async fn dispatch(&self, payload: &[u8]) {
        let device = match DeviceReport::decode(payload) {
            Ok(device) => device,
            Err(e) => {
                warn!("Failed to decode device payload: {}", e);
                return;
            }
        };
        let lane = &self.lanes[self.lane_for(&device.bus_id)];
        if lane.send(device).await.is_err() {
            error!("Device worker stopped; dropping message");
        }
    }

    fn lane_for(&self, bus_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        bus_id.hash(&mut hasher);
        (hasher.finish() % self.lanes.len() as u64) as usize
    }

    /// Closes the lanes and waits for queued reports to drain.
    pub async fn shutdown(self) {
        drop(self.lanes);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
