//! Client-side projection of the event stream.
//!
//! A dashboard starts from REST snapshots (`load_vehicles`, `load_alerts`)
//! and folds every server event into a role-specific view. Events may be
//! delivered more than once, so every fold is idempotent: alerts are keyed
//! by id and resolution is never undone by a later snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::client::{ChannelClient, ConnectionStatus};
use crate::models::alert::{AlertStatus, EmergencyAlert};
use crate::models::events::{ClientEvent, LocationUpdate, Role, ScanResult, ServerEvent, SosAlert, TripAction};
use crate::models::location::GeoPoint;
use crate::models::vehicle::{Vehicle, VehicleStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardState {
    pub connection: ConnectionStatus,
    pub last_error: Option<String>,
    pub view: RoleView,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoleView {
    Student(StudentView),
    Driver(DriverView),
    Admin(AdminView),
}

/// A passenger following one vehicle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StudentView {
    pub followed: Option<String>,
    pub vehicle: Option<Vehicle>,
    pub last_scan: Option<ScanResult>,
}

/// The operator display of a single vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverView {
    pub bus_id: String,
    pub vehicle: Option<Vehicle>,
    pub trip_active: bool,
    pub checked_in: Vec<String>,
    pub alerts: Vec<EmergencyAlert>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdminView {
    pub vehicles: BTreeMap<String, Vehicle>,
    /// Newest first.
    pub alerts: Vec<EmergencyAlert>,
}

impl DashboardState {
    /// `bus_id` is the followed vehicle for students and the driven one
    /// for drivers; admins ignore it.
    pub fn for_role(role: Role, bus_id: Option<&str>) -> Self {
        let view = match role {
            Role::Student => RoleView::Student(StudentView {
                followed: bus_id.map(str::to_string),
                ..StudentView::default()
            }),
            Role::Driver => RoleView::Driver(DriverView {
                bus_id: bus_id.unwrap_or_default().to_string(),
                vehicle: None,
                trip_active: false,
                checked_in: Vec::new(),
                alerts: Vec::new(),
            }),
            Role::Admin => RoleView::Admin(AdminView::default()),
        };
        Self {
            connection: ConnectionStatus::Connecting,
            last_error: None,
            view,
        }
    }

    pub fn role(&self) -> Role {
        match self.view {
            RoleView::Student(_) => Role::Student,
            RoleView::Driver(_) => Role::Driver,
            RoleView::Admin(_) => Role::Admin,
        }
    }

    /// Membership events this dashboard needs the broker to know about.
    pub fn subscriptions(&self) -> Vec<ClientEvent> {
        let mut events = vec![ClientEvent::JoinRole(self.role())];
        match &self.view {
            RoleView::Student(view) => {
                if let Some(bus_id) = &view.followed {
                    events.push(ClientEvent::SubscribeBus(bus_id.clone()));
                }
            }
            RoleView::Driver(view) if !view.bus_id.is_empty() => {
                events.push(ClientEvent::JoinBus(view.bus_id.clone()));
            }
            _ => {}
        }
        events
    }

    pub fn event_names(&self) -> &'static [&'static str] {
        match self.view {
            RoleView::Student(_) => &["location:update", "bus:status", "attendance:result", "error"],
            RoleView::Driver(_) => &[
                "location:update",
                "bus:status",
                "trip:update",
                "attendance:scan",
                "sos:alert",
                "sos:resolved",
                "error",
            ],
            RoleView::Admin(_) => &[
                "location:update",
                "bus:status",
                "trip:update",
                "sos:alert",
                "sos:resolved",
                "error",
            ],
        }
    }

    pub fn set_connection(&mut self, status: ConnectionStatus) {
        self.connection = status;
    }

    pub fn load_vehicles(&mut self, snapshot: Vec<Vehicle>) {
        match &mut self.view {
            RoleView::Admin(view) => {
                for vehicle in snapshot {
                    let merged = merge_vehicle(view.vehicles.remove(&vehicle.id), vehicle);
                    view.vehicles.insert(merged.id.clone(), merged);
                }
            }
            RoleView::Student(view) => {
                if let Some(followed) = &view.followed {
                    if let Some(vehicle) = snapshot.into_iter().find(|v| &v.id == followed) {
                        view.vehicle = Some(merge_vehicle(view.vehicle.take(), vehicle));
                    }
                }
            }
            RoleView::Driver(view) => {
                if let Some(vehicle) = snapshot.into_iter().find(|v| v.id == view.bus_id) {
                    view.trip_active = vehicle.status == VehicleStatus::Active;
                    view.vehicle = Some(merge_vehicle(view.vehicle.take(), vehicle));
                }
            }
        }
    }

    pub fn load_alerts(&mut self, snapshot: Vec<EmergencyAlert>) {
        match &mut self.view {
            RoleView::Admin(view) => merge_alerts(&mut view.alerts, snapshot),
            RoleView::Driver(view) => {
                let bus_id = view.bus_id.clone();
                merge_alerts(
                    &mut view.alerts,
                    snapshot.into_iter().filter(|a| a.bus_id == bus_id).collect(),
                );
            }
            RoleView::Student(_) => {}
        }
    }

    /// Folds one server event into the view.
    pub fn apply(&mut self, event: &ServerEvent) {
        if let ServerEvent::Error(notice) = event {
            self.last_error = Some(notice.message.clone());
            return;
        }
        match &mut self.view {
            RoleView::Student(view) => apply_student(view, event),
            RoleView::Driver(view) => apply_driver(view, event),
            RoleView::Admin(view) => apply_admin(view, event),
        }
    }

    pub fn unresolved_alerts(&self) -> usize {
        match &self.view {
            RoleView::Admin(AdminView { alerts, .. }) | RoleView::Driver(DriverView { alerts, .. }) => {
                alerts.iter().filter(|a| !a.resolved).count()
            }
            RoleView::Student(_) => 0,
        }
    }
}

fn apply_student(view: &mut StudentView, event: &ServerEvent) {
    let Some(followed) = view.followed.clone() else {
        if let ServerEvent::AttendanceResult(result) = event {
            view.last_scan = Some(result.clone());
        }
        return;
    };
    match event {
        ServerEvent::LocationUpdate(update) if update.bus_id == followed => {
            let vehicle = view.vehicle.get_or_insert_with(|| Vehicle::unregistered(&followed));
            apply_location(vehicle, update);
        }
        ServerEvent::BusStatus(status) if status.bus_id == followed => {
            let vehicle = view.vehicle.get_or_insert_with(|| Vehicle::unregistered(&followed));
            vehicle.status = status.status;
        }
        ServerEvent::AttendanceResult(result) => view.last_scan = Some(result.clone()),
        _ => {}
    }
}

fn apply_driver(view: &mut DriverView, event: &ServerEvent) {
    let bus_id = view.bus_id.clone();
    match event {
        ServerEvent::LocationUpdate(update) if update.bus_id == bus_id => {
            let vehicle = view.vehicle.get_or_insert_with(|| Vehicle::unregistered(&bus_id));
            apply_location(vehicle, update);
        }
        ServerEvent::BusStatus(status) if status.bus_id == bus_id => {
            let vehicle = view.vehicle.get_or_insert_with(|| Vehicle::unregistered(&bus_id));
            vehicle.status = status.status;
        }
        ServerEvent::TripUpdate(trip) if trip.bus_id == bus_id => {
            view.trip_active = trip.action == TripAction::Start;
        }
        ServerEvent::AttendanceScan(notice) if notice.bus_id == bus_id => {
            if !view.checked_in.contains(&notice.user_id) {
                view.checked_in.push(notice.user_id.clone());
            }
        }
        ServerEvent::SosAlert(sos) if sos.bus_id == bus_id => insert_alert(&mut view.alerts, sos),
        ServerEvent::SosResolved(resolved) => {
            mark_resolved(&mut view.alerts, resolved.id, resolved.resolved_at)
        }
        _ => {}
    }
}

fn apply_admin(view: &mut AdminView, event: &ServerEvent) {
    match event {
        ServerEvent::LocationUpdate(update) => {
            let vehicle = view
                .vehicles
                .entry(update.bus_id.clone())
                .or_insert_with(|| Vehicle::unregistered(&update.bus_id));
            apply_location(vehicle, update);
        }
        ServerEvent::BusStatus(status) => {
            let vehicle = view
                .vehicles
                .entry(status.bus_id.clone())
                .or_insert_with(|| Vehicle::unregistered(&status.bus_id));
            vehicle.status = status.status;
        }
        ServerEvent::TripUpdate(trip) => {
            let vehicle = view
                .vehicles
                .entry(trip.bus_id.clone())
                .or_insert_with(|| Vehicle::unregistered(&trip.bus_id));
            vehicle.status = match trip.action {
                TripAction::Start => VehicleStatus::Active,
                TripAction::Stop => VehicleStatus::Inactive,
            };
        }
        ServerEvent::SosAlert(sos) => insert_alert(&mut view.alerts, sos),
        ServerEvent::SosResolved(resolved) => {
            mark_resolved(&mut view.alerts, resolved.id, resolved.resolved_at)
        }
        _ => {}
    }
}

fn apply_location(vehicle: &mut Vehicle, update: &LocationUpdate) {
    vehicle.location = Some(GeoPoint::new(update.latitude, update.longitude));
    vehicle.speed = Some(update.speed);
}

/// Snapshot fields win, except that a live position is kept when the
/// snapshot has none yet.
fn merge_vehicle(current: Option<Vehicle>, mut snapshot: Vehicle) -> Vehicle {
    if let Some(current) = current {
        if snapshot.location.is_none() {
            snapshot.location = current.location;
            snapshot.speed = current.speed;
            snapshot.heading = current.heading;
        }
    }
    snapshot
}

fn insert_alert(alerts: &mut Vec<EmergencyAlert>, sos: &SosAlert) {
    if alerts.iter().any(|a| a.id == sos.id) {
        return;
    }
    alerts.push(EmergencyAlert {
        id: sos.id,
        user_id: sos.user_id.clone(),
        bus_id: sos.bus_id.clone(),
        message: sos.message.clone(),
        status: AlertStatus::Triggered,
        resolved: false,
        created_at: sos.timestamp,
        resolved_at: None,
        location: sos.location,
    });
    alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn mark_resolved(alerts: &mut [EmergencyAlert], id: Uuid, at: DateTime<Utc>) {
    if let Some(alert) = alerts.iter_mut().find(|a| a.id == id) {
        alert.resolve(at);
    }
}

fn merge_alerts(alerts: &mut Vec<EmergencyAlert>, snapshot: Vec<EmergencyAlert>) {
    for incoming in snapshot {
        match alerts.iter_mut().find(|a| a.id == incoming.id) {
            Some(existing) if existing.resolved && !incoming.resolved => {}
            Some(existing) => *existing = incoming,
            None => alerts.push(incoming),
        }
    }
    alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Wires a shared dashboard to a channel client: registers a handler per
/// event the view consumes, sends its memberships and mirrors the
/// connection status. The returned task ends when the client is closed.
pub fn attach(dashboard: Arc<Mutex<DashboardState>>, client: &ChannelClient) -> JoinHandle<()> {
    let (names, subscriptions) = {
        let state = dashboard.lock().unwrap_or_else(PoisonError::into_inner);
        (state.event_names(), state.subscriptions())
    };

    for name in names {
        let dashboard = dashboard.clone();
        client.subscribe(name, move |event| {
            dashboard
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .apply(event);
        });
    }

    for event in subscriptions {
        if let Err(e) = client.publish(event) {
            warn!(error = %e, "Failed to send dashboard subscription");
        }
    }

    let mut status = client.watch_status();
    tokio::spawn(async move {
        loop {
            let current = *status.borrow_and_update();
            dashboard
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .set_connection(current);
            if current == ConnectionStatus::Disconnected || status.changed().await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::events::{AttendanceNotice, BusStatus, SosResolved, TripUpdate};
    use chrono::{Duration, TimeZone};

    fn sos(id: Uuid, bus: &str, minute: u32) -> SosAlert {
        SosAlert {
            id,
            user_id: "u1".to_string(),
            bus_id: bus.to_string(),
            message: "Emergency SOS triggered".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 8, minute, 0).unwrap(),
            location: None,
        }
    }

    fn location(bus: &str, lat: f64) -> ServerEvent {
        ServerEvent::LocationUpdate(LocationUpdate {
            bus_id: bus.to_string(),
            latitude: lat,
            longitude: 10.0,
            speed: 25.0,
        })
    }

    fn admin_view(state: &DashboardState) -> &AdminView {
        match &state.view {
            RoleView::Admin(view) => view,
            other => panic!("not an admin view: {:?}", other),
        }
    }

    #[test]
    fn admin_folds_snapshots_and_events() {
        let mut state = DashboardState::for_role(Role::Admin, None);
        state.apply(&location("BUS-001", 1.0));
        state.load_vehicles(vec![
            Vehicle::new("BUS-001", "1", "North", 40),
            Vehicle::new("BUS-002", "2", "South", 30),
        ]);

        let view = admin_view(&state);
        assert_eq!(view.vehicles.len(), 2);
        let bus = &view.vehicles["BUS-001"];
        assert_eq!(bus.route, "North");
        assert_eq!(bus.location, Some(GeoPoint::new(1.0, 10.0)));

        state.apply(&ServerEvent::BusStatus(BusStatus {
            bus_id: "BUS-002".to_string(),
            status: VehicleStatus::Maintenance,
        }));
        state.apply(&ServerEvent::TripUpdate(TripUpdate {
            bus_id: "BUS-001".to_string(),
            driver_id: "d1".to_string(),
            action: TripAction::Start,
        }));
        let view = admin_view(&state);
        assert_eq!(view.vehicles["BUS-002"].status, VehicleStatus::Maintenance);
        assert_eq!(view.vehicles["BUS-001"].status, VehicleStatus::Active);
    }

    #[test]
    fn admin_learns_vehicles_from_any_live_event() {
        let mut state = DashboardState::for_role(Role::Admin, None);
        state.apply(&ServerEvent::TripUpdate(TripUpdate {
            bus_id: "BUS-007".to_string(),
            driver_id: "device".to_string(),
            action: TripAction::Start,
        }));
        state.apply(&ServerEvent::BusStatus(BusStatus {
            bus_id: "BUS-008".to_string(),
            status: VehicleStatus::Maintenance,
        }));
        state.apply(&location("BUS-009", 3.0));

        let view = admin_view(&state);
        assert_eq!(view.vehicles.len(), 3);
        assert_eq!(view.vehicles["BUS-007"].status, VehicleStatus::Active);

        state.load_vehicles(vec![Vehicle::new("BUS-007", "7", "East", 30)]);
        assert_eq!(admin_view(&state).vehicles["BUS-007"].route, "East");
    }

    #[test]
    fn alerts_are_deduplicated_and_resolution_sticks() {
        let mut state = DashboardState::for_role(Role::Admin, None);
        let early = Uuid::new_v4();
        let late = Uuid::new_v4();

        state.apply(&ServerEvent::SosAlert(sos(early, "BUS-001", 0)));
        state.apply(&ServerEvent::SosAlert(sos(late, "BUS-002", 5)));
        state.apply(&ServerEvent::SosAlert(sos(early, "BUS-001", 0)));
        assert_eq!(state.unresolved_alerts(), 2);
        assert_eq!(admin_view(&state).alerts[0].id, late);

        let resolved_at = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        state.apply(&ServerEvent::SosResolved(SosResolved {
            id: early,
            bus_id: "BUS-001".to_string(),
            resolved_at,
        }));
        assert_eq!(state.unresolved_alerts(), 1);

        // an older snapshot still lists it as open
        let mut stale = EmergencyAlert::new("u1", "BUS-001", None, None, resolved_at - Duration::hours(1));
        stale.id = early;
        state.load_alerts(vec![stale]);
        assert_eq!(state.unresolved_alerts(), 1);
        assert_eq!(admin_view(&state).alerts.len(), 2);
    }

    #[test]
    fn driver_view_tracks_only_its_vehicle() {
        let mut state = DashboardState::for_role(Role::Driver, Some("BUS-001"));
        assert_eq!(
            state.subscriptions(),
            vec![
                ClientEvent::JoinRole(Role::Driver),
                ClientEvent::JoinBus("BUS-001".to_string())
            ]
        );

        state.apply(&location("BUS-002", 5.0));
        state.apply(&location("BUS-001", 2.0));
        for user in ["u1", "u2", "u1"] {
            state.apply(&ServerEvent::AttendanceScan(AttendanceNotice {
                user_id: user.to_string(),
                bus_id: "BUS-001".to_string(),
            }));
        }
        state.apply(&ServerEvent::TripUpdate(TripUpdate {
            bus_id: "BUS-001".to_string(),
            driver_id: "d1".to_string(),
            action: TripAction::Start,
        }));
        state.apply(&ServerEvent::SosAlert(sos(Uuid::new_v4(), "BUS-002", 1)));

        match &state.view {
            RoleView::Driver(view) => {
                assert_eq!(view.vehicle.as_ref().and_then(|v| v.location), Some(GeoPoint::new(2.0, 10.0)));
                assert_eq!(view.checked_in, vec!["u1".to_string(), "u2".to_string()]);
                assert!(view.trip_active);
                assert!(view.alerts.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn student_sees_scan_results_and_errors() {
        let mut state = DashboardState::for_role(Role::Student, Some("BUS-003"));
        assert_eq!(
            state.subscriptions(),
            vec![
                ClientEvent::JoinRole(Role::Student),
                ClientEvent::SubscribeBus("BUS-003".to_string())
            ]
        );

        state.apply(&ServerEvent::AttendanceResult(ScanResult {
            accepted: false,
            record: None,
            reason: Some("Attendance already marked for this session.".to_string()),
        }));
        state.apply(&ServerEvent::error("empty busId"));
        state.apply(&location("BUS-003", 3.0));

        assert_eq!(state.last_error.as_deref(), Some("empty busId"));
        match &state.view {
            RoleView::Student(view) => {
                assert_eq!(view.last_scan.as_ref().map(|r| r.accepted), Some(false));
                assert!(view.vehicle.as_ref().and_then(|v| v.location).is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(state.unresolved_alerts(), 0);
    }

    struct Pipe {
        inbound: tokio::sync::mpsc::UnboundedReceiver<String>,
        sent: tokio::sync::mpsc::UnboundedSender<String>,
    }

    #[async_trait::async_trait]
    impl crate::client::Connection for Pipe {
        async fn send(&mut self, frame: String) -> Result<(), crate::error::ChannelError> {
            self.sent
                .send(frame)
                .map_err(|_| crate::error::ChannelError::Closed)
        }

        async fn recv(&mut self) -> Option<Result<String, crate::error::ChannelError>> {
            self.inbound.recv().await.map(Ok)
        }
    }

    struct OneShot(Mutex<Option<Pipe>>);

    #[async_trait::async_trait]
    impl crate::client::Transport for OneShot {
        async fn connect(&self) -> Result<Box<dyn crate::client::Connection>, crate::error::ChannelError> {
            match self.0.lock().unwrap().take() {
                Some(pipe) => Ok(Box::new(pipe)),
                None => Err(crate::error::ChannelError::Connect("gone".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn attached_dashboard_follows_the_channel() {
        let (inbound_tx, inbound_rx) = tokio::sync::mpsc::unbounded_channel();
        let (sent_tx, mut sent_rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = std::sync::Arc::new(OneShot(Mutex::new(Some(Pipe {
            inbound: inbound_rx,
            sent: sent_tx,
        }))));
        let client = ChannelClient::open(transport, crate::client::ReconnectPolicy::default());

        let dashboard = Arc::new(Mutex::new(DashboardState::for_role(Role::Admin, None)));
        let watcher = attach(dashboard.clone(), &client);

        let join = ClientEvent::from_frame(&sent_rx.recv().await.unwrap()).unwrap();
        assert_eq!(join, ClientEvent::JoinRole(Role::Admin));

        let id = Uuid::new_v4();
        inbound_tx
            .send(ServerEvent::SosAlert(sos(id, "BUS-001", 0)).to_frame().unwrap())
            .unwrap();
        inbound_tx
            .send(ServerEvent::error("sync").to_frame().unwrap())
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                {
                    let state = dashboard.lock().unwrap();
                    if state.last_error.is_some() && state.connection == ConnectionStatus::Connected {
                        break;
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(dashboard.lock().unwrap().unresolved_alerts(), 1);

        client.close().await;
        watcher.await.unwrap();
        assert_eq!(dashboard.lock().unwrap().connection, ConnectionStatus::Disconnected);
    }
}
