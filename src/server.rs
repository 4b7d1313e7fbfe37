use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

use crate::broker::channel::serve_connection;
use crate::error::ApiError;
use crate::models::alert::EmergencyAlert;
use crate::models::attendance::AttendanceToken;
use crate::models::events::SosTrigger;
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::processor::attendance::ScanOutcome;
use crate::state::Hub;
use crate::store::{AlertStore, VehicleStore};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVehicle {
    pub id: String,
    pub number: String,
    pub route: String,
    pub capacity: u32,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub user_id: String,
    pub qr_data: String,
}

pub fn app(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/vehicles", get(list_vehicles).post(register_vehicle))
        .route("/api/vehicles/:id", get(get_vehicle))
        .route("/api/vehicles/:id/status", put(set_vehicle_status))
        .route("/api/vehicles/:id/attendance-token", get(attendance_token))
        .route("/api/attendance/scan", post(scan_attendance))
        .route("/api/alerts", get(list_alerts).post(trigger_alert))
        .route("/api/alerts/:id/resolve", post(resolve_alert))
        .with_state(hub)
}

pub async fn serve(hub: Arc<Hub>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&hub.config.bind_addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app(hub)).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> Response {
    ws.on_upgrade(move |socket| serve_connection(socket, hub))
}

async fn health(State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": hub.router.connection_count().await,
    }))
}

async fn list_vehicles(State(hub): State<Arc<Hub>>) -> ApiResult<Json<Vec<Vehicle>>> {
    Ok(Json(hub.stores.vehicles.list().await?))
}

async fn register_vehicle(
    State(hub): State<Arc<Hub>>,
    Json(body): Json<NewVehicle>,
) -> ApiResult<(StatusCode, Json<Vehicle>)> {
    if body.id.trim().is_empty() {
        return Err(ApiError::BadRequest("vehicle id must not be empty".to_string()));
    }
    let vehicle = hub
        .stores
        .vehicles
        .register(Vehicle::new(body.id, body.number, body.route, body.capacity))
        .await?;
    info!(bus = %vehicle.id, "Vehicle registered");
    Ok((StatusCode::CREATED, Json(vehicle)))
}

async fn get_vehicle(State(hub): State<Arc<Hub>>, Path(id): Path<String>) -> ApiResult<Json<Vehicle>> {
    match hub.stores.vehicles.get(&id).await? {
        Some(vehicle) => Ok(Json(vehicle)),
        None => Err(ApiError::NotFound(format!("vehicle {}", id))),
    }
}

async fn set_vehicle_status(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
    Json(body): Json<StatusChange>,
) -> ApiResult<Json<Vehicle>> {
    let status: VehicleStatus = body.status.parse().map_err(ApiError::BadRequest)?;
    Ok(Json(hub.set_vehicle_status(&id, status).await?))
}

async fn attendance_token(State(hub): State<Arc<Hub>>, Path(id): Path<String>) -> Json<AttendanceToken> {
    Json(hub.issue_token(&id, Utc::now()))
}

async fn scan_attendance(State(hub): State<Arc<Hub>>, Json(body): Json<ScanRequest>) -> ApiResult<Response> {
    let response = match hub.scan_attendance(&body.user_id, &body.qr_data, Utc::now()).await? {
        ScanOutcome::CheckedIn(record) => (StatusCode::CREATED, Json(record)).into_response(),
        ScanOutcome::Rejected(rejection) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "reason": rejection.reason() })),
        )
            .into_response(),
    };
    Ok(response)
}

async fn list_alerts(State(hub): State<Arc<Hub>>) -> ApiResult<Json<Vec<EmergencyAlert>>> {
    Ok(Json(hub.stores.alerts.list().await?))
}

async fn trigger_alert(
    State(hub): State<Arc<Hub>>,
    Json(body): Json<SosTrigger>,
) -> ApiResult<(StatusCode, Json<EmergencyAlert>)> {
    if body.user_id.trim().is_empty() || body.bus_id.trim().is_empty() {
        return Err(ApiError::BadRequest("userId and busId are required".to_string()));
    }
    let alert = hub.alerts.trigger_alert(&body.user_id, &body.bus_id, body.message).await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

async fn resolve_alert(State(hub): State<Arc<Hub>>, Path(id): Path<Uuid>) -> ApiResult<Json<EmergencyAlert>> {
    let resolution = hub.alerts.resolve_alert(id).await?;
    Ok(Json(resolution.alert))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChannelClient, ConnectionStatus, ReconnectPolicy, WsTransport};
    use crate::config::AppConfig;
    use crate::error::{AlertError, StoreError};
    use crate::models::events::{ClientEvent, Role, ServerEvent};
    use crate::models::location::LocationReport;
    use crate::processor::location::LocationOutcome;
    use crate::store::Stores;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn hub() -> Arc<Hub> {
        Hub::new(AppConfig::default(), Stores::in_memory())
    }

    #[tokio::test]
    async fn vehicle_endpoints() {
        let hub = hub();
        let body = NewVehicle {
            id: "BUS-001".to_string(),
            number: "1".to_string(),
            route: "Campus Loop".to_string(),
            capacity: 40,
        };
        let (status, _) = register_vehicle(State(hub.clone()), Json(body)).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let Json(vehicle) = get_vehicle(State(hub.clone()), Path("BUS-001".to_string())).await.unwrap();
        assert_eq!(vehicle.route, "Campus Loop");

        let missing = get_vehicle(State(hub.clone()), Path("BUS-404".to_string())).await.unwrap_err();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let bad = set_vehicle_status(
            State(hub.clone()),
            Path("BUS-001".to_string()),
            Json(StatusChange {
                status: "parked".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let Json(updated) = set_vehicle_status(
            State(hub.clone()),
            Path("BUS-001".to_string()),
            Json(StatusChange {
                status: "maintenance".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.status, VehicleStatus::Maintenance);

        let Json(all) = list_vehicles(State(hub)).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn reregistering_keeps_live_state() {
        let hub = hub();
        let new_vehicle = |route: &str| NewVehicle {
            id: "BUS-001".to_string(),
            number: "1".to_string(),
            route: route.to_string(),
            capacity: 40,
        };
        let report = |timestamp: i64, latitude: f64| LocationReport {
            bus_id: "BUS-001".to_string(),
            latitude,
            longitude: -99.1,
            speed: 20.0,
            heading: 90.0,
            timestamp,
        };

        register_vehicle(State(hub.clone()), Json(new_vehicle("North"))).await.unwrap();
        hub.locations.report_location(report(5_000, 19.4)).await.unwrap();
        hub.set_vehicle_status("BUS-001", VehicleStatus::Active).await.unwrap();

        let (_, Json(vehicle)) = register_vehicle(State(hub.clone()), Json(new_vehicle("South"))).await.unwrap();
        assert_eq!(vehicle.route, "South");
        assert_eq!(vehicle.status, VehicleStatus::Active);
        assert_eq!(vehicle.last_report_at, Some(5_000));

        let late = hub.locations.report_location(report(1_000, 25.0)).await.unwrap();
        assert!(matches!(late, LocationOutcome::Stale));
        let Json(stored) = get_vehicle(State(hub), Path("BUS-001".to_string())).await.unwrap();
        assert_eq!(stored.location.map(|p| p.latitude), Some(19.4));
    }

    #[tokio::test]
    async fn scan_endpoint_reports_rejections_as_422() {
        let hub = hub();
        let Json(token) = attendance_token(State(hub.clone()), Path("BUS-001".to_string())).await;
        let qr_data = token.to_payload().unwrap();

        let request = |qr: &str| ScanRequest {
            user_id: "u1".to_string(),
            qr_data: qr.to_string(),
        };
        let first = scan_attendance(State(hub.clone()), Json(request(&qr_data))).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let again = scan_attendance(State(hub.clone()), Json(request(&qr_data))).await.unwrap();
        assert_eq!(again.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let garbage = scan_attendance(State(hub), Json(request("hello"))).await.unwrap();
        assert_eq!(garbage.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn alert_endpoints() {
        let hub = hub();
        let body = SosTrigger {
            user_id: "u1".to_string(),
            bus_id: "BUS-001".to_string(),
            message: None,
        };
        let (status, Json(alert)) = trigger_alert(State(hub.clone()), Json(body)).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(!alert.resolved);

        let Json(resolved) = resolve_alert(State(hub.clone()), Path(alert.id)).await.unwrap();
        assert!(resolved.resolved);
        let Json(again) = resolve_alert(State(hub.clone()), Path(alert.id)).await.unwrap();
        assert_eq!(again.resolved_at, resolved.resolved_at);

        let unknown = resolve_alert(State(hub.clone()), Path(Uuid::new_v4())).await.unwrap_err();
        assert_eq!(unknown.into_response().status(), StatusCode::NOT_FOUND);

        let Json(alerts) = list_alerts(State(hub)).await.unwrap();
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn store_failures_map_to_service_unavailable() {
        let err = ApiError::from(AlertError::Create(StoreError::Unavailable("down".to_string())));
        assert_eq!(err.to_string(), "Failed to send SOS alert. Please try again.");
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn sos_over_websocket_reaches_admin_dashboard() {
        let hub = hub();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = app(hub.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });
        let url = format!("ws://{}/ws", addr);

        let admin = ChannelClient::open(Arc::new(WsTransport::new(url.clone())), ReconnectPolicy::default());
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        admin.subscribe("sos:alert", move |event| {
            let _ = seen_tx.send(event.clone());
        });
        admin.publish(ClientEvent::JoinRole(Role::Admin)).unwrap();

        let router = hub.router.clone();
        wait_until(|| {
            let router = router.clone();
            async move { router.recipients_for_vehicle("BUS-007").await.len() == 1 }
        })
        .await;
        assert_eq!(admin.status(), ConnectionStatus::Connected);

        let student = ChannelClient::open(Arc::new(WsTransport::new(url)), ReconnectPolicy::default());
        student
            .publish(ClientEvent::SosTrigger(SosTrigger {
                user_id: "u9".to_string(),
                bus_id: "BUS-007".to_string(),
                message: Some("Help".to_string()),
            }))
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ServerEvent::SosAlert(sos) => {
                assert_eq!(sos.bus_id, "BUS-007");
                assert_eq!(sos.message, "Help");
            }
            other => panic!("unexpected {:?}", other),
        }

        student.close().await;
        admin.close().await;
    }
}
