pub const SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS vehicles (
    id TEXT PRIMARY KEY,
    number TEXT NOT NULL,
    route TEXT NOT NULL DEFAULT '',
    capacity INT4 NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'INACTIVE',
    occupancy INT4 NOT NULL DEFAULT 0,
    last_lat FLOAT8,
    last_lng FLOAT8,
    last_speed FLOAT8,
    last_heading FLOAT8,
    last_report_ms INT8,
    last_updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS attendance_records (
    id UUID PRIMARY KEY,
    user_id TEXT NOT NULL,
    bus_id TEXT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL,
    session_id TEXT NOT NULL
);
"#,
    r#"
CREATE UNIQUE INDEX IF NOT EXISTS attendance_checked_in_once
    ON attendance_records (user_id, bus_id, session_id)
    WHERE status = 'checked-in';
"#,
    r#"
CREATE TABLE IF NOT EXISTS emergency_alerts (
    id UUID PRIMARY KEY,
    user_id TEXT NOT NULL,
    bus_id TEXT NOT NULL,
    message TEXT NOT NULL,
    resolved BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ NOT NULL,
    resolved_at TIMESTAMPTZ,
    lat FLOAT8,
    lng FLOAT8
);
"#,
];

/// Re-registering an id only refreshes its fleet configuration; live
/// position, status and the report clock are left alone.
pub const REGISTER_VEHICLE: &str = r#"
INSERT INTO vehicles (id, number, route, capacity, status, occupancy, last_updated_at)
VALUES ($1, $2, $3, $4, $5, 0, NOW())
ON CONFLICT (id) DO UPDATE
SET number = EXCLUDED.number,
    route = EXCLUDED.route,
    capacity = EXCLUDED.capacity,
    last_updated_at = NOW()
RETURNING id, number, route, capacity, status, occupancy, last_lat, last_lng, last_speed, last_heading, last_report_ms;
"#;

pub const SELECT_VEHICLE: &str = r#"
SELECT id, number, route, capacity, status, occupancy, last_lat, last_lng, last_speed, last_heading, last_report_ms
FROM vehicles WHERE id = $1;
"#;

pub const SELECT_VEHICLES: &str = r#"
SELECT id, number, route, capacity, status, occupancy, last_lat, last_lng, last_speed, last_heading, last_report_ms
FROM vehicles ORDER BY id;
"#;

/// Returns no row when the stored report is newer than the incoming one.
pub const RECORD_LOCATION: &str = r#"
INSERT INTO vehicles (id, number, last_lat, last_lng, last_speed, last_heading, last_report_ms, last_updated_at)
VALUES ($1, $1, $2, $3, $4, $5, $6, NOW())
ON CONFLICT (id) DO UPDATE
SET last_lat = EXCLUDED.last_lat,
    last_lng = EXCLUDED.last_lng,
    last_speed = EXCLUDED.last_speed,
    last_heading = EXCLUDED.last_heading,
    last_report_ms = EXCLUDED.last_report_ms,
    last_updated_at = NOW()
WHERE vehicles.last_report_ms IS NULL OR vehicles.last_report_ms <= EXCLUDED.last_report_ms
RETURNING id;
"#;

pub const UPDATE_VEHICLE_STATUS: &str = r#"
UPDATE vehicles
SET status = $2,
    last_updated_at = NOW()
WHERE id = $1
RETURNING id, number, route, capacity, status, occupancy, last_lat, last_lng, last_speed, last_heading, last_report_ms;
"#;

pub const SELECT_CHECKED_IN: &str = r#"
SELECT id, user_id, bus_id, timestamp, status, session_id
FROM attendance_records
WHERE user_id = $1 AND bus_id = $2 AND session_id = $3 AND status = 'checked-in'
LIMIT 1;
"#;

pub const INSERT_ATTENDANCE: &str = r#"
INSERT INTO attendance_records (id, user_id, bus_id, timestamp, status, session_id)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (user_id, bus_id, session_id) WHERE status = 'checked-in' DO NOTHING;
"#;

pub const SELECT_ATTENDANCE_FOR_USER: &str = r#"
SELECT id, user_id, bus_id, timestamp, status, session_id
FROM attendance_records
WHERE user_id = $1
ORDER BY timestamp;
"#;

pub const INSERT_ALERT: &str = r#"
INSERT INTO emergency_alerts (id, user_id, bus_id, message, resolved, created_at, resolved_at, lat, lng)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9);
"#;

pub const SELECT_ALERT: &str = r#"
SELECT id, user_id, bus_id, message, resolved, created_at, resolved_at, lat, lng
FROM emergency_alerts WHERE id = $1;
"#;

pub const SELECT_ALERTS: &str = r#"
SELECT id, user_id, bus_id, message, resolved, created_at, resolved_at, lat, lng
FROM emergency_alerts ORDER BY created_at DESC;
"#;

pub const RESOLVE_ALERT: &str = r#"
UPDATE emergency_alerts
SET resolved = true,
    resolved_at = $2
WHERE id = $1 AND resolved = false
RETURNING id, user_id, bus_id, message, resolved, created_at, resolved_at, lat, lng;
"#;
