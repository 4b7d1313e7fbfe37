use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::location::{GeoPoint, LocationReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    Active,
    Inactive,
    Maintenance,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Active => "ACTIVE",
            VehicleStatus::Inactive => "INACTIVE",
            VehicleStatus::Maintenance => "MAINTENANCE",
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(VehicleStatus::Active),
            "INACTIVE" => Ok(VehicleStatus::Inactive),
            "MAINTENANCE" => Ok(VehicleStatus::Maintenance),
            other => Err(format!("unknown vehicle status '{}'", other)),
        }
    }
}

/// One bus and its last-known state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    pub number: String,
    pub route: String,
    pub capacity: u32,
    pub status: VehicleStatus,
    pub occupancy: u32,
    pub location: Option<GeoPoint>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    /// Device timestamp (epoch ms) of the report behind `location`.
    pub last_report_at: Option<i64>,
}

impl Vehicle {
    pub fn new(id: impl Into<String>, number: impl Into<String>, route: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            number: number.into(),
            route: route.into(),
            capacity,
            status: VehicleStatus::Inactive,
            occupancy: 0,
            location: None,
            speed: None,
            heading: None,
            last_report_at: None,
        }
    }

    /// Entry for a vehicle first seen through a device report rather than
    /// fleet configuration.
    pub fn unregistered(id: &str) -> Self {
        Self::new(id, id, "", 0)
    }

    /// Overwrites the last-known location unless `report` is older than the
    /// one already applied. Returns `false` for a stale report.
    pub fn apply_report(&mut self, report: &LocationReport) -> bool {
        if let Some(last) = self.last_report_at {
            if report.timestamp < last {
                return false;
            }
        }
        self.location = Some(report.point());
        self.speed = Some(report.speed);
        self.heading = Some(report.heading);
        self.last_report_at = Some(report.timestamp);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_at(ts: i64, lat: f64) -> LocationReport {
        LocationReport {
            bus_id: "BUS-001".to_string(),
            latitude: lat,
            longitude: 10.0,
            speed: 12.0,
            heading: 90.0,
            timestamp: ts,
        }
    }

    #[test]
    fn stale_report_does_not_overwrite() {
        let mut v = Vehicle::new("BUS-001", "1", "North Loop", 40);
        assert!(v.apply_report(&report_at(2_000, 1.0)));
        assert!(!v.apply_report(&report_at(1_000, 2.0)));
        assert_eq!(v.location, Some(GeoPoint::new(1.0, 10.0)));
        assert_eq!(v.last_report_at, Some(2_000));
    }

    #[test]
    fn equal_timestamp_is_last_write_wins() {
        let mut v = Vehicle::unregistered("BUS-001");
        v.apply_report(&report_at(5_000, 1.0));
        assert!(v.apply_report(&report_at(5_000, 3.0)));
        assert_eq!(v.location.map(|p| p.latitude), Some(3.0));
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("maintenance".parse::<VehicleStatus>(), Ok(VehicleStatus::Maintenance));
        assert!("parked".parse::<VehicleStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&VehicleStatus::Active).unwrap(),
            "\"ACTIVE\""
        );
    }
}
