use serde::{Deserialize, Serialize};

use crate::error::LocationError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn validate(&self) -> Result<(), LocationError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(LocationError::InvalidLatitude(self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(LocationError::InvalidLongitude(self.longitude));
        }
        Ok(())
    }
}

/// A single position sample from a vehicle's device. `timestamp` is epoch
/// milliseconds as reported by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    pub bus_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub heading: f64,
    pub timestamp: i64,
}

impl LocationReport {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    pub fn validate(&self) -> Result<(), LocationError> {
        if self.bus_id.trim().is_empty() {
            return Err(LocationError::MissingVehicle);
        }
        // NaN fails both range checks
        self.point().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(lat: f64, lng: f64) -> LocationReport {
        LocationReport {
            bus_id: "BUS-001".to_string(),
            latitude: lat,
            longitude: lng,
            speed: 0.0,
            heading: 0.0,
            timestamp: 0,
        }
    }

    #[test]
    fn accepts_boundaries() {
        assert!(report(90.0, 180.0).validate().is_ok());
        assert!(report(-90.0, -180.0).validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(
            report(90.1, 0.0).validate(),
            Err(LocationError::InvalidLatitude(_))
        ));
        assert!(matches!(
            report(0.0, -180.5).validate(),
            Err(LocationError::InvalidLongitude(_))
        ));
        assert!(report(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn rejects_blank_vehicle() {
        let mut r = report(1.0, 1.0);
        r.bus_id = "  ".to_string();
        assert!(matches!(r.validate(), Err(LocationError::MissingVehicle)));
    }
}
