use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::location::LocationReport;
use crate::error::DecodeError;

/// JSON message published by a tracking device.
#[derive(Debug, Deserialize)]
pub struct DeviceMessage {
    pub data: Data,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub uuid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Data {
    #[serde(rename = "ALERT")]
    pub alert: Option<String>,
    #[serde(rename = "GPS_DATETIME")]
    pub gps_datetime: Option<String>,
    #[serde(rename = "LATITUD", default, deserialize_with = "parse_f64_option")]
    pub latitude: Option<f64>,
    #[serde(rename = "LONGITUD", default, deserialize_with = "parse_f64_option")]
    pub longitude: Option<f64>,
    #[serde(rename = "SPEED", default, deserialize_with = "parse_f64_option")]
    pub speed: Option<f64>,
    #[serde(rename = "COURSE", default, deserialize_with = "parse_f64_option")]
    pub heading: Option<f64>,
    #[serde(rename = "DEVICE_ID")]
    pub device_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Metadata {
    #[serde(rename = "DEVICE_ID")]
    pub device_id: Option<String>,
    #[serde(flatten)]
    pub other: HashMap<String, Value>,
}

impl DeviceMessage {
    pub fn get_device_id(&self) -> Option<&String> {
        self.data
            .device_id
            .as_ref()
            .or(self.metadata.device_id.as_ref())
    }
}

/// Compact binary report for devices that speak protobuf.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceFrame {
    #[prost(string, tag = "1")]
    pub device_id: String,
    #[prost(double, optional, tag = "2")]
    pub latitude: Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub longitude: Option<f64>,
    #[prost(double, tag = "4")]
    pub speed: f64,
    #[prost(double, tag = "5")]
    pub heading: f64,
    #[prost(int64, tag = "6")]
    pub timestamp_ms: i64,
    #[prost(string, optional, tag = "7")]
    pub alert: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignition {
    On,
    Off,
}

impl Ignition {
    fn from_alert(alert: Option<&str>) -> Option<Self> {
        match alert.map(|a| a.trim().to_uppercase()).as_deref() {
            Some("ENGINE ON") => Some(Ignition::On),
            Some("ENGINE OFF") => Some(Ignition::Off),
            _ => None,
        }
    }
}

/// A device payload reduced to what the location pipeline needs.
///
/// `report` is `None` for frames sent without a GPS fix; those still carry
/// an ignition change, otherwise they are rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub bus_id: String,
    pub report: Option<LocationReport>,
    pub ignition: Option<Ignition>,
}

impl DeviceReport {
    /// JSON payloads start with `{`; anything else is treated as a
    /// protobuf [`DeviceFrame`].
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let first = payload.iter().find(|b| !b.is_ascii_whitespace());
        if first == Some(&b'{') {
            let message: DeviceMessage = serde_json::from_slice(payload)?;
            Self::from_json(message)
        } else {
            let frame = <DeviceFrame as prost::Message>::decode(payload)?;
            Self::from_frame(frame)
        }
    }

    fn from_json(message: DeviceMessage) -> Result<Self, DecodeError> {
        let device_id = message
            .get_device_id()
            .filter(|id| !id.trim().is_empty())
            .cloned()
            .ok_or(DecodeError::MissingDevice)?;

        let gps_datetime = message.data.gps_datetime.as_deref().unwrap_or("");
        let timestamp = NaiveDateTime::parse_from_str(gps_datetime, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(gps_datetime, "%Y-%m-%dT%H:%M:%S"))
            .map_err(|_| DecodeError::InvalidTimestamp(gps_datetime.to_string()))?;

        Self::assemble(
            device_id,
            message.data.latitude.zip(message.data.longitude),
            message.data.speed.unwrap_or(0.0),
            message.data.heading.unwrap_or(0.0),
            timestamp.and_utc().timestamp_millis(),
            Ignition::from_alert(message.data.alert.as_deref()),
        )
    }

    fn from_frame(frame: DeviceFrame) -> Result<Self, DecodeError> {
        if frame.device_id.trim().is_empty() {
            return Err(DecodeError::MissingDevice);
        }
        if frame.timestamp_ms <= 0 {
            return Err(DecodeError::InvalidTimestamp(frame.timestamp_ms.to_string()));
        }
        let ignition = Ignition::from_alert(frame.alert.as_deref());
        Self::assemble(
            frame.device_id,
            frame.latitude.zip(frame.longitude),
            frame.speed,
            frame.heading,
            frame.timestamp_ms,
            ignition,
        )
    }

    fn assemble(
        bus_id: String,
        coordinates: Option<(f64, f64)>,
        speed: f64,
        heading: f64,
        timestamp: i64,
        ignition: Option<Ignition>,
    ) -> Result<Self, DecodeError> {
        let report = coordinates.map(|(latitude, longitude)| LocationReport {
            bus_id: bus_id.clone(),
            latitude,
            longitude,
            speed,
            heading,
            timestamp,
        });
        if report.is_none() && ignition.is_none() {
            return Err(DecodeError::MissingCoordinates);
        }
        Ok(Self {
            bus_id,
            report,
            ignition,
        })
    }
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_parsing_string_encoded_payload() {
        let payload = r#"
        {
            "data": {
                "COURSE": "181.50",
                "DEVICE_ID": "BUS-002",
                "ENGINE_STATUS": "ON",
                "GPS_DATETIME": "2025-11-29 06:15:15",
                "LATITUD": "+20.652494",
                "LONGITUD": "-100.391404",
                "MSG_CLASS": "STATUS",
                "SATELLITES": "9",
                "SPEED": "28.00"
            },
            "metadata": {
                "BYTES": 188,
                "CLIENT_IP": "44.204.32.23",
                "RECEIVED_EPOCH": 1764398681920
            },
            "uuid": "d52b1454-d43d-50fa-99ca-79515c904162"
        }
        "#;

        let decoded = DeviceReport::decode(payload.as_bytes()).unwrap();
        assert_eq!(decoded.bus_id, "BUS-002");
        let report = decoded.report.unwrap();
        assert_eq!(report.bus_id, "BUS-002");
        assert_eq!(report.latitude, 20.652494);
        assert_eq!(report.longitude, -100.391404);
        assert_eq!(report.speed, 28.0);
        assert_eq!(report.heading, 181.5);
        assert_eq!(report.timestamp, 1_764_396_915_000);
        assert_eq!(decoded.ignition, None);
    }

    #[test]
    fn test_device_id_falls_back_to_metadata() {
        let payload = r#"{
            "data": {"GPS_DATETIME": "2025-11-29T06:15:15", "LATITUD": 1.5, "LONGITUD": 2.5, "ALERT": "Engine On"},
            "metadata": {"DEVICE_ID": "BUS-009"}
        }"#;
        let decoded = DeviceReport::decode(payload.as_bytes()).unwrap();
        assert_eq!(decoded.bus_id, "BUS-009");
        assert_eq!(decoded.ignition, Some(Ignition::On));
    }

    #[test]
    fn test_frame_without_gps_fix() {
        let heartbeat = r#"{"data": {"DEVICE_ID": "BUS-1", "GPS_DATETIME": "2025-11-29 06:15:15", "SPEED": "0"}}"#;
        assert!(matches!(
            DeviceReport::decode(heartbeat.as_bytes()),
            Err(DecodeError::MissingCoordinates)
        ));

        let half_fix = r#"{"data": {"DEVICE_ID": "BUS-1", "GPS_DATETIME": "2025-11-29 06:15:15", "LATITUD": "19.4"}}"#;
        assert!(matches!(
            DeviceReport::decode(half_fix.as_bytes()),
            Err(DecodeError::MissingCoordinates)
        ));

        let ignition_only = r#"{"data": {"DEVICE_ID": "BUS-1", "GPS_DATETIME": "2025-11-29 06:15:15", "ALERT": "Engine OFF"}}"#;
        let decoded = DeviceReport::decode(ignition_only.as_bytes()).unwrap();
        assert_eq!(decoded.bus_id, "BUS-1");
        assert_eq!(decoded.report, None);
        assert_eq!(decoded.ignition, Some(Ignition::Off));
    }

    #[test]
    fn test_rejects_missing_device_and_bad_datetime() {
        let no_device = r#"{"data": {"GPS_DATETIME": "2025-11-29 06:15:15"}}"#;
        assert!(matches!(
            DeviceReport::decode(no_device.as_bytes()),
            Err(DecodeError::MissingDevice)
        ));

        let bad_time = r#"{"data": {"DEVICE_ID": "BUS-1", "GPS_DATETIME": "yesterday"}}"#;
        assert!(matches!(
            DeviceReport::decode(bad_time.as_bytes()),
            Err(DecodeError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_protobuf_frame() {
        let frame = DeviceFrame {
            device_id: "BUS-004".to_string(),
            latitude: Some(19.43),
            longitude: Some(-99.13),
            speed: 42.0,
            heading: 270.0,
            timestamp_ms: 1_764_396_915_000,
            alert: Some("ENGINE OFF".to_string()),
        };
        let decoded = DeviceReport::decode(&frame.encode_to_vec()).unwrap();
        assert_eq!(decoded.bus_id, "BUS-004");
        assert_eq!(decoded.report.map(|r| r.speed), Some(42.0));
        assert_eq!(decoded.ignition, Some(Ignition::Off));
    }
}
