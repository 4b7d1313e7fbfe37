use anyhow::Result;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::attendance::TOKEN_TTL_MS;
use crate::models::location::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub store_backend: StoreBackend,
    pub database_url: String,
    pub db_max_connections: u32,
    pub kafka_enabled: bool,
    pub kafka_bootstrap_servers: String,
    pub kafka_topic: String,
    pub kafka_group_id: String,
    pub kafka_auto_offset_reset: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_security_protocol: String,
    pub kafka_max_retries: u32,
    pub kafka_circuit_breaker_cooldown: u64,
    pub kafka_device_lanes: usize,
    pub attendance_token_ttl_ms: i64,
    pub sos_location_timeout_ms: u64,
    pub sos_fallback_lat: f64,
    pub sos_fallback_lng: f64,
    pub connection_buffer: usize,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Ok(Self::from_lookup(|key| env::var(key).ok()))
    }

    /// Builds the config from any key lookup; missing or unparseable values
    /// take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let db_host = text("DB_HOST", "localhost");
        let db_port = text("DB_PORT", "5432");
        let db_name = text("DB_DATABASE", "fleet");
        let db_user = text("DB_USER", "fleet");
        let db_pwd = text("DB_PWD", "fleet");

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let store_backend = match text("STORE_BACKEND", "memory").to_lowercase().as_str() {
            "postgres" => StoreBackend::Postgres,
            _ => StoreBackend::Memory,
        };

        Self {
            bind_addr: text("BIND_ADDR", "0.0.0.0:8080"),
            store_backend,
            database_url,
            db_max_connections: parse_or(&text("DB_MAX_CONNECTIONS", "50"), 50),
            kafka_enabled: parse_or(&text("KAFKA_ENABLED", "false"), false),
            kafka_bootstrap_servers: text("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
            kafka_topic: text("KAFKA_TOPIC", "fleet-locations"),
            kafka_group_id: text("KAFKA_GROUP_ID", "fleet-events-consumer"),
            kafka_auto_offset_reset: text("KAFKA_AUTO_OFFSET_RESET", "latest"),
            kafka_sasl_mechanism: text("KAFKA_SASL_MECHANISM", "SCRAM-SHA-256"),
            kafka_username: text("KAFKA_USERNAME", ""),
            kafka_password: text("KAFKA_PASSWORD", ""),
            kafka_security_protocol: text("KAFKA_SECURITY_PROTOCOL", "PLAINTEXT"),
            kafka_max_retries: parse_or(&text("KAFKA_MAX_RETRIES", "5"), 5),
            kafka_circuit_breaker_cooldown: parse_or(&text("KAFKA_CIRCUIT_BREAKER_COOLDOWN", "300"), 300),
            kafka_device_lanes: parse_or(&text("KAFKA_DEVICE_LANES", "8"), 8),
            attendance_token_ttl_ms: parse_or(&text("ATTENDANCE_TOKEN_TTL_MS", "300000"), TOKEN_TTL_MS),
            sos_location_timeout_ms: parse_or(&text("SOS_LOCATION_TIMEOUT_MS", "5000"), 5_000),
            sos_fallback_lat: parse_or(&text("SOS_FALLBACK_LAT", "0.0"), 0.0),
            sos_fallback_lng: parse_or(&text("SOS_FALLBACK_LNG", "0.0"), 0.0),
            connection_buffer: parse_or(&text("CONNECTION_BUFFER", "256"), 256),
            log_level: text("LOG_LEVEL", "info"),
        }
    }

    pub fn sos_location_timeout(&self) -> Duration {
        Duration::from_millis(self.sos_location_timeout_ms)
    }

    pub fn sos_fallback(&self) -> GeoPoint {
        GeoPoint::new(self.sos_fallback_lat, self.sos_fallback_lng)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_or<T: FromStr>(value: &str, default: T) -> T {
    value.trim().parse().unwrap_or(default)
}
