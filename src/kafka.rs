use crate::config::AppConfig;
use crate::processor::message_processor::DeviceLanes;
use crate::state::Hub;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Reports queued per device lane before the consumer waits.
const LANE_CAPACITY: usize = 64;

fn consumer_config(config: &AppConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        .set("group.id", &config.kafka_group_id)
        .set("auto.offset.reset", &config.kafka_auto_offset_reset)
        .set("security.protocol", &config.kafka_security_protocol);

    // SASL only when the protocol asks for it
    if config.kafka_security_protocol.to_uppercase().starts_with("SASL") {
        client_config
            .set("sasl.mechanism", &config.kafka_sasl_mechanism)
            .set("sasl.username", &config.kafka_username)
            .set("sasl.password", &config.kafka_password);
    }
    client_config
}

/// Consumes device location payloads and feeds them through the hub, with a
/// circuit breaker that pauses consumption after repeated broker errors.
/// Payloads of one device are processed in the order they were consumed.
pub async fn start_kafka_consumer(hub: Arc<Hub>) -> anyhow::Result<()> {
    let config = &hub.config;
    info!("Initializing Kafka consumer for topic: {}", config.kafka_topic);

    let consumer: StreamConsumer = consumer_config(config).create()?;
    consumer.subscribe(&[&config.kafka_topic])?;
    info!("Subscribed to topic: {}", config.kafka_topic);

    let lanes = DeviceLanes::spawn(hub.clone(), config.kafka_device_lanes, LANE_CAPACITY);

    let mut consecutive_failures = 0;
    let max_retries = config.kafka_max_retries;
    let cooldown_duration = Duration::from_secs(config.kafka_circuit_breaker_cooldown);

    loop {
        if consecutive_failures >= max_retries {
            warn!(
                "Circuit breaker tripped ({} consecutive failures)! Sleeping for {} seconds...",
                consecutive_failures, config.kafka_circuit_breaker_cooldown
            );
            tokio::time::sleep(cooldown_duration).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset. Resuming consumption.");
        }

        // copy out so the borrowed message is not held across the dispatch
        let received = consumer.recv().await.map(|m| m.payload().map(<[u8]>::to_vec));
        match received {
            Ok(payload) => {
                consecutive_failures = 0;

                match payload {
                    None => warn!("Received empty payload from Kafka"),
                    Some(payload) => lanes.dispatch(&payload).await,
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    "Kafka error: {}. Failure count ({} / {})",
                    e, consecutive_failures, max_retries
                );
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}
