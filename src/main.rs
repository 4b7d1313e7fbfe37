use fleet_events::config::{AppConfig, StoreBackend};
use fleet_events::state::Hub;
use fleet_events::store::Stores;
use fleet_events::{db, kafka, server};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting fleet event broker...");

    let stores = match config.store_backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Stores::in_memory()
        }
        StoreBackend::Postgres => {
            let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
            db::ensure_schema(&pool).await?;
            info!("Connected to database");
            Stores::postgres(pool)
        }
    };

    let hub = Hub::new(config, stores);

    if hub.config.kafka_enabled {
        let consumer_hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = kafka::start_kafka_consumer(consumer_hub).await {
                error!("Kafka consumer stopped: {}", e);
            }
        });
    }

    server::serve(hub).await
}
