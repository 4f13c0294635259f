//! 风险引擎服务入口

use std::sync::Arc;

use chargeflow_shared::config::AppConfig;
use chargeflow_shared::database::Database;
use chargeflow_shared::dlq::{DlqConsumer, DlqProducer};
use chargeflow_shared::events::MerchantResolver;
use chargeflow_shared::kafka::KafkaProducer;
use chargeflow_shared::observability;
use chargeflow_shared::shutdown::Shutdown;
use risk_engine::api::{self, AppState};
use risk_engine::consumer::RiskEventConsumer;
use risk_engine::store::{PgRiskStateStore, RiskStateStore};
use risk_engine::{RiskCorrelationEngine, RiskLookup};
use tokio::net::TcpListener;
use tracing::{error, info};

const SERVICE_NAME: &str = "risk-engine";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        addr = %config.server_addr(),
        brokers = %config.kafka.brokers,
        "Starting {SERVICE_NAME}..."
    );

    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;

    let store: Arc<dyn RiskStateStore> = Arc::new(PgRiskStateStore::new(db.pool().clone()));
    let engine = Arc::new(RiskCorrelationEngine::new(
        store.clone(),
        MerchantResolver::new(config.risk.default_merchant_id.clone()),
        config.risk.ttl(),
    ));

    let producer = KafkaProducer::new(&config.kafka)?;
    let dead_letter = DlqProducer::new(
        producer.clone(),
        &config.kafka.topics.dead_letter,
        &config.service_name,
        config.consumer_retry.dlq_retry_policy(),
    );
    let consumer = RiskEventConsumer::new(&config, engine, dead_letter)?;
    let dlq_consumer = DlqConsumer::new(&config, producer)?;

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();

    let app = api::router(AppState {
        lookup: Arc::new(RiskLookup::new(store)),
    });
    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 任一组件退出都会广播关闭，避免进程半死不活
    let server = async {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().wait())
            .await;
        shutdown.trigger();
        result
    };
    let consumer_task = async {
        let result = consumer.run(shutdown.subscribe()).await;
        if let Err(e) = &result {
            error!(error = %e, "风险事件消费者异常退出");
        }
        shutdown.trigger();
        result
    };
    let dlq_task = async {
        let result = dlq_consumer.run(shutdown.subscribe()).await;
        if let Err(e) = &result {
            error!(error = %e, "DLQ 消费者异常退出");
        }
        shutdown.trigger();
        result
    };

    let (server_result, consumer_result, dlq_result) =
        tokio::join!(server, consumer_task, dlq_task);

    db.close().await;
    info!("{SERVICE_NAME} shutdown complete");

    server_result?;
    consumer_result?;
    dlq_result?;
    Ok(())
}
