//! 争议响应服务入口

use std::sync::Arc;

use chargeflow_shared::config::{AppConfig, RiskLookupMode};
use chargeflow_shared::database::Database;
use chargeflow_shared::dlq::{DlqConsumer, DlqProducer};
use chargeflow_shared::events::MerchantResolver;
use chargeflow_shared::kafka::KafkaProducer;
use chargeflow_shared::observability;
use chargeflow_shared::shutdown::Shutdown;
use dispute_responder::api::{self, AppState};
use dispute_responder::consumer::DisputeEventConsumer;
use dispute_responder::store::{PgRecommendationStore, RecommendationStore};
use dispute_responder::{
    DecisionPolicy, DisputeDecisionEngine, HttpRiskSource, RecommendationLookup, RiskResolver,
    RiskSource, StoreRiskSource,
};
use risk_engine::RiskLookup;
use risk_engine::store::{PgRiskStateStore, RiskStateStore};
use tokio::net::TcpListener;
use tracing::{error, info};

const SERVICE_NAME: &str = "dispute-responder";

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
        risk_lookup = ?config.risk_lookup.mode,
        "Starting {SERVICE_NAME}..."
    );

    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;

    let risk_store: Arc<dyn RiskStateStore> = Arc::new(PgRiskStateStore::new(db.pool().clone()));
    let risk_source: Arc<dyn RiskSource> = match config.risk_lookup.mode {
        RiskLookupMode::Store => Arc::new(StoreRiskSource::new(risk_store.clone())),
        RiskLookupMode::Http => Arc::new(HttpRiskSource::new(
            &config.risk_lookup.base_url,
            config.risk_lookup.request_timeout(),
        )?),
    };

    let recommendations: Arc<dyn RecommendationStore> =
        Arc::new(PgRecommendationStore::new(db.pool().clone()));
    let engine = Arc::new(DisputeDecisionEngine::new(
        RiskResolver::new(risk_source, config.risk_lookup.retry_policy()),
        recommendations.clone(),
        DecisionPolicy::from(&config.decision),
        MerchantResolver::new(config.risk.default_merchant_id.clone()),
    ));

    let producer = KafkaProducer::new(&config.kafka)?;
    let dead_letter = DlqProducer::new(
        producer.clone(),
        &config.kafka.topics.dead_letter,
        &config.service_name,
        config.consumer_retry.dlq_retry_policy(),
    );
    let consumer = DisputeEventConsumer::new(&config, engine.clone(), dead_letter)?;
    let dlq_consumer = DlqConsumer::new(&config, producer)?;

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();

    let app = api::router(AppState {
        recommendations: Arc::new(
            RecommendationLookup::new(recommendations).with_risk_store(risk_store.clone()),
        ),
        engine,
        risk: risk_engine::api::AppState {
            lookup: Arc::new(RiskLookup::new(risk_store)),
        },
    });
    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

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
            error!(error = %e, "争议事件消费者异常退出");
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
