//! 争议事件消费者

use std::sync::Arc;

use chargeflow_shared::config::AppConfig;
use chargeflow_shared::dlq::DlqProducer;
use chargeflow_shared::events::{AppEvent, EventHandler};
use chargeflow_shared::kafka::{ConsumerMessage, KafkaConsumer};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{DisputeError, Result};
use crate::processor::DisputeDecisionEngine;

/// 订阅争议 topic，逐条交给决策引擎
pub struct DisputeEventConsumer {
    consumer: KafkaConsumer,
    engine: Arc<DisputeDecisionEngine>,
    topic: String,
}

impl DisputeEventConsumer {
    pub fn new(
        config: &AppConfig,
        engine: Arc<DisputeDecisionEngine>,
        dead_letter: DlqProducer,
    ) -> Result<Self> {
        let consumer = KafkaConsumer::new(&config.kafka, None)?
            .with_retry_policy(config.consumer_retry.retry_policy())
            .with_dead_letter(dead_letter);

        Ok(Self {
            consumer,
            engine,
            topic: config.kafka.topics.disputes.clone(),
        })
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.consumer.subscribe(&[self.topic.as_str()])?;
        info!(topic = %self.topic, "争议事件消费者已启动");

        let engine = self.engine;
        self.consumer
            .start(shutdown, |msg| {
                let engine = engine.clone();
                async move { handle_message(&engine, &msg).await }
            })
            .await?;

        info!("争议事件消费者已停止");
        Ok(())
    }
}

pub async fn handle_message(engine: &DisputeDecisionEngine, msg: &ConsumerMessage) -> Result<()> {
    let event = AppEvent::from_slice(&msg.payload)?;

    debug!(
        event_id = %event.event_id(),
        event_type = %event.kind(),
        topic = %msg.topic,
        partition = msg.partition,
        offset = msg.offset,
        "收到争议事件"
    );

    if !engine.accepts().contains(&event.kind()) {
        return Err(DisputeError::UnsupportedEvent(event.kind()));
    }

    engine.handle(event).await
}
