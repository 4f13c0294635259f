//! Kafka 消费者与事件分发
//!
//! 订阅订单与支付两个 topic，将消息解码为 `AppEvent` 后交给风险关联引擎。
//! 位点提交、重试与死信转发由共享的 `KafkaConsumer` 负责。

use std::sync::Arc;

use chargeflow_shared::config::AppConfig;
use chargeflow_shared::dlq::DlqProducer;
use chargeflow_shared::events::{AppEvent, EventHandler};
use chargeflow_shared::kafka::{ConsumerMessage, KafkaConsumer};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{Result, RiskError};
use crate::processor::RiskCorrelationEngine;

/// 风险事件消费者
pub struct RiskEventConsumer {
    consumer: KafkaConsumer,
    engine: Arc<RiskCorrelationEngine>,
    topics: Vec<String>,
}

impl RiskEventConsumer {
    pub fn new(
        config: &AppConfig,
        engine: Arc<RiskCorrelationEngine>,
        dead_letter: DlqProducer,
    ) -> Result<Self> {
        let consumer = KafkaConsumer::new(&config.kafka, None)?
            .with_retry_policy(config.consumer_retry.retry_policy())
            .with_dead_letter(dead_letter);

        Ok(Self {
            consumer,
            engine,
            topics: vec![
                config.kafka.topics.orders.clone(),
                config.kafka.topics.payments.clone(),
            ],
        })
    }

    /// 启动消费循环，直到收到关闭信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;
        info!(?topics, "风险事件消费者已启动");

        let engine = self.engine;
        self.consumer
            .start(shutdown, |msg| {
                let engine = engine.clone();
                async move { handle_message(&engine, &msg).await }
            })
            .await?;

        info!("风险事件消费者已停止");
        Ok(())
    }
}

/// 处理单条 Kafka 消息：解码 -> 类型校验 -> 关联
pub async fn handle_message(engine: &RiskCorrelationEngine, msg: &ConsumerMessage) -> Result<()> {
    let event = AppEvent::from_slice(&msg.payload)?;

    debug!(
        event_id = %event.event_id(),
        event_type = %event.kind(),
        topic = %msg.topic,
        "收到风险事件"
    );

    if !engine.accepts().contains(&event.kind()) {
        return Err(RiskError::UnsupportedEvent(event.kind()));
    }

    engine.handle(event).await
}
