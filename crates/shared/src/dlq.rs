//! 死信队列处理
//!
//! 当消息处理遇到可重试错误且消费端重试耗尽后，消息会被发送到死信队列（DLQ）。
//! DLQ 消费者在到达下次重试时间后将原始消息发回来源 topic，超过上限后记录日志等待人工介入。
//! 重新投递的次数通过消息 header 携带，消息再次失败时据此累加。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::kafka::{ConsumerMessage, KafkaConsumer, KafkaProducer};
use crate::retry::RetryPolicy;

/// 记录消息已被 DLQ 重新投递次数的 header
pub const RETRY_COUNT_HEADER: &str = "x-dlq-retry-count";

// ---------------------------------------------------------------------------
// DeadLetterMessage：死信消息信封
// ---------------------------------------------------------------------------

/// 死信消息信封
///
/// 包装原始消息，附加失败原因、重试次数等元数据。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始消息标识（分区键）
    pub message_id: String,
    /// 原始 topic
    pub source_topic: String,
    /// 原始消息内容
    pub payload: String,
    /// 失败原因
    pub error: String,
    /// 已重新投递次数
    pub retry_count: u32,
    /// 最大重新投递次数
    pub max_retries: u32,
    /// 首次失败时间
    pub first_failed_at: DateTime<Utc>,
    /// 最近失败时间
    pub last_failed_at: DateTime<Utc>,
    /// 下次重试时间（None 表示不再重试）
    pub next_retry_at: Option<DateTime<Utc>>,
    /// 来源服务
    pub source_service: String,
}

impl DeadLetterMessage {
    /// 创建死信消息
    ///
    /// `retry_count` 为该消息此前已被重新投递的次数，据此计算下次重试时间。
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_id: impl Into<String>,
        source_topic: impl Into<String>,
        payload: impl Into<String>,
        error: impl Into<String>,
        retry_count: u32,
        source_service: impl Into<String>,
        retry_policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let mut msg = Self {
            message_id: message_id.into(),
            source_topic: source_topic.into(),
            payload: payload.into(),
            error: error.into(),
            retry_count,
            max_retries: retry_policy.max_retries,
            first_failed_at: now,
            last_failed_at: now,
            next_retry_at: None,
            source_service: source_service.into(),
        };
        msg.schedule(retry_policy);
        msg
    }

    /// 是否应继续重试
    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 按退避策略安排下次重试
    fn schedule(&mut self, retry_policy: &RetryPolicy) {
        self.next_retry_at = if self.should_retry() {
            let delay = retry_policy.delay_for_attempt(self.retry_count);
            Some(self.last_failed_at + chrono::Duration::from_std(delay).unwrap_or_default())
        } else {
            None
        };
    }

    /// 距离下次重试还需等待的时间
    pub fn wait_before_retry(&self, now: DateTime<Utc>) -> std::time::Duration {
        self.next_retry_at
            .and_then(|at| (at - now).to_std().ok())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// DlqProducer：将失败消息发送到死信队列
// ---------------------------------------------------------------------------

/// DLQ 生产者
#[derive(Clone)]
pub struct DlqProducer {
    producer: KafkaProducer,
    dlq_topic: String,
    source_service: String,
    retry_policy: RetryPolicy,
}

impl DlqProducer {
    pub fn new(
        producer: KafkaProducer,
        dlq_topic: &str,
        source_service: &str,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            producer,
            dlq_topic: dlq_topic.to_string(),
            source_service: source_service.to_string(),
            retry_policy,
        }
    }

    /// 将消费失败的消息发送到死信队列
    pub async fn send_message(
        &self,
        msg: &ConsumerMessage,
        error: &str,
    ) -> Result<(), PipelineError> {
        let retry_count = msg.header::<u32>(RETRY_COUNT_HEADER).unwrap_or(0);
        let payload = String::from_utf8_lossy(&msg.payload).into_owned();

        self.send_to_dlq(&msg.message_id(), &msg.topic, &payload, error, retry_count)
            .await
    }

    /// 构造死信消息并发送
    pub async fn send_to_dlq(
        &self,
        message_id: &str,
        source_topic: &str,
        payload: &str,
        error: &str,
        retry_count: u32,
    ) -> Result<(), PipelineError> {
        let dlq_msg = DeadLetterMessage::new(
            message_id,
            source_topic,
            payload,
            error,
            retry_count,
            &self.source_service,
            &self.retry_policy,
            Utc::now(),
        );

        self.producer
            .send_json(&self.dlq_topic, message_id, &dlq_msg)
            .await?;

        tracing::warn!(message_id, source_topic, error, retry_count, "消息已发送到死信队列");

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DlqConsumer：处理死信队列消息
// ---------------------------------------------------------------------------

/// DLQ 消费者
///
/// 每个服务各自运行一个，只处理本服务产生的死信。
pub struct DlqConsumer {
    consumer: KafkaConsumer,
    retry_producer: KafkaProducer,
    source_service: String,
}

impl DlqConsumer {
    /// 创建 DLQ 消费者
    ///
    /// 使用 `.dlq` 后缀作为独立消费组，与业务消费者互不干扰
    pub fn new(config: &AppConfig, retry_producer: KafkaProducer) -> Result<Self, PipelineError> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("dlq"))?
            .with_retry_policy(config.consumer_retry.retry_policy());
        consumer.subscribe(&[config.kafka.topics.dead_letter.as_str()])?;

        info!(
            topic = %config.kafka.topics.dead_letter,
            service = %config.service_name,
            "DLQ 消费者已创建"
        );

        Ok(Self {
            consumer,
            retry_producer,
            source_service: config.service_name.clone(),
        })
    }

    /// 启动 DLQ 消费循环
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        let retry_producer = self.retry_producer;
        let source_service = self.source_service;

        self.consumer
            .start(shutdown, |msg| {
                let producer = retry_producer.clone();
                let service = source_service.clone();
                async move { handle_dlq_message(&msg, &producer, &service).await }
            })
            .await?;

        info!("DLQ 消费循环已退出");
        Ok(())
    }
}

/// 处理单条死信消息
///
/// - 非本服务产生的死信直接跳过
/// - 仍可重试：等待到达重试时间后发回 source_topic，并累加重投次数 header
/// - 已耗尽：记录错误日志，需人工介入
async fn handle_dlq_message(
    msg: &ConsumerMessage,
    retry_producer: &KafkaProducer,
    source_service: &str,
) -> Result<(), PipelineError> {
    let dlq_msg: DeadLetterMessage = msg.deserialize_payload()?;

    if dlq_msg.source_service != source_service {
        return Ok(());
    }

    if !dlq_msg.should_retry() {
        error!(
            message_id = %dlq_msg.message_id,
            source_topic = %dlq_msg.source_topic,
            source_service = %dlq_msg.source_service,
            retry_count = dlq_msg.retry_count,
            max_retries = dlq_msg.max_retries,
            first_failed_at = %dlq_msg.first_failed_at,
            last_failed_at = %dlq_msg.last_failed_at,
            error = %dlq_msg.error,
            "死信消息已耗尽重试次数，需人工介入"
        );
        return Ok(());
    }

    let wait = dlq_msg.wait_before_retry(Utc::now());
    if !wait.is_zero() {
        tokio::time::sleep(wait).await;
    }

    info!(
        message_id = %dlq_msg.message_id,
        source_topic = %dlq_msg.source_topic,
        retry_count = dlq_msg.retry_count,
        max_retries = dlq_msg.max_retries,
        "重试死信消息，发回原始 topic"
    );

    let headers = HashMap::from([(
        RETRY_COUNT_HEADER.to_string(),
        (dlq_msg.retry_count + 1).to_string(),
    )]);

    retry_producer
        .send_with_headers(
            &dlq_msg.source_topic,
            &dlq_msg.message_id,
            dlq_msg.payload.as_bytes(),
            &headers,
        )
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
