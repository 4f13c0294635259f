//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息序列化、错误映射、位点提交和优雅关闭语义。
//!
//! 消费语义为至少一次：消息处理完成（成功、判定为坏消息或已转入死信队列）后才提交位点，
//! 进程中途退出时未提交的消息会被重新投递，由下游的幂等逻辑吸收重复。

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::config::KafkaConfig;
use crate::dlq::DlqProducer;
use crate::error::{PipelineError, Retryable};
use crate::events::AppEvent;
use crate::observability::tracing::{extract_from_headers, inject_to_headers};
use crate::retry::{RetryPolicy, retry_with_policy};

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 默认 topic 名称，可由配置覆盖
pub mod topics {
    pub const ORDERS: &str = "com.chargeflow.events.order.created";
    pub const PAYMENTS: &str = "com.chargeflow.events.payment.authorized";
    pub const DISPUTES: &str = "com.chargeflow.events.dispute.opened";
    pub const DEAD_LETTER_QUEUE: &str = "com.chargeflow.events.dlq";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let timestamp = msg.timestamp().to_millis();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp,
            headers,
        }
    }

    /// 将负载视为 UTF-8 字符串返回
    pub fn payload_str(&self) -> Result<&str, PipelineError> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| PipelineError::MalformedEvent(format!("负载非 UTF-8 编码: {e}")))
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, PipelineError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| PipelineError::MalformedEvent(format!("负载反序列化失败: {e}")))
    }

    /// 读取并解析指定 header
    pub fn header<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.headers.get(name).and_then(|v| v.parse().ok())
    }

    /// 日志中使用的消息标识：优先使用 key，否则用分区位点
    pub fn message_id(&self) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| format!("{}-{}-{}", self.topic, self.partition, self.offset))
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer` 并提供类型安全的 JSON 发送方法，
/// 可廉价 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// 开启幂等生产，broker 端按序去重，避免生产者重试引入额外的重复消息。
    pub fn new(config: &KafkaConfig) -> Result<Self, PipelineError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| PipelineError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }

    /// 发送原始字节消息
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), PipelineError> {
        self.send_with_headers(topic, key, payload, &HashMap::new())
            .await
    }

    /// 携带 header 发送，并自动注入当前追踪上下文
    pub async fn send_with_headers(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<(i32, i64), PipelineError> {
        let mut all_headers = headers.clone();
        inject_to_headers(&mut all_headers);

        let mut owned = OwnedHeaders::new();
        for (name, value) in &all_headers {
            owned = owned.insert(Header {
                key: name.as_str(),
                value: Some(value.as_str()),
            });
        }

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload)
            .headers(owned);

        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| PipelineError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64), PipelineError> {
        let payload = serde_json::to_vec(value)?;
        self.send(topic, key, &payload).await
    }

    /// 发送管道事件，以 orderId 作为分区键保证同一订单的事件有序
    pub async fn send_event(
        &self,
        topic: &str,
        event: &AppEvent,
    ) -> Result<(i32, i64), PipelineError> {
        let payload = event.to_vec()?;
        self.send(topic, event.order_id(), &payload).await
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 消费者
///
/// 封装 `StreamConsumer`，提供基于 `watch` channel 的优雅关闭、
/// 可重试错误的退避重试以及重试耗尽后的死信转发。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    retry_policy: RetryPolicy,
    dead_letter: Option<DlqProducer>,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `group_id_suffix` 允许同一服务内不同消费逻辑使用独立的消费组，
    /// 例如 "risk-engine-group" 和 "risk-engine-group.dlq"。
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, PipelineError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| PipelineError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self {
            consumer,
            retry_policy: RetryPolicy::no_retry(),
            dead_letter: None,
        })
    }

    /// 设置可重试错误的重试策略
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// 设置重试耗尽后的死信队列
    pub fn with_dead_letter(mut self, dlq: DlqProducer) -> Self {
        self.dead_letter = Some(dlq);
        self
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), PipelineError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| PipelineError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// 使用 `tokio::select!` 同时监听消息流和关闭信号：
    /// - 收到消息时完整处理后再提交位点，关闭信号不会打断正在处理的消息。
    /// - 不可重试的错误记录日志后提交，坏消息不会阻塞分区。
    /// - 可重试的错误按策略重试，耗尽后转入死信队列再提交。
    /// - 死信队列也写入失败时返回错误并停止循环，消息保持未提交以便重启后重新投递。
    pub async fn start<F, Fut, E>(
        self,
        mut shutdown: watch::Receiver<bool>,
        handler: F,
    ) -> Result<(), PipelineError>
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Retryable + Display,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        if *shutdown.borrow_and_update() {
            info!("启动前已收到关闭信号，Kafka 消费循环退出");
            return Ok(());
        }

        loop {
            tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    let msg = match msg_result {
                        Ok(borrowed_msg) => ConsumerMessage::from_borrowed(&borrowed_msg),
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                            continue;
                        }
                    };

                    let span = info_span!(
                        "kafka.message",
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                    );
                    let _ = span.set_parent(extract_from_headers(&msg.headers));

                    self.process_message(&msg, &handler).instrument(span).await?;
                    self.commit(&msg);
                }
            }
        }

        Ok(())
    }

    /// 处理单条消息，返回 Ok 表示可以提交位点
    async fn process_message<F, Fut, E>(
        &self,
        msg: &ConsumerMessage,
        handler: &F,
    ) -> Result<(), PipelineError>
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Retryable + Display,
    {
        debug!("收到 Kafka 消息");

        let result = retry_with_policy(
            &self.retry_policy,
            "kafka.handle_message",
            |e: &E| e.is_retryable(),
            || handler(msg.clone()),
        )
        .await;

        let err = match result {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if !err.is_retryable() {
            warn!(error = %err, "消息处理失败且不可重试，丢弃");
            return Ok(());
        }

        let Some(dlq) = &self.dead_letter else {
            error!(error = %err, "消息重试耗尽且未配置死信队列，停止消费");
            return Err(PipelineError::Internal(format!("消息处理失败: {err}")));
        };

        match dlq.send_message(msg, &err.to_string()).await {
            Ok(()) => Ok(()),
            Err(dlq_err) => {
                error!(
                    error = %err,
                    dlq_error = %dlq_err,
                    "写入死信队列失败，停止消费以保留未提交的消息"
                );
                Err(dlq_err)
            }
        }
    }

    /// 提交下一条待消费的位点
    ///
    /// 提交失败只记录日志：消息可能被再次投递，由下游幂等吸收。
    fn commit(&self, msg: &ConsumerMessage) {
        let mut tpl = TopicPartitionList::new();
        if let Err(e) =
            tpl.add_partition_offset(&msg.topic, msg.partition, Offset::Offset(msg.offset + 1))
        {
            warn!(error = %e, "构造提交位点失败");
            return;
        }

        if let Err(e) = self.consumer.commit(&tpl, CommitMode::Async) {
            warn!(
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                error = %e,
                "提交位点失败，消息可能被重复投递"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
