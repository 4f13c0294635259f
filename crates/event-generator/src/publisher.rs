//! 事件发送
//!
//! `Emitter` 驱动生成器按间隔发送事件组，发送成功的消息进入重发缓冲区。
//! 单条发送失败只记录日志，不中断后续事件组。

use std::time::Duration;

use async_trait::async_trait;
use chargeflow_shared::error::PipelineError;
use chargeflow_shared::kafka::KafkaProducer;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::generator::{BundleGenerator, OutgoingMessage};

/// 消息发送接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PipelineError>;
}

#[async_trait]
impl Publisher for KafkaProducer {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PipelineError> {
        self.send(topic, key, payload).await.map(|_| ())
    }
}

/// 发送统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitStats {
    pub bundles: u64,
    pub sent: u64,
    pub duplicates: u64,
    pub swapped: u64,
    pub failed: u64,
}

pub struct Emitter<P, R> {
    publisher: P,
    generator: BundleGenerator<R>,
    stats: EmitStats,
}

impl<P: Publisher, R: Rng> Emitter<P, R> {
    pub fn new(publisher: P, generator: BundleGenerator<R>) -> Self {
        Self {
            publisher,
            generator,
            stats: EmitStats::default(),
        }
    }

    pub fn stats(&self) -> &EmitStats {
        &self.stats
    }

    /// 发送一组事件，之后按概率重发一条历史消息
    pub async fn emit_bundle(&mut self) -> Result<(), PipelineError> {
        let bundle = self.generator.next_bundle()?;
        self.stats.bundles += 1;
        if bundle.swapped {
            self.stats.swapped += 1;
        }

        for message in bundle.messages {
            if self.send(&message).await {
                self.generator.remember(message);
            }
        }

        if let Some(duplicate) = self.generator.maybe_duplicate() {
            debug!(topic = %duplicate.topic, key = %duplicate.key, "重发历史消息");
            if self.send(&duplicate).await {
                self.stats.duplicates += 1;
            }
        }

        debug!(
            order_id = %bundle.order_id,
            correlation_id = %bundle.correlation_id,
            swapped = bundle.swapped,
            "事件组已发送"
        );
        Ok(())
    }

    /// 按间隔发送，直到达到数量上限或收到关闭信号
    pub async fn run(
        &mut self,
        interval: Duration,
        limit: Option<u64>,
        mut shutdown: watch::Receiver<bool>,
    ) -> EmitStats {
        let mut ticker = tokio::time::interval(interval);

        loop {
            if limit.is_some_and(|n| self.stats.bundles >= n) {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.emit_bundle().await {
                        error!(error = %e, "事件组生成失败");
                    }
                }
                _ = shutdown.changed() => {
                    info!("收到关闭信号，停止发送");
                    break;
                }
            }
        }

        self.stats.clone()
    }

    async fn send(&mut self, message: &OutgoingMessage) -> bool {
        match self
            .publisher
            .publish(&message.topic, &message.key, &message.payload)
            .await
        {
            Ok(()) => {
                self.stats.sent += 1;
                true
            }
            Err(e) => {
                self.stats.failed += 1;
                error!(topic = %message.topic, key = %message.key, error = %e, "消息发送失败");
                false
            }
        }
    }
}
