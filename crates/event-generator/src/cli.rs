//! CLI 参数定义
//!
//! 所有参数都可以通过环境变量覆盖，便于在 docker-compose 中直接配置。

use std::time::Duration;

use chargeflow_shared::kafka::topics;
use clap::Parser;

use crate::generator::GeneratorSettings;

/// 模拟上游的订单、支付、争议事件
#[derive(Parser, Debug)]
#[command(name = "event-generator")]
#[command(version, about = "风险管道事件模拟器")]
pub struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Kafka brokers 地址
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    pub kafka_brokers: String,

    #[arg(long, env = "TOPIC_ORDERS", default_value = topics::ORDERS)]
    pub topic_orders: String,

    #[arg(long, env = "TOPIC_PAYMENTS", default_value = topics::PAYMENTS)]
    pub topic_payments: String,

    #[arg(long, env = "TOPIC_DISPUTES", default_value = topics::DISPUTES)]
    pub topic_disputes: String,

    /// 每组事件的发送间隔（毫秒）
    #[arg(long, env = "EVENT_INTERVAL_MS", default_value = "5000")]
    pub interval_ms: u64,

    /// 发送的事件组数量，不指定则持续发送直到 Ctrl+C
    #[arg(short, long)]
    pub bundles: Option<u64>,

    /// 每组之后重发一条历史消息的概率
    #[arg(long, env = "DUPLICATE_RATE", default_value = "0.1")]
    pub duplicate_rate: f64,

    /// 交换订单与支付发送顺序的概率
    #[arg(long, env = "OUT_OF_ORDER_RATE", default_value = "0.2")]
    pub out_of_order_rate: f64,

    /// 支付金额偏离订单金额的概率
    #[arg(long, env = "AMOUNT_MISMATCH_RATE", default_value = "0.05")]
    pub amount_mismatch_rate: f64,

    #[arg(long)]
    pub no_duplicates: bool,

    #[arg(long)]
    pub no_out_of_order: bool,

    /// 写入信封的商户 ID，不指定则由下游归入默认商户
    #[arg(short, long, env = "MERCHANT_ID")]
    pub merchant_id: Option<String>,

    /// 随机种子，指定后事件内容可复现
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Cli {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn settings(&self) -> GeneratorSettings {
        GeneratorSettings {
            topic_orders: self.topic_orders.clone(),
            topic_payments: self.topic_payments.clone(),
            topic_disputes: self.topic_disputes.clone(),
            duplicate_rate: if self.no_duplicates {
                0.0
            } else {
                self.duplicate_rate
            },
            out_of_order_rate: if self.no_out_of_order {
                0.0
            } else {
                self.out_of_order_rate
            },
            amount_mismatch_rate: self.amount_mismatch_rate,
            merchant_id: self.merchant_id.clone(),
        }
    }
}
