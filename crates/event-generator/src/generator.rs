//! 事件组生成
//!
//! 每组包含同一订单的订单创建、支付授权、争议发起三条事件，共享一个关联 ID。
//! 按概率交换订单与支付的发送顺序，并从最近发送的消息中挑选重发，
//! 模拟真实总线上的乱序与重复投递。

use std::collections::VecDeque;

use chargeflow_shared::error::PipelineError;
use chargeflow_shared::events::{
    AppEvent, DisputeOpened, DisputeReasonCode, Envelope, OrderCreated, PaymentAuthorized,
};
use rand::Rng;
use rand::seq::IndexedRandom;
use uuid::Uuid;

/// 信封 source 字段
pub const SOURCE: &str = "com.chargeflow.event-generator";

/// 最近消息缓冲区容量
pub const RECENT_CAPACITY: usize = 50;

const EMAILS: &[&str] = &[
    "alice@gmail.com",
    "bob@corp.example",
    "fraudster@mailinator.com",
    "user@outlook.com",
];

const COUNTRIES: &[&str] = &["US", "CA", "GB", "FR", "DE"];

const REASONS: &[DisputeReasonCode] = &[
    DisputeReasonCode::Fraud,
    DisputeReasonCode::NotReceived,
    DisputeReasonCode::Duplicate,
];

/// 生成器参数
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub topic_orders: String,
    pub topic_payments: String,
    pub topic_disputes: String,
    pub duplicate_rate: f64,
    pub out_of_order_rate: f64,
    /// 支付金额偏离订单金额的概率，其余情况两者一致
    pub amount_mismatch_rate: f64,
    pub merchant_id: Option<String>,
}

/// 待发送的消息，key 为订单 ID
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

impl OutgoingMessage {
    fn from_event(topic: &str, event: &AppEvent) -> Result<Self, PipelineError> {
        Ok(Self {
            topic: topic.to_string(),
            key: event.order_id().to_string(),
            payload: event.to_vec()?,
        })
    }
}

/// 一组事件
#[derive(Debug, Clone)]
pub struct Bundle {
    pub correlation_id: Uuid,
    pub order_id: String,
    /// 是否交换了订单与支付的顺序
    pub swapped: bool,
    pub messages: Vec<OutgoingMessage>,
}

/// 固定容量的最近消息缓冲区，满时淘汰最旧的一条
#[derive(Debug)]
pub struct RecentMessages {
    buffer: VecDeque<OutgoingMessage>,
    capacity: usize,
}

impl RecentMessages {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, message: OutgoingMessage) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn pick<R: Rng>(&self, rng: &mut R) -> Option<&OutgoingMessage> {
        if self.buffer.is_empty() {
            return None;
        }
        self.buffer.get(rng.random_range(0..self.buffer.len()))
    }
}

/// 事件组生成器
pub struct BundleGenerator<R> {
    settings: GeneratorSettings,
    rng: R,
    recent: RecentMessages,
}

impl<R: Rng> BundleGenerator<R> {
    pub fn new(settings: GeneratorSettings, rng: R) -> Self {
        Self {
            settings,
            rng,
            recent: RecentMessages::new(RECENT_CAPACITY),
        }
    }

    pub fn recent(&self) -> &RecentMessages {
        &self.recent
    }

    /// 生成下一组事件，按发送顺序排列
    pub fn next_bundle(&mut self) -> Result<Bundle, PipelineError> {
        let correlation_id = Uuid::new_v4();
        let order_id = format!("ord_{:08x}", self.rng.random::<u32>());

        let amount = self.amount();
        let amount_mismatch_rate = self.settings.amount_mismatch_rate;
        let authorized = if self.chance(amount_mismatch_rate) {
            self.mismatched_amount(amount)
        } else {
            amount
        };

        let order = self.order_event(&order_id, amount, correlation_id);
        let payment = self.payment_event(&order_id, authorized, correlation_id);
        let dispute = self.dispute_event(&order_id, amount, correlation_id);

        let mut messages = vec![
            OutgoingMessage::from_event(&self.settings.topic_orders, &order)?,
            OutgoingMessage::from_event(&self.settings.topic_payments, &payment)?,
            OutgoingMessage::from_event(&self.settings.topic_disputes, &dispute)?,
        ];

        let out_of_order_rate = self.settings.out_of_order_rate;
        let swapped = self.chance(out_of_order_rate);
        if swapped {
            messages.swap(0, 1);
        }

        Ok(Bundle {
            correlation_id,
            order_id,
            swapped,
            messages,
        })
    }

    /// 记录一条已成功发送的消息
    pub fn remember(&mut self, message: OutgoingMessage) {
        self.recent.push(message);
    }

    /// 按重复概率挑选一条历史消息重发
    pub fn maybe_duplicate(&mut self) -> Option<OutgoingMessage> {
        let duplicate_rate = self.settings.duplicate_rate;
        if self.recent.is_empty() || !self.chance(duplicate_rate) {
            return None;
        }
        self.recent.pick(&mut self.rng).cloned()
    }

    fn chance(&mut self, probability: f64) -> bool {
        self.rng.random_bool(probability.clamp(0.0, 1.0))
    }

    fn amount(&mut self) -> f64 {
        let raw: f64 = self.rng.random_range(5.0..205.0);
        (raw * 100.0).round() / 100.0
    }

    /// 偏离至少 1 元，保证触发金额不符信号
    fn mismatched_amount(&mut self, amount: f64) -> f64 {
        let delta: f64 = self.rng.random_range(1.0..20.0);
        ((amount + delta) * 100.0).round() / 100.0
    }

    fn pick<T: Copy>(&mut self, items: &[T]) -> T {
        // 候选列表均为非空常量
        *items.choose(&mut self.rng).unwrap_or(&items[0])
    }

    fn envelope<T>(&self, data: T, correlation_id: Uuid) -> Envelope<T> {
        let envelope = Envelope::new(SOURCE, data).with_correlation_id(correlation_id);
        match &self.settings.merchant_id {
            Some(merchant_id) => envelope.with_merchant_id(merchant_id.clone()),
            None => envelope,
        }
    }

    fn order_event(&mut self, order_id: &str, amount: f64, correlation_id: Uuid) -> AppEvent {
        let data = OrderCreated {
            order_id: order_id.to_string(),
            transaction_id: format!("txn_{:08x}", self.rng.random::<u32>()),
            amount,
            currency: "USD".to_string(),
            email: self.pick(EMAILS).to_string(),
            billing_country: self.pick(COUNTRIES).to_string(),
        };
        self.envelope(data, correlation_id).into()
    }

    fn payment_event(&mut self, order_id: &str, amount: f64, correlation_id: Uuid) -> AppEvent {
        let data = PaymentAuthorized {
            order_id: order_id.to_string(),
            payment_id: format!("pay_{:08x}", self.rng.random::<u32>()),
            amount,
            currency: "USD".to_string(),
            bin_country: self.pick(COUNTRIES).to_string(),
        };
        self.envelope(data, correlation_id).into()
    }

    fn dispute_event(&mut self, order_id: &str, amount: f64, correlation_id: Uuid) -> AppEvent {
        let data = DisputeOpened {
            order_id: order_id.to_string(),
            reason_code: self.pick(REASONS),
            amount,
            note: Some("customer says no".to_string()),
        };
        self.envelope(data, correlation_id).into()
    }
}
