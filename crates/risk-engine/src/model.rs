//! 风险状态模型
//!
//! `RiskState` 以 (merchant_id, order_id) 为键，累积订单与支付两类事实。
//! 子分数每次合并后都从已到达的上下文整体重算，因此最终结果与事件到达顺序无关；
//! 已应用的事件 ID 记录在状态中，重复投递不会重复计分。

use std::collections::BTreeMap;
use std::fmt;

use chargeflow_shared::events::{Envelope, OrderCreated, PaymentAuthorized};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scoring;

/// 风险状态完整度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskStatus {
    /// 订单或支付只到达其一
    Partial,
    /// 订单与支付均已到达
    Complete,
}

impl RiskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Partial => "PARTIAL",
            Self::Complete => "COMPLETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PARTIAL" => Some(Self::Partial),
            "COMPLETE" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl fmt::Display for RiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 订单侧上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderContext {
    pub event_id: Uuid,
    pub transaction_id: String,
    pub amount: f64,
    pub currency: String,
    pub email_domain: String,
    pub billing_country: String,
}

impl From<&Envelope<OrderCreated>> for OrderContext {
    fn from(envelope: &Envelope<OrderCreated>) -> Self {
        Self {
            event_id: envelope.id,
            transaction_id: envelope.data.transaction_id.clone(),
            amount: envelope.data.amount,
            currency: envelope.data.currency.to_ascii_uppercase(),
            email_domain: envelope.data.email_domain(),
            billing_country: envelope.data.billing_country.to_ascii_uppercase(),
        }
    }
}

/// 支付侧上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentContext {
    pub event_id: Uuid,
    pub payment_id: String,
    pub amount: f64,
    pub currency: String,
    pub bin_country: String,
}

impl From<&Envelope<PaymentAuthorized>> for PaymentContext {
    fn from(envelope: &Envelope<PaymentAuthorized>) -> Self {
        Self {
            event_id: envelope.id,
            payment_id: envelope.data.payment_id.clone(),
            amount: envelope.data.amount,
            currency: envelope.data.currency.to_ascii_uppercase(),
            bin_country: envelope.data.bin_country.to_ascii_uppercase(),
        }
    }
}

/// 单个事件对风险状态的贡献
#[derive(Debug, Clone, PartialEq)]
pub enum Contribution {
    Order(OrderContext),
    Payment(PaymentContext),
}

impl Contribution {
    pub fn event_id(&self) -> Uuid {
        match self {
            Self::Order(ctx) => ctx.event_id,
            Self::Payment(ctx) => ctx.event_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Order(_) => "order.created",
            Self::Payment(_) => "payment.authorized",
        }
    }
}

/// 合并结果
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// 事件已应用，携带合并后的状态
    Applied(RiskState),
    /// 事件此前已应用，状态未变
    Duplicate(RiskState),
}

impl MergeOutcome {
    pub fn state(&self) -> &RiskState {
        match self {
            Self::Applied(state) | Self::Duplicate(state) => state,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// 合并时的时间参数
#[derive(Debug, Clone, Copy)]
pub struct MergeClock {
    pub now: DateTime<Utc>,
    pub ttl: Duration,
}

impl MergeClock {
    pub fn new(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self { now, ttl }
    }
}

/// 订单的累积风险状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskState {
    pub merchant_id: String,
    pub order_id: String,
    pub transaction_id: Option<String>,
    /// 信号名 -> 子分数（0-20）
    pub inputs: BTreeMap<String, i32>,
    pub score: i32,
    pub reasons: Vec<String>,
    pub status: RiskStatus,
    pub order: Option<OrderContext>,
    pub payment: Option<PaymentContext>,
    pub correlation_id: Option<Uuid>,
    pub applied_event_ids: Vec<Uuid>,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RiskState {
    /// 创建空的 PARTIAL 状态
    pub fn new(merchant_id: &str, order_id: &str, clock: MergeClock) -> Self {
        Self {
            merchant_id: merchant_id.to_string(),
            order_id: order_id.to_string(),
            transaction_id: None,
            inputs: BTreeMap::new(),
            score: 0,
            reasons: Vec::new(),
            status: RiskStatus::Partial,
            order: None,
            payment: None,
            correlation_id: None,
            applied_event_ids: Vec::new(),
            computed_at: clock.now,
            expires_at: clock.now + clock.ttl,
        }
    }

    pub fn has_applied(&self, event_id: Uuid) -> bool {
        self.applied_event_ids.contains(&event_id)
    }

    /// 当前时刻状态是否已过期
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// 应用一个事件的贡献
    ///
    /// 同一订单若收到 ID 不同的第二个订单（或支付）事件，保留先到达的事实，
    /// 只记录事件 ID。
    pub fn apply(
        &mut self,
        contribution: Contribution,
        correlation_id: Uuid,
        clock: MergeClock,
    ) -> bool {
        let event_id = contribution.event_id();
        if self.has_applied(event_id) {
            return false;
        }

        match contribution {
            Contribution::Order(ctx) => {
                if self.order.is_none() {
                    self.transaction_id = Some(ctx.transaction_id.clone());
                    self.order = Some(ctx);
                }
            }
            Contribution::Payment(ctx) => {
                if self.payment.is_none() {
                    self.payment = Some(ctx);
                }
            }
        }

        self.applied_event_ids.push(event_id);
        self.correlation_id.get_or_insert(correlation_id);
        self.recompute(clock);
        true
    }

    /// 从已到达的上下文重算子分数、总分、说明与完整度
    fn recompute(&mut self, clock: MergeClock) {
        let signals = scoring::evaluate(self.order.as_ref(), self.payment.as_ref());

        self.inputs = signals
            .iter()
            .map(|s| (s.name.to_string(), s.score))
            .collect();
        self.score = scoring::total_score(self.inputs.values());
        self.reasons = signals.into_iter().filter_map(|s| s.reason).collect();
        self.status = if self.order.is_some() && self.payment.is_some() {
            RiskStatus::Complete
        } else {
            RiskStatus::Partial
        };
        self.computed_at = clock.now;
        self.expires_at = clock.now + clock.ttl;
    }
}
