//! 事件契约与处理管道抽象
//!
//! 定义上游三类事实（订单创建、支付授权、争议发起）的统一信封格式与载荷，
//! 以封闭的 `AppEvent` 枚举承载，消费方按变体穷尽匹配分发。
//! 同时提供 `EventHandler` trait 作为各服务事件处理的核心抽象。

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{PipelineError, Result};

/// 信封规范版本，只接受该版本
pub const SPEC_VERSION: &str = "1.0";

/// 事件类型的命名空间前缀
const TYPE_NAMESPACE: &str = "com.chargeflow.";

// ---------------------------------------------------------------------------
// EventKind：事件类型
// ---------------------------------------------------------------------------

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OrderCreated,
    PaymentAuthorized,
    DisputeOpened,
}

impl EventKind {
    /// 短名，如 `order.created`
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::OrderCreated => "order.created",
            Self::PaymentAuthorized => "payment.authorized",
            Self::DisputeOpened => "dispute.opened",
        }
    }

    /// 写入信封 `type` 字段的完整名称
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::OrderCreated => "com.chargeflow.order.created",
            Self::PaymentAuthorized => "com.chargeflow.payment.authorized",
            Self::DisputeOpened => "com.chargeflow.dispute.opened",
        }
    }

    /// 解析信封 `type`，短名与带命名空间的完整名称均可
    pub fn from_type(value: &str) -> Option<Self> {
        let short = value.strip_prefix(TYPE_NAMESPACE).unwrap_or(value);
        match short {
            "order.created" => Some(Self::OrderCreated),
            "payment.authorized" => Some(Self::PaymentAuthorized),
            "dispute.opened" => Some(Self::DisputeOpened),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

// ---------------------------------------------------------------------------
// 载荷
// ---------------------------------------------------------------------------

/// 订单创建
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    #[validate(length(min = 1, max = 255))]
    pub order_id: String,
    #[validate(length(min = 1, max = 255))]
    pub transaction_id: String,
    #[validate(range(exclusive_min = 0.0))]
    pub amount: f64,
    #[validate(length(equal = 3))]
    pub currency: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(equal = 2))]
    pub billing_country: String,
}

impl OrderCreated {
    /// 邮箱域名（小写）
    pub fn email_domain(&self) -> String {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or_default()
            .to_ascii_lowercase()
    }
}

/// 支付授权
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorized {
    #[validate(length(min = 1, max = 255))]
    pub order_id: String,
    #[validate(length(min = 1, max = 255))]
    pub payment_id: String,
    #[validate(range(exclusive_min = 0.0))]
    pub amount: f64,
    #[validate(length(equal = 3))]
    pub currency: String,
    #[validate(length(equal = 2))]
    pub bin_country: String,
}

/// 争议原因码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeReasonCode {
    Fraud,
    NotReceived,
    Duplicate,
}

impl DisputeReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fraud => "FRAUD",
            Self::NotReceived => "NOT_RECEIVED",
            Self::Duplicate => "DUPLICATE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FRAUD" => Some(Self::Fraud),
            "NOT_RECEIVED" => Some(Self::NotReceived),
            "DUPLICATE" => Some(Self::Duplicate),
            _ => None,
        }
    }
}

impl fmt::Display for DisputeReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 争议发起
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DisputeOpened {
    #[validate(length(min = 1, max = 255))]
    pub order_id: String,
    pub reason_code: DisputeReasonCode,
    #[validate(range(exclusive_min = 0.0))]
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ---------------------------------------------------------------------------
// Envelope：事件信封
// ---------------------------------------------------------------------------

/// 线上传输格式
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    id: Uuid,
    source: String,
    #[serde(rename = "type")]
    event_type: String,
    specversion: String,
    time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    merchant_id: Option<String>,
    data: serde_json::Value,
}

/// 类型化的事件信封
///
/// `id` 全局唯一，是所有去重逻辑的唯一依据；`merchant_id` 由网关附加，可缺省。
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub id: Uuid,
    pub source: String,
    pub time: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub merchant_id: Option<String>,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(source: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            time: Utc::now(),
            correlation_id: None,
            merchant_id: None,
            data,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_merchant_id(mut self, merchant_id: impl Into<String>) -> Self {
        self.merchant_id = Some(merchant_id.into());
        self
    }

    /// 关联 ID；上游未提供时回退为事件 ID
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id.unwrap_or(self.id)
    }
}

impl<T: Serialize> Envelope<T> {
    fn to_raw(&self, kind: EventKind) -> Result<RawEnvelope> {
        Ok(RawEnvelope {
            id: self.id,
            source: self.source.clone(),
            event_type: kind.type_name().to_string(),
            specversion: SPEC_VERSION.to_string(),
            time: self.time,
            correlation_id: self.correlation_id,
            merchant_id: self.merchant_id.clone(),
            data: serde_json::to_value(&self.data)?,
        })
    }
}

/// 将信封中的 data 解析为具体载荷并校验
fn typed<T: DeserializeOwned + Validate>(raw: RawEnvelope) -> Result<Envelope<T>> {
    let data: T = serde_json::from_value(raw.data)
        .map_err(|e| PipelineError::MalformedEvent(format!("载荷解析失败: {e}")))?;
    data.validate()?;

    Ok(Envelope {
        id: raw.id,
        source: raw.source,
        time: raw.time,
        correlation_id: raw.correlation_id,
        merchant_id: raw.merchant_id,
        data,
    })
}

// ---------------------------------------------------------------------------
// AppEvent：封闭的事件变体
// ---------------------------------------------------------------------------

/// 管道中流转的全部事件
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    OrderCreated(Envelope<OrderCreated>),
    PaymentAuthorized(Envelope<PaymentAuthorized>),
    DisputeOpened(Envelope<DisputeOpened>),
}

impl AppEvent {
    /// 从 JSON 字节解析并校验事件
    ///
    /// 任何格式或契约问题都返回不可重试的错误。
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::MalformedEvent(format!("信封解析失败: {e}")))?;

        if raw.specversion != SPEC_VERSION {
            return Err(PipelineError::MalformedEvent(format!(
                "不支持的 specversion: {}",
                raw.specversion
            )));
        }

        if raw.source.trim().is_empty() {
            return Err(PipelineError::MalformedEvent("source 不能为空".to_string()));
        }

        let kind =
            EventKind::from_type(&raw.event_type).ok_or_else(|| PipelineError::UnknownEventType {
                event_type: raw.event_type.clone(),
            })?;

        Ok(match kind {
            EventKind::OrderCreated => Self::OrderCreated(typed(raw)?),
            EventKind::PaymentAuthorized => Self::PaymentAuthorized(typed(raw)?),
            EventKind::DisputeOpened => Self::DisputeOpened(typed(raw)?),
        })
    }

    /// 序列化为线上 JSON 格式
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let raw = match self {
            Self::OrderCreated(e) => e.to_raw(self.kind())?,
            Self::PaymentAuthorized(e) => e.to_raw(self.kind())?,
            Self::DisputeOpened(e) => e.to_raw(self.kind())?,
        };
        Ok(serde_json::to_vec(&raw)?)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::OrderCreated(_) => EventKind::OrderCreated,
            Self::PaymentAuthorized(_) => EventKind::PaymentAuthorized,
            Self::DisputeOpened(_) => EventKind::DisputeOpened,
        }
    }

    pub fn event_id(&self) -> Uuid {
        match self {
            Self::OrderCreated(e) => e.id,
            Self::PaymentAuthorized(e) => e.id,
            Self::DisputeOpened(e) => e.id,
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        match self {
            Self::OrderCreated(e) => e.correlation_id(),
            Self::PaymentAuthorized(e) => e.correlation_id(),
            Self::DisputeOpened(e) => e.correlation_id(),
        }
    }

    pub fn merchant_id(&self) -> Option<&str> {
        match self {
            Self::OrderCreated(e) => e.merchant_id.as_deref(),
            Self::PaymentAuthorized(e) => e.merchant_id.as_deref(),
            Self::DisputeOpened(e) => e.merchant_id.as_deref(),
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            Self::OrderCreated(e) => &e.data.order_id,
            Self::PaymentAuthorized(e) => &e.data.order_id,
            Self::DisputeOpened(e) => &e.data.order_id,
        }
    }
}

impl From<Envelope<OrderCreated>> for AppEvent {
    fn from(envelope: Envelope<OrderCreated>) -> Self {
        Self::OrderCreated(envelope)
    }
}

impl From<Envelope<PaymentAuthorized>> for AppEvent {
    fn from(envelope: Envelope<PaymentAuthorized>) -> Self {
        Self::PaymentAuthorized(envelope)
    }
}

impl From<Envelope<DisputeOpened>> for AppEvent {
    fn from(envelope: Envelope<DisputeOpened>) -> Self {
        Self::DisputeOpened(envelope)
    }
}

// ---------------------------------------------------------------------------
// MerchantResolver：商户归属
// ---------------------------------------------------------------------------

/// 商户归属解析
///
/// 信封携带 merchantId 时以其为准，否则归入配置的默认商户。
#[derive(Debug, Clone)]
pub struct MerchantResolver {
    default_merchant_id: String,
}

impl MerchantResolver {
    pub fn new(default_merchant_id: impl Into<String>) -> Self {
        Self {
            default_merchant_id: default_merchant_id.into(),
        }
    }

    pub fn resolve(&self, merchant_id: Option<&str>) -> String {
        match merchant_id.map(str::trim) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => self.default_merchant_id.clone(),
        }
    }

    pub fn default_merchant_id(&self) -> &str {
        &self.default_merchant_id
    }
}

// ---------------------------------------------------------------------------
// EventHandler：事件处理抽象
// ---------------------------------------------------------------------------

/// 事件处理器
///
/// 各服务的处理引擎实现此 trait，由消费循环驱动。
#[async_trait]
pub trait EventHandler: Send + Sync {
    type Error: Send;

    /// 处理单个事件。重复事件必须返回成功且不产生副作用。
    async fn handle(&self, event: AppEvent) -> std::result::Result<(), Self::Error>;

    /// 本处理器接受的事件类型
    fn accepts(&self) -> &'static [EventKind];
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_json(event_type: &str) -> serde_json::Value {
        json!({
            "id": "6f1c3c0e-8a61-4f43-9d0e-1c1f3f0a9b21",
            "source": "shop",
            "type": event_type,
            "specversion": "1.0",
            "time": "2024-05-01T10:00:00Z",
            "correlationId": "0b8f7a52-2d5c-4a55-8a8f-8f2b6b7c1e10",
            "data": {
                "orderId": "ord_1",
                "transactionId": "txn_1",
                "amount": 120.5,
                "currency": "USD",
                "email": "Alice@Gmail.com",
                "billingCountry": "US"
            }
        })
    }

    #[test]
    fn test_event_kind_from_type() {
        assert_eq!(
            EventKind::from_type("order.created"),
            Some(EventKind::OrderCreated)
        );
        assert_eq!(
            EventKind::from_type("com.chargeflow.payment.authorized"),
            Some(EventKind::PaymentAuthorized)
        );
        assert_eq!(EventKind::from_type("order.deleted"), None);
    }

    #[test]
    fn test_parse_order_created() {
        let bytes = serde_json::to_vec(&order_json("com.chargeflow.order.created")).unwrap();
        let event = AppEvent::from_slice(&bytes).unwrap();

        let AppEvent::OrderCreated(envelope) = &event else {
            panic!("预期 OrderCreated");
        };
        assert_eq!(envelope.data.order_id, "ord_1");
        assert_eq!(envelope.data.email_domain(), "gmail.com");
        assert_eq!(event.order_id(), "ord_1");
        assert_eq!(
            event.correlation_id().to_string(),
            "0b8f7a52-2d5c-4a55-8a8f-8f2b6b7c1e10"
        );
        assert_eq!(event.merchant_id(), None);
    }

    #[test]
    fn test_parse_accepts_short_type() {
        let bytes = serde_json::to_vec(&order_json("order.created")).unwrap();
        assert_eq!(
            AppEvent::from_slice(&bytes).unwrap().kind(),
            EventKind::OrderCreated
        );
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let bytes = serde_json::to_vec(&order_json("order.deleted")).unwrap();
        assert!(matches!(
            AppEvent::from_slice(&bytes),
            Err(PipelineError::UnknownEventType { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_specversion() {
        let mut value = order_json("order.created");
        value["specversion"] = json!("0.3");
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            AppEvent::from_slice(&bytes),
            Err(PipelineError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_parse_rejects_contract_violations() {
        let cases = [
            ("amount", json!(0)),
            ("currency", json!("US")),
            ("billingCountry", json!("USA")),
            ("email", json!("not-an-email")),
            ("orderId", json!("")),
        ];

        for (field, bad) in cases {
            let mut value = order_json("order.created");
            value["data"][field] = bad;
            let bytes = serde_json::to_vec(&value).unwrap();
            let err = AppEvent::from_slice(&bytes).unwrap_err();
            assert!(
                matches!(err, PipelineError::MalformedEvent(_)),
                "字段 {field} 应被拒绝"
            );
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            AppEvent::from_slice(b"not json"),
            Err(PipelineError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_dispute_unknown_reason_code() {
        let value = json!({
            "id": Uuid::new_v4(),
            "source": "psp",
            "type": "dispute.opened",
            "specversion": "1.0",
            "time": "2024-05-01T10:00:00Z",
            "data": {"orderId": "ord_1", "reasonCode": "FRIENDLY_FRAUD", "amount": 10.0}
        });
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            AppEvent::from_slice(&bytes),
            Err(PipelineError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_serialized_form_uses_full_type_name() {
        let event: AppEvent = Envelope::new(
            "psp",
            DisputeOpened {
                order_id: "ord_9".to_string(),
                reason_code: DisputeReasonCode::NotReceived,
                amount: 42.0,
                note: Some("customer says no".to_string()),
            },
        )
        .with_merchant_id("m-1")
        .into();

        let value: serde_json::Value = serde_json::from_slice(&event.to_vec().unwrap()).unwrap();
        assert_eq!(value["type"], "com.chargeflow.dispute.opened");
        assert_eq!(value["specversion"], "1.0");
        assert_eq!(value["merchantId"], "m-1");
        assert_eq!(value["data"]["reasonCode"], "NOT_RECEIVED");
        // 未设置关联 ID 时不输出该字段
        assert!(value.get("correlationId").is_none());

        let parsed = AppEvent::from_slice(&event.to_vec().unwrap()).unwrap();
        assert_eq!(parsed.event_id(), event.event_id());
        assert_eq!(parsed.correlation_id(), event.event_id());
    }

    #[test]
    fn test_merchant_resolver() {
        let resolver = MerchantResolver::new("merchant-default");
        assert_eq!(resolver.resolve(Some("m-42")), "m-42");
        assert_eq!(resolver.resolve(Some("  ")), "merchant-default");
        assert_eq!(resolver.resolve(None), "merchant-default");
    }
}
