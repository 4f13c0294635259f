//! 风险信号评分
//!
//! 每个信号输出 0-20 的子分数，总分为子分数之和并截断到 100。
//! 信号只依赖已到达的订单/支付上下文，依赖双方的信号在两者都到达前不产生。

use crate::model::{OrderContext, PaymentContext};

/// 单个信号的分数上限
pub const MAX_SUB_SCORE: i32 = 20;
/// 总分上限
pub const MAX_SCORE: i32 = 100;

pub const EMAIL_DOMAIN: &str = "email_domain";
pub const HIGH_AMOUNT: &str = "high_amount";
pub const BIN_COUNTRY_MISMATCH: &str = "bin_country_mismatch";
pub const AMOUNT_MISMATCH: &str = "amount_mismatch";
pub const CURRENCY_MISMATCH: &str = "currency_mismatch";

/// 一次性邮箱服务
const DISPOSABLE_DOMAINS: &[&str] = &[
    "mailinator.com",
    "guerrillamail.com",
    "10minutemail.com",
    "tempmail.com",
    "trashmail.com",
    "yopmail.com",
];

/// 免费邮箱服务
const FREE_WEBMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "outlook.com",
    "hotmail.com",
    "aol.com",
    "icloud.com",
];

/// 单个信号的评估结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub name: &'static str,
    pub score: i32,
    /// 分数非零时的说明
    pub reason: Option<String>,
}

impl Signal {
    fn new(name: &'static str, score: i32, reason: impl FnOnce() -> String) -> Self {
        let score = score.clamp(0, MAX_SUB_SCORE);
        Self {
            name,
            score,
            reason: (score > 0).then(reason),
        }
    }
}

/// 邮箱域名信誉：一次性邮箱 20，免费邮箱 5，其他 0
pub fn email_domain_score(domain: &str) -> i32 {
    let domain = domain.to_ascii_lowercase();
    if DISPOSABLE_DOMAINS.contains(&domain.as_str()) {
        20
    } else if FREE_WEBMAIL_DOMAINS.contains(&domain.as_str()) {
        5
    } else {
        0
    }
}

/// 订单金额：≥1000 计 20，≥500 计 10
pub fn high_amount_score(amount: f64) -> i32 {
    if amount >= 1000.0 {
        20
    } else if amount >= 500.0 {
        10
    } else {
        0
    }
}

/// 卡 BIN 国家与账单国家不一致计 20
pub fn bin_country_mismatch_score(bin_country: &str, billing_country: &str) -> i32 {
    if bin_country.eq_ignore_ascii_case(billing_country) {
        0
    } else {
        20
    }
}

/// 根据已到达的上下文计算全部信号
pub fn evaluate(order: Option<&OrderContext>, payment: Option<&PaymentContext>) -> Vec<Signal> {
    let mut signals = Vec::new();

    if let Some(order) = order {
        signals.push(Signal::new(
            EMAIL_DOMAIN,
            email_domain_score(&order.email_domain),
            || format!("email_domain: {} has a poor reputation", order.email_domain),
        ));
        signals.push(Signal::new(
            HIGH_AMOUNT,
            high_amount_score(order.amount),
            || format!("high_amount: order amount {:.2} {}", order.amount, order.currency),
        ));
    }

    if let (Some(order), Some(payment)) = (order, payment) {
        signals.push(Signal::new(
            BIN_COUNTRY_MISMATCH,
            bin_country_mismatch_score(&payment.bin_country, &order.billing_country),
            || {
                format!(
                    "bin_country_mismatch: card issued in {}, billing country {}",
                    payment.bin_country, order.billing_country
                )
            },
        ));

        let amount_differs = (payment.amount - order.amount).abs() > 0.01;
        signals.push(Signal::new(
            AMOUNT_MISMATCH,
            if amount_differs { 15 } else { 0 },
            || {
                format!(
                    "amount_mismatch: authorized {:.2}, ordered {:.2}",
                    payment.amount, order.amount
                )
            },
        ));

        let currency_differs = !payment.currency.eq_ignore_ascii_case(&order.currency);
        signals.push(Signal::new(
            CURRENCY_MISMATCH,
            if currency_differs { 15 } else { 0 },
            || {
                format!(
                    "currency_mismatch: authorized in {}, ordered in {}",
                    payment.currency, order.currency
                )
            },
        ));
    }

    signals
}

/// 子分数求和并截断到 [0, 100]
pub fn total_score<'a>(scores: impl IntoIterator<Item = &'a i32>) -> i32 {
    scores.into_iter().sum::<i32>().clamp(0, MAX_SCORE)
}
