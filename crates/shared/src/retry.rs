//! 退避重试
//!
//! 风险数据查询与 DLQ 重投共用同一套指数退避参数。
//! 是否可重试由调用方的 `is_retryable` 判断，坏消息直接返回。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// 指数退避参数：第 n 次重试前等待 `initial_delay * multiplier^n`，封顶 `max_delay`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 首次执行之外的重试次数
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 与 `risk_lookup` 默认配置一致：5 次尝试，200ms 起步，上限 5s
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 只执行一次，用于消费者侧由 DLQ 接管重试的场景
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// 已失败 `failures` 次后是否还有重试额度
    fn has_budget(&self, failures: u32) -> bool {
        failures < self.max_retries
    }
}

/// 按策略执行异步操作，返回成功值或最后一次错误
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut failures: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if failures > 0 {
                    debug!(operation = operation_name, failures, "重试后恢复");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let retryable = is_retryable(&err);
        if !retryable || !policy.has_budget(failures) {
            warn!(
                operation = operation_name,
                failures,
                retryable,
                error = %err,
                "放弃执行"
            );
            return Err(err);
        }

        let delay = policy.delay_for_attempt(failures);
        debug!(
            operation = operation_name,
            failures,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "退避后重试"
        );
        tokio::time::sleep(delay).await;
        failures += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }

    /// 前 `fail_first` 次返回给定错误，之后返回调用序号
    async fn run_counted(
        policy: &RetryPolicy,
        fail_first: u32,
        make_err: fn() -> PipelineError,
    ) -> (Result<u32, PipelineError>, u32) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_with_policy(policy, "risk_lookup", PipelineError::is_retryable, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < fail_first { Err(make_err()) } else { Ok(n) }
            }
        })
        .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(1600));
        // 6400ms 被截断
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(5));
    }

    #[test]
    fn test_no_retry_has_no_budget() {
        assert!(!RetryPolicy::no_retry().has_budget(0));
        assert!(fast_policy(2).has_budget(1));
        assert!(!fast_policy(2).has_budget(2));
    }

    #[tokio::test]
    async fn test_transient_error_recovers() {
        let (result, calls) =
            run_counted(&fast_policy(3), 2, || PipelineError::Kafka("抖动".into())).await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_budget_exhausted_returns_last_error() {
        let (result, calls) =
            run_counted(&fast_policy(2), u32::MAX, || PipelineError::Kafka("持续故障".into()))
                .await;
        assert!(matches!(result, Err(PipelineError::Kafka(_))));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_malformed_event_not_retried() {
        let (result, calls) = run_counted(&fast_policy(5), u32::MAX, || {
            PipelineError::MalformedEvent("缺少 order_id".into())
        })
        .await;
        assert!(matches!(result, Err(PipelineError::MalformedEvent(_))));
        assert_eq!(calls, 1);
    }
}
