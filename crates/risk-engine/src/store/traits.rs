//! 风险状态存储接口

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Contribution, MergeClock, MergeOutcome, RiskState};

/// 风险状态存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RiskStateStore: Send + Sync {
    /// 纯读取，不产生任何写入
    async fn get(&self, merchant_id: &str, order_id: &str) -> Result<Option<RiskState>>;

    /// 按交易 ID 反查订单 ID
    async fn find_order_id(
        &self,
        merchant_id: &str,
        transaction_id: &str,
    ) -> Result<Option<String>>;

    /// 原子地加载（不存在时创建 PARTIAL 记录）、合并并持久化
    ///
    /// 同一键上的并发调用必须串行化，不能丢失任何一方的贡献。
    async fn merge(
        &self,
        merchant_id: &str,
        order_id: &str,
        contribution: Contribution,
        correlation_id: Uuid,
        clock: MergeClock,
    ) -> Result<MergeOutcome>;

    /// 存储可用性检查
    async fn ping(&self) -> Result<()>;
}
