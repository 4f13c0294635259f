//! 处置建议存储接口

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{InsertOutcome, RecommendationRecord};

/// 处置建议存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn get(&self, merchant_id: &str, order_id: &str) -> Result<Option<RecommendationRecord>>;

    /// 按交易引用查询：先匹配 transaction_id，再回退到 order_id
    async fn find_by_reference(
        &self,
        merchant_id: &str,
        reference: &str,
    ) -> Result<Option<RecommendationRecord>>;

    /// 仅在该键尚无建议时写入，否则返回既有记录
    async fn insert_if_absent(&self, record: RecommendationRecord) -> Result<InsertOutcome>;

    /// 无条件覆盖，仅用于重算
    async fn replace(&self, record: RecommendationRecord) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}
