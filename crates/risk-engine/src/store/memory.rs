//! 内存风险状态存储
//!
//! 用于测试与本地运行。DashMap 分片写锁即为按键串行化点。

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::traits::RiskStateStore;
use crate::error::Result;
use crate::model::{Contribution, MergeClock, MergeOutcome, RiskState};

type StateKey = (String, String);

#[derive(Debug, Default)]
pub struct InMemoryRiskStateStore {
    states: DashMap<StateKey, RiskState>,
}

impl InMemoryRiskStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入一条状态，覆盖已有记录
    pub fn insert(&self, state: RiskState) {
        let key = (state.merchant_id.clone(), state.order_id.clone());
        self.states.insert(key, state);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl RiskStateStore for InMemoryRiskStateStore {
    async fn get(&self, merchant_id: &str, order_id: &str) -> Result<Option<RiskState>> {
        let key = (merchant_id.to_string(), order_id.to_string());
        Ok(self.states.get(&key).map(|entry| entry.value().clone()))
    }

    async fn find_order_id(
        &self,
        merchant_id: &str,
        transaction_id: &str,
    ) -> Result<Option<String>> {
        Ok(self.states.iter().find_map(|entry| {
            let state = entry.value();
            (state.merchant_id == merchant_id
                && state.transaction_id.as_deref() == Some(transaction_id))
            .then(|| state.order_id.clone())
        }))
    }

    async fn merge(
        &self,
        merchant_id: &str,
        order_id: &str,
        contribution: Contribution,
        correlation_id: Uuid,
        clock: MergeClock,
    ) -> Result<MergeOutcome> {
        let key = (merchant_id.to_string(), order_id.to_string());
        let mut entry = self
            .states
            .entry(key)
            .or_insert_with(|| RiskState::new(merchant_id, order_id, clock));

        let applied = entry.apply(contribution, correlation_id, clock);
        let state = entry.value().clone();

        Ok(if applied {
            MergeOutcome::Applied(state)
        } else {
            MergeOutcome::Duplicate(state)
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
