//! 内存处置建议存储

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::traits::RecommendationStore;
use crate::error::Result;
use crate::model::{InsertOutcome, RecommendationRecord};

type RecordKey = (String, String);

#[derive(Debug, Default)]
pub struct InMemoryRecommendationStore {
    records: DashMap<RecordKey, RecommendationRecord>,
}

impl InMemoryRecommendationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn key_of(record: &RecommendationRecord) -> RecordKey {
    (record.merchant_id.clone(), record.order_id.clone())
}

#[async_trait]
impl RecommendationStore for InMemoryRecommendationStore {
    async fn get(&self, merchant_id: &str, order_id: &str) -> Result<Option<RecommendationRecord>> {
        let key = (merchant_id.to_string(), order_id.to_string());
        Ok(self.records.get(&key).map(|entry| entry.value().clone()))
    }

    async fn find_by_reference(
        &self,
        merchant_id: &str,
        reference: &str,
    ) -> Result<Option<RecommendationRecord>> {
        let by_transaction = self
            .records
            .iter()
            .find(|entry| {
                entry.merchant_id == merchant_id
                    && entry.transaction_id.as_deref() == Some(reference)
            })
            .map(|entry| entry.value().clone());
        if by_transaction.is_some() {
            return Ok(by_transaction);
        }

        self.get(merchant_id, reference).await
    }

    async fn insert_if_absent(&self, record: RecommendationRecord) -> Result<InsertOutcome> {
        Ok(match self.records.entry(key_of(&record)) {
            Entry::Occupied(existing) => InsertOutcome::AlreadyDecided(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                InsertOutcome::Inserted(record)
            }
        })
    }

    async fn replace(&self, record: RecommendationRecord) -> Result<()> {
        self.records.insert(key_of(&record), record);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chargeflow_shared::events::DisputeReasonCode;
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::model::{
        DisputeDetails, EvidenceBundle, RecommendedAction, RiskAvailability, RiskEvidence,
    };

    fn record(order_id: &str, action: RecommendedAction) -> RecommendationRecord {
        let now = Utc::now();
        let dispute = DisputeDetails {
            event_id: Uuid::new_v4(),
            reason_code: DisputeReasonCode::Fraud,
            amount: 120.0,
            note: None,
            opened_at: now,
        };
        RecommendationRecord {
            merchant_id: "m-1".to_string(),
            order_id: order_id.to_string(),
            transaction_id: Some(format!("txn_{order_id}")),
            dispute_reason_code: DisputeReasonCode::Fraud,
            dispute_amount: 120.0,
            dispute_note: None,
            recommended_action: action,
            source_event_id: dispute.event_id,
            evidence_bundle: EvidenceBundle {
                dispute,
                risk: RiskEvidence {
                    availability: RiskAvailability::Unknown,
                    score: None,
                    reasons: Vec::new(),
                    inputs: Default::default(),
                    status: None,
                    computed_at: None,
                    expires_at: None,
                    resolution_attempts: 1,
                    last_error: None,
                },
                order: None,
                payment: None,
                flags: Vec::new(),
                recommended_action: action,
                decided_at: now,
                correlation_id: Uuid::new_v4(),
            },
            correlation_id: Uuid::new_v4(),
            computed_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first() {
        let store = InMemoryRecommendationStore::new();

        let first = store
            .insert_if_absent(record("ord_1", RecommendedAction::Fight))
            .await
            .unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));

        let second = store
            .insert_if_absent(record("ord_1", RecommendedAction::RefundNow))
            .await
            .unwrap();
        let InsertOutcome::AlreadyDecided(existing) = second else {
            panic!("预期 AlreadyDecided");
        };
        assert_eq!(existing.recommended_action, RecommendedAction::Fight);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_overwrites() {
        let store = InMemoryRecommendationStore::new();
        store
            .insert_if_absent(record("ord_1", RecommendedAction::Review))
            .await
            .unwrap();
        store
            .replace(record("ord_1", RecommendedAction::Fight))
            .await
            .unwrap();

        let current = store.get("m-1", "ord_1").await.unwrap().unwrap();
        assert_eq!(current.recommended_action, RecommendedAction::Fight);
    }

    #[tokio::test]
    async fn test_find_by_reference() {
        let store = InMemoryRecommendationStore::new();
        store
            .insert_if_absent(record("ord_1", RecommendedAction::Fight))
            .await
            .unwrap();

        let by_txn = store.find_by_reference("m-1", "txn_ord_1").await.unwrap();
        assert_eq!(by_txn.unwrap().order_id, "ord_1");

        let by_order = store.find_by_reference("m-1", "ord_1").await.unwrap();
        assert!(by_order.is_some());

        assert!(store.find_by_reference("m-2", "ord_1").await.unwrap().is_none());
        assert!(store.find_by_reference("m-1", "txn_x").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_single_winner() {
        let store = Arc::new(InMemoryRecommendationStore::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .insert_if_absent(record("ord_1", RecommendedAction::Review))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), InsertOutcome::Inserted(_)) {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }
}
