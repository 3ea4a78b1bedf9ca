//! In-memory store and lock for tests and local runs.
//!
//! Both share state through `Arc<RwLock<HashMap<..>>>` and are cheap to clone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::adapters::redis_lock::new_lock_token;
use crate::error::AppError;
use crate::models::transaction::{SubStatus, Transaction, TransactionStatus, TransactionUpdate};
use crate::ports::{DistributedLock, LockLease, TransactionStore};

/// A thread-safe in-memory transaction store.
///
/// Partial updates go through `Transaction::apply`, the same field semantics
/// the Postgres store implements in SQL.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<String, Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.transactions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transactions.read().await.is_empty()
    }

    /// Overwrite a stored transaction as-is. Used to stage fixtures.
    pub async fn put(&self, tx: Transaction) {
        self.transactions
            .write()
            .await
            .insert(tx.transaction_id.clone(), tx);
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: &Transaction) -> Result<(), AppError> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&tx.transaction_id) {
            return Err(AppError::Internal(format!(
                "duplicate transaction id {}",
                tx.transaction_id
            )));
        }
        transactions.insert(tx.transaction_id.clone(), tx.clone());
        Ok(())
    }

    async fn find_one(&self, transaction_id: &str) -> Result<Option<Transaction>, AppError> {
        Ok(self.transactions.read().await.get(transaction_id).cloned())
    }

    async fn update_partial(
        &self,
        transaction_id: &str,
        update: &TransactionUpdate,
    ) -> Result<Option<Transaction>, AppError> {
        let mut transactions = self.transactions.write().await;
        Ok(transactions.get_mut(transaction_id).map(|tx| {
            tx.apply(update, Utc::now());
            tx.clone()
        }))
    }

    async fn update_if_sub_status(
        &self,
        transaction_id: &str,
        expected: SubStatus,
        update: &TransactionUpdate,
    ) -> Result<Option<Transaction>, AppError> {
        let mut transactions = self.transactions.write().await;
        Ok(transactions
            .get_mut(transaction_id)
            .filter(|tx| tx.sub_status == expected)
            .map(|tx| {
                tx.apply(update, Utc::now());
                tx.clone()
            }))
    }

    async fn find_by_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, AppError> {
        let mut found: Vec<Transaction> = self
            .transactions
            .read()
            .await
            .values()
            .filter(|tx| tx.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|tx| tx.updated_at);
        Ok(found)
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Process-local lock with the same try-once and TTL semantics as Redis.
#[derive(Default, Clone)]
pub struct InMemoryLock {
    held: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_held(&self, key: &str) -> bool {
        let held = self.held.lock().await;
        held.get(key)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now())
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, AppError> {
        let mut held = self.held.lock().await;
        let now = Instant::now();
        if let Some((_, expires_at)) = held.get(key) {
            if *expires_at > now {
                return Ok(None);
            }
        }
        let token = new_lock_token();
        held.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(Some(LockLease {
            key: key.to_string(),
            token,
        }))
    }

    async fn release(&self, lease: &LockLease) -> Result<(), AppError> {
        let mut held = self.held.lock().await;
        if held
            .get(&lease.key)
            .is_some_and(|(token, _)| *token == lease.token)
        {
            held.remove(&lease.key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transaction::{SpuDetails, SpuType, UserDetails};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let lock = InMemoryLock::new();
        let ttl = Duration::from_secs(60);

        let lease = lock.acquire("lock:transaction:t1", ttl).await.unwrap().unwrap();
        assert!(lock.acquire("lock:transaction:t1", ttl).await.unwrap().is_none());
        assert!(lock.acquire("lock:transaction:t2", ttl).await.unwrap().is_some());

        lock.release(&lease).await.unwrap();
        assert!(lock.acquire("lock:transaction:t1", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_lease_cannot_release_new_holder() {
        let lock = InMemoryLock::new();
        let stale = lock
            .acquire("k", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let fresh = lock.acquire("k", Duration::from_secs(60)).await.unwrap();
        assert!(fresh.is_some());

        lock.release(&stale).await.unwrap();
        assert!(lock.is_held("k").await);
    }

    #[tokio::test]
    async fn test_update_of_unknown_transaction_returns_none() {
        let store = InMemoryTransactionStore::new();
        let result = store
            .update_partial("missing", &TransactionUpdate::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    fn merchandise() -> Transaction {
        Transaction::new(
            "spu42".to_string(),
            SpuType::Merchandise,
            SpuDetails {
                price: Decimal::new(100, 0),
                currency: "BRL".to_string(),
                name: None,
                vendor_product_id: None,
                metadata: None,
            },
            UserDetails {
                user_id: "u1".to_string(),
                email: None,
                phone: None,
            },
            None,
            "smileone".to_string(),
        )
    }

    #[tokio::test]
    async fn test_guarded_update_only_writes_from_expected_sub_status() {
        let store = InMemoryTransactionStore::new();
        let tx = merchandise();
        let id = tx.transaction_id.clone();
        store.insert(&tx).await.unwrap();

        let moved = store
            .update_if_sub_status(
                &id,
                SubStatus::OrderInitiated,
                &TransactionUpdate::to(SubStatus::GatewayInitiated),
            )
            .await
            .unwrap();
        assert_eq!(moved.unwrap().sub_status, SubStatus::GatewayInitiated);

        let stale = store
            .update_if_sub_status(
                &id,
                SubStatus::OrderInitiated,
                &TransactionUpdate::to(SubStatus::GatewayFailed),
            )
            .await
            .unwrap();
        assert!(stale.is_none());

        let stored = store.find_one(&id).await.unwrap().unwrap();
        assert_eq!(stored.sub_status, SubStatus::GatewayInitiated);
    }

    #[tokio::test]
    async fn test_find_by_status_filters_rows() {
        let store = InMemoryTransactionStore::new();
        let pending = merchandise();
        let mut processing = merchandise();
        processing.status = TransactionStatus::Processing;
        processing.sub_status = SubStatus::VendorQueued;
        store.put(pending).await;
        store.put(processing.clone()).await;

        let found = store
            .find_by_status(TransactionStatus::Processing)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].transaction_id, processing.transaction_id);
    }
}
