//! PostgreSQL transaction store.
//!
//! Rows map onto `Transaction` through `TransactionRow`. Partial updates are
//! assembled with `QueryBuilder` so each write touches only the columns the
//! caller named, and `vendor_errors` is appended with `||`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, QueryBuilder};

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::transaction::{
    PlayerDetails, SpuDetails, SubStatus, Transaction, TransactionStatus, TransactionUpdate,
    UserDetails, VendorErrorEntry,
};
use crate::ports::TransactionStore;

#[derive(Clone)]
pub struct PgTransactionStore {
    pool: DbPool,
}

impl PgTransactionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Database row for the `transactions` table.
#[derive(Debug, FromRow)]
struct TransactionRow {
    transaction_id: String,
    spu_id: String,
    spu_type: String,
    spu_details: Json<SpuDetails>,
    user_details: Json<UserDetails>,
    player_details: Option<Json<PlayerDetails>>,
    status: String,
    sub_status: String,
    failure_cause: Option<String>,
    failure_reason: Option<String>,
    vendor_id: String,
    vendor_retry_count: i32,
    last_vendor_error: Option<String>,
    last_vendor_error_at: Option<DateTime<Utc>>,
    vendor_errors: Json<Vec<VendorErrorEntry>>,
    vendor_response: Option<Value>,
    gateway_response: Option<Value>,
    payment_response: Option<Value>,
    order_id: Option<String>,
    refund_initiated: bool,
    refund_initiated_at: Option<DateTime<Utc>>,
    refund_completed: bool,
    refund_completed_at: Option<DateTime<Utc>>,
    refund_failed: bool,
    refund_failed_at: Option<DateTime<Utc>>,
    refund_reason: Option<String>,
    refund_id: Option<String>,
    refund_failure_reason: Option<String>,
    reconciliation_needed: bool,
    reconciliation_marked_at: Option<DateTime<Utc>>,
    reconciled: bool,
    reconciled_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = AppError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            transaction_id: row.transaction_id,
            spu_id: row.spu_id,
            spu_type: row.spu_type.parse()?,
            spu_details: row.spu_details.0,
            user_details: row.user_details.0,
            player_details: row.player_details.map(|p| p.0),
            status: row.status.parse()?,
            sub_status: row.sub_status.parse()?,
            failure_cause: row.failure_cause.map(|c| c.parse()).transpose()?,
            failure_reason: row.failure_reason,
            vendor_id: row.vendor_id,
            vendor_retry_count: row.vendor_retry_count,
            last_vendor_error: row.last_vendor_error,
            last_vendor_error_at: row.last_vendor_error_at,
            vendor_errors: row.vendor_errors.0,
            vendor_response: row.vendor_response,
            gateway_response: row.gateway_response,
            payment_response: row.payment_response,
            order_id: row.order_id,
            refund_initiated: row.refund_initiated,
            refund_initiated_at: row.refund_initiated_at,
            refund_completed: row.refund_completed,
            refund_completed_at: row.refund_completed_at,
            refund_failed: row.refund_failed,
            refund_failed_at: row.refund_failed_at,
            refund_reason: row.refund_reason,
            refund_id: row.refund_id,
            refund_failure_reason: row.refund_failure_reason,
            reconciliation_needed: row.reconciliation_needed,
            reconciliation_marked_at: row.reconciliation_marked_at,
            reconciled: row.reconciled,
            reconciled_reason: row.reconciled_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Append `SET` clauses for every field present on `update`.
fn push_update_columns(qb: &mut QueryBuilder<'_, Postgres>, update: &TransactionUpdate) {
    qb.push("updated_at = NOW()");

    if let Some(sub_status) = update.sub_status {
        qb.push(", status = ").push_bind(sub_status.status().as_str());
        qb.push(", sub_status = ").push_bind(sub_status.as_str());
        if sub_status.is_failure_cause() {
            qb.push(", failure_cause = ").push_bind(sub_status.as_str());
        }
    }
    if let Some(reason) = &update.failure_reason {
        qb.push(", failure_reason = ").push_bind(reason.clone());
    }
    if let Some(order_id) = &update.order_id {
        qb.push(", order_id = ").push_bind(order_id.clone());
    }
    if let Some(value) = &update.gateway_response {
        qb.push(", gateway_response = ").push_bind(value.clone());
    }
    if let Some(value) = &update.payment_response {
        qb.push(", payment_response = ").push_bind(value.clone());
    }
    if let Some(value) = &update.vendor_response {
        qb.push(", vendor_response = ").push_bind(value.clone());
    }
    if let Some(count) = update.vendor_retry_count {
        qb.push(", vendor_retry_count = ").push_bind(count);
    }
    if let Some(error) = &update.last_vendor_error {
        qb.push(", last_vendor_error = ").push_bind(error.clone());
        qb.push(", last_vendor_error_at = NOW()");
    }
    if let Some(entry) = &update.push_vendor_error {
        qb.push(", vendor_errors = vendor_errors || ")
            .push_bind(Json(vec![entry.clone()]))
            .push("::jsonb");
    }
    if let Some(initiated) = update.refund_initiated {
        qb.push(", refund_initiated = ").push_bind(initiated);
        if initiated {
            qb.push(", refund_initiated_at = NOW()");
        }
    }
    if let Some(completed) = update.refund_completed {
        qb.push(", refund_completed = ").push_bind(completed);
        if completed {
            qb.push(", refund_completed_at = NOW()");
        }
    }
    if let Some(failed) = update.refund_failed {
        qb.push(", refund_failed = ").push_bind(failed);
        if failed {
            qb.push(", refund_failed_at = NOW()");
        }
    }
    if let Some(reason) = &update.refund_reason {
        qb.push(", refund_reason = ").push_bind(reason.clone());
    }
    if let Some(refund_id) = &update.refund_id {
        qb.push(", refund_id = ").push_bind(refund_id.clone());
    }
    if let Some(reason) = &update.refund_failure_reason {
        qb.push(", refund_failure_reason = ").push_bind(reason.clone());
    }
    if let Some(needed) = update.reconciliation_needed {
        qb.push(", reconciliation_needed = ").push_bind(needed);
        if needed {
            qb.push(", reconciliation_marked_at = NOW()");
        } else {
            qb.push(", reconciliation_marked_at = NULL");
        }
    }
    if let Some(reason) = &update.reconciled_reason {
        qb.push(", reconciled = TRUE, reconciled_reason = ")
            .push_bind(reason.clone());
    }
}

/// Full `UPDATE .. RETURNING *`, optionally guarded on the current sub-status.
fn update_query<'a>(
    transaction_id: &str,
    expected: Option<SubStatus>,
    update: &TransactionUpdate,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("UPDATE transactions SET ");
    push_update_columns(&mut qb, update);
    qb.push(" WHERE transaction_id = ")
        .push_bind(transaction_id.to_string());
    if let Some(sub_status) = expected {
        qb.push(" AND sub_status = ").push_bind(sub_status.as_str());
    }
    qb.push(" RETURNING *");
    qb
}

impl PgTransactionStore {
    async fn run_update(
        &self,
        transaction_id: &str,
        expected: Option<SubStatus>,
        update: &TransactionUpdate,
    ) -> Result<Option<Transaction>, AppError> {
        let mut qb = update_query(transaction_id, expected, update);
        let row = qb
            .build_query_as::<TransactionRow>()
            .fetch_optional(&self.pool)
            .await?;

        row.map(Transaction::try_from).transpose()
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn insert(&self, tx: &Transaction) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                transaction_id, spu_id, spu_type, spu_details, user_details, player_details,
                status, sub_status, vendor_id, vendor_retry_count, vendor_errors,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&tx.transaction_id)
        .bind(&tx.spu_id)
        .bind(tx.spu_type.as_str())
        .bind(Json(&tx.spu_details))
        .bind(Json(&tx.user_details))
        .bind(tx.player_details.as_ref().map(Json))
        .bind(tx.status.as_str())
        .bind(tx.sub_status.as_str())
        .bind(&tx.vendor_id)
        .bind(tx.vendor_retry_count)
        .bind(Json(&tx.vendor_errors))
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_one(&self, transaction_id: &str) -> Result<Option<Transaction>, AppError> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Transaction::try_from).transpose()
    }

    async fn update_partial(
        &self,
        transaction_id: &str,
        update: &TransactionUpdate,
    ) -> Result<Option<Transaction>, AppError> {
        self.run_update(transaction_id, None, update).await
    }

    async fn update_if_sub_status(
        &self,
        transaction_id: &str,
        expected: SubStatus,
        update: &TransactionUpdate,
    ) -> Result<Option<Transaction>, AppError> {
        self.run_update(transaction_id, Some(expected), update).await
    }

    async fn find_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>, AppError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE status = $1 ORDER BY updated_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transaction::SubStatus;

    fn sql_for(update: &TransactionUpdate) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE transactions SET ");
        push_update_columns(&mut qb, update);
        qb.sql().to_string()
    }

    #[test]
    fn test_update_touches_only_named_columns() {
        let sql = sql_for(&TransactionUpdate::to(SubStatus::VendorQueued));
        assert!(sql.contains("status = $1"));
        assert!(sql.contains("sub_status = $2"));
        assert!(!sql.contains("failure_cause"));
        assert!(!sql.contains("refund_"));
    }

    #[test]
    fn test_failure_sub_status_records_cause() {
        let sql = sql_for(&TransactionUpdate::to(SubStatus::BalanceError));
        assert!(sql.contains("failure_cause = $3"));
    }

    #[test]
    fn test_vendor_errors_are_appended() {
        let update = TransactionUpdate {
            push_vendor_error: Some(VendorErrorEntry {
                timestamp: Utc::now(),
                error: "timeout".to_string(),
                category: crate::error::VendorErrorCategory::Timeout,
                retry_count: 0,
            }),
            ..Default::default()
        };
        let sql = sql_for(&update);
        assert!(sql.contains("vendor_errors = vendor_errors || $1::jsonb"));
    }

    #[test]
    fn test_guarded_update_checks_current_sub_status() {
        let update = TransactionUpdate::to(SubStatus::PaymentSuccess);
        let guarded = update_query("t1", Some(SubStatus::GatewayInitiated), &update);
        assert!(
            guarded
                .sql()
                .ends_with("WHERE transaction_id = $3 AND sub_status = $4 RETURNING *")
        );

        let plain = update_query("t1", None, &update);
        assert!(!plain.sql().contains("AND sub_status"));
    }

    #[test]
    fn test_clearing_reconciliation_nulls_timestamp() {
        let sql = sql_for(&TransactionUpdate::default().clear_reconciliation());
        assert!(sql.contains("reconciliation_marked_at = NULL"));
    }
}
