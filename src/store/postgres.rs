//! PostgreSQL-backed loan store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{LoanStore, StoreError};
use crate::loan::{Loan, LoanFilter, LoanOrigin, LoanStatus};
use crate::mpesa::{MpesaTransaction, TransactionStatus};

/// Row shape of the `loans` table
#[derive(Debug, sqlx::FromRow)]
struct LoanRow {
    id: Uuid,
    version: i64,
    borrower_id: Uuid,
    origin: Json<LoanOrigin>,
    purpose: Option<String>,
    principal_cents: i64,
    interest_rate_pct: f64,
    rate_supplied: bool,
    term_months: i32,
    monthly_payment_cents: i64,
    total_repayment_cents: i64,
    repaid_cents: i64,
    status: LoanStatus,
    payout_number: Option<String>,
    disbursed: bool,
    disbursement_reference: Option<String>,
    approved_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    rejected_at: Option<DateTime<Utc>>,
    disbursed_at: Option<DateTime<Utc>>,
    due_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    defaulted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LoanRow> for Loan {
    type Error = StoreError;

    fn try_from(row: LoanRow) -> Result<Self, Self::Error> {
        let term_months = u32::try_from(row.term_months)
            .map_err(|_| StoreError::Database(format!("loan {} has a negative term", row.id)))?;

        Ok(Loan {
            id: row.id,
            version: row.version,
            borrower_id: row.borrower_id,
            origin: row.origin.0,
            purpose: row.purpose,
            principal_cents: row.principal_cents,
            interest_rate_pct: row.interest_rate_pct,
            rate_supplied: row.rate_supplied,
            term_months,
            monthly_payment_cents: row.monthly_payment_cents,
            total_repayment_cents: row.total_repayment_cents,
            repaid_cents: row.repaid_cents,
            status: row.status,
            payout_number: row.payout_number,
            disbursed: row.disbursed,
            disbursement_reference: row.disbursement_reference,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            rejection_reason: row.rejection_reason,
            rejected_at: row.rejected_at,
            disbursed_at: row.disbursed_at,
            due_at: row.due_at,
            completed_at: row.completed_at,
            defaulted_at: row.defaulted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_loans(rows: Vec<LoanRow>) -> Result<Vec<Loan>, StoreError> {
    rows.into_iter().map(Loan::try_from).collect()
}

/// Loan store over a PostgreSQL pool
#[derive(Clone)]
pub struct PgLoanStore {
    db_pool: PgPool,
}

impl PgLoanStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

fn term_months_column(loan: &Loan) -> Result<i32, StoreError> {
    i32::try_from(loan.term_months)
        .map_err(|_| StoreError::Database(format!("term of {} months does not fit", loan.term_months)))
}

#[async_trait]
impl LoanStore for PgLoanStore {
    async fn insert_loan(&self, loan: &Loan) -> Result<Loan, StoreError> {
        let row = sqlx::query_as::<_, LoanRow>(
            r#"
            INSERT INTO loans (
                id, version, borrower_id, origin, purpose,
                principal_cents, interest_rate_pct, rate_supplied, term_months,
                monthly_payment_cents, total_repayment_cents, repaid_cents,
                status, payout_number, disbursed, disbursement_reference,
                approved_by, approved_at, rejection_reason, rejected_at,
                disbursed_at, due_at, completed_at, defaulted_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
            RETURNING *
            "#,
        )
        .bind(loan.id)
        .bind(loan.version)
        .bind(loan.borrower_id)
        .bind(Json(&loan.origin))
        .bind(&loan.purpose)
        .bind(loan.principal_cents)
        .bind(loan.interest_rate_pct)
        .bind(loan.rate_supplied)
        .bind(term_months_column(loan)?)
        .bind(loan.monthly_payment_cents)
        .bind(loan.total_repayment_cents)
        .bind(loan.repaid_cents)
        .bind(loan.status)
        .bind(&loan.payout_number)
        .bind(loan.disbursed)
        .bind(&loan.disbursement_reference)
        .bind(loan.approved_by)
        .bind(loan.approved_at)
        .bind(&loan.rejection_reason)
        .bind(loan.rejected_at)
        .bind(loan.disbursed_at)
        .bind(loan.due_at)
        .bind(loan.completed_at)
        .bind(loan.defaulted_at)
        .bind(loan.created_at)
        .bind(loan.updated_at)
        .fetch_one(&self.db_pool)
        .await?;

        row.try_into()
    }

    async fn get_loan(&self, id: Uuid) -> Result<Option<Loan>, StoreError> {
        let row = sqlx::query_as::<_, LoanRow>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        row.map(Loan::try_from).transpose()
    }

    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StoreError> {
        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT * FROM loans WHERE 1=1");

        if let Some(borrower_id) = filter.borrower_id {
            query_builder.push(" AND borrower_id = ");
            query_builder.push_bind(borrower_id);
        }
        if let Some(chama_id) = filter.chama_id {
            query_builder.push(" AND origin->>'chama_id' = ");
            query_builder.push_bind(chama_id.to_string());
        }
        if let Some(status) = filter.status {
            query_builder.push(" AND status = ");
            query_builder.push_bind(status);
        }
        if let Some(user_id) = filter.visible_to {
            query_builder.push(" AND (borrower_id = ");
            query_builder.push_bind(user_id);
            query_builder.push(" OR origin->'guarantors' @> ");
            query_builder.push_bind(Json(serde_json::json!([{ "member_id": user_id }])));
            query_builder.push(")");
        }

        query_builder.push(" ORDER BY created_at DESC LIMIT ");
        query_builder.push_bind(filter.limit() as i64);
        query_builder.push(" OFFSET ");
        query_builder.push_bind(i64::try_from(filter.offset()).unwrap_or(i64::MAX));

        let rows = query_builder
            .build_query_as::<LoanRow>()
            .fetch_all(&self.db_pool)
            .await?;

        into_loans(rows)
    }

    async fn update_loan(&self, loan: &Loan, expected_version: i64) -> Result<Loan, StoreError> {
        let row = sqlx::query_as::<_, LoanRow>(
            r#"
            UPDATE loans SET
                version = $1, origin = $2, purpose = $3,
                principal_cents = $4, interest_rate_pct = $5, rate_supplied = $6,
                term_months = $7, monthly_payment_cents = $8, total_repayment_cents = $9,
                repaid_cents = $10, status = $11, payout_number = $12, disbursed = $13,
                disbursement_reference = $14, approved_by = $15, approved_at = $16,
                rejection_reason = $17, rejected_at = $18, disbursed_at = $19,
                due_at = $20, completed_at = $21, defaulted_at = $22, updated_at = $23
            WHERE id = $24 AND version = $25
            RETURNING *
            "#,
        )
        .bind(expected_version + 1)
        .bind(Json(&loan.origin))
        .bind(&loan.purpose)
        .bind(loan.principal_cents)
        .bind(loan.interest_rate_pct)
        .bind(loan.rate_supplied)
        .bind(term_months_column(loan)?)
        .bind(loan.monthly_payment_cents)
        .bind(loan.total_repayment_cents)
        .bind(loan.repaid_cents)
        .bind(loan.status)
        .bind(&loan.payout_number)
        .bind(loan.disbursed)
        .bind(&loan.disbursement_reference)
        .bind(loan.approved_by)
        .bind(loan.approved_at)
        .bind(&loan.rejection_reason)
        .bind(loan.rejected_at)
        .bind(loan.disbursed_at)
        .bind(loan.due_at)
        .bind(loan.completed_at)
        .bind(loan.defaulted_at)
        .bind(loan.updated_at)
        .bind(loan.id)
        .bind(expected_version)
        .fetch_optional(&self.db_pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let exists = sqlx::query_as::<_, (i64,)>("SELECT version FROM loans WHERE id = $1")
                    .bind(loan.id)
                    .fetch_optional(&self.db_pool)
                    .await?;
                match exists {
                    Some(_) => Err(StoreError::VersionConflict {
                        id: loan.id,
                        expected: expected_version,
                    }),
                    None => Err(StoreError::NotFound(loan.id)),
                }
            }
        }
    }

    async fn overdue_loans(&self, cutoff: DateTime<Utc>) -> Result<Vec<Loan>, StoreError> {
        let rows = sqlx::query_as::<_, LoanRow>(
            "SELECT * FROM loans WHERE status = $1 AND due_at IS NOT NULL AND due_at < $2",
        )
        .bind(LoanStatus::Active)
        .bind(cutoff)
        .fetch_all(&self.db_pool)
        .await?;

        into_loans(rows)
    }

    async fn insert_transaction(&self, tx: &MpesaTransaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO mpesa_transactions (
                id, loan_id, kind, status, phone, amount_cents,
                external_reference, result_description, retry_count, max_retries,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(tx.id)
        .bind(tx.loan_id)
        .bind(tx.kind)
        .bind(tx.status)
        .bind(&tx.phone)
        .bind(tx.amount_cents)
        .bind(&tx.external_reference)
        .bind(&tx.result_description)
        .bind(tx.retry_count)
        .bind(tx.max_retries)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    async fn update_transaction_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        description: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE mpesa_transactions
            SET status = $1, result_description = COALESCE($2, result_description), updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(status)
        .bind(description)
        .bind(id)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn delete_transaction(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM mpesa_transactions WHERE id = $1")
            .bind(id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn list_transactions(&self, loan_id: Uuid) -> Result<Vec<MpesaTransaction>, StoreError> {
        let txs = sqlx::query_as::<_, MpesaTransaction>(
            "SELECT * FROM mpesa_transactions WHERE loan_id = $1 ORDER BY created_at",
        )
        .bind(loan_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(txs)
    }

    async fn find_transaction(&self, external_reference: &str) -> Result<Option<MpesaTransaction>, StoreError> {
        let tx = sqlx::query_as::<_, MpesaTransaction>(
            "SELECT * FROM mpesa_transactions WHERE external_reference = $1",
        )
        .bind(external_reference)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(tx)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db_pool).await?;
        Ok(())
    }
}
