//! Loan persistence
//!
//! Every loan write is conditional on the version the caller read, which is
//! what serializes concurrent approvals, disbursements and repayments.

mod memory;
mod postgres;

pub use memory::InMemoryLoanStore;
pub use postgres::PgLoanStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::loan::{Loan, LoanFilter};
use crate::mpesa::{MpesaTransaction, TransactionStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record {0} not found")]
    NotFound(Uuid),

    #[error("Loan {id} was modified concurrently (expected version {expected})")]
    VersionConflict { id: Uuid, expected: i64 },

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::Duplicate(db.message().to_string())
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

#[async_trait]
pub trait LoanStore: Send + Sync {
    /// Insert a new loan. An open individual application with the same
    /// national id is a [`StoreError::Duplicate`].
    async fn insert_loan(&self, loan: &Loan) -> Result<Loan, StoreError>;

    async fn get_loan(&self, id: Uuid) -> Result<Option<Loan>, StoreError>;

    /// Newest first, paginated by the filter
    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StoreError>;

    /// Write `loan` if the stored version still equals `expected_version`.
    /// Returns the stored record with its bumped version.
    async fn update_loan(&self, loan: &Loan, expected_version: i64) -> Result<Loan, StoreError>;

    /// Active loans whose due date is before `cutoff`
    async fn overdue_loans(&self, cutoff: DateTime<Utc>) -> Result<Vec<Loan>, StoreError>;

    /// Record a gateway transaction. A second transaction with the same
    /// external reference is a [`StoreError::Duplicate`].
    async fn insert_transaction(&self, tx: &MpesaTransaction) -> Result<(), StoreError>;

    async fn update_transaction_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        description: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Drop a transaction so its external reference can be claimed again
    async fn delete_transaction(&self, id: Uuid) -> Result<(), StoreError>;

    async fn list_transactions(&self, loan_id: Uuid) -> Result<Vec<MpesaTransaction>, StoreError>;

    /// Look up a gateway transaction by its external reference
    async fn find_transaction(&self, external_reference: &str) -> Result<Option<MpesaTransaction>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
