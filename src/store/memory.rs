//! In-process store for tests and local runs without PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{LoanStore, StoreError};
use crate::loan::{Loan, LoanFilter, LoanStatus};
use crate::mpesa::{MpesaTransaction, TransactionStatus};

#[derive(Default)]
pub struct InMemoryLoanStore {
    loans: RwLock<HashMap<Uuid, Loan>>,
    transactions: RwLock<Vec<MpesaTransaction>>,
}

impl InMemoryLoanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_open(loan: &Loan) -> bool {
    !loan.status.is_terminal()
}

#[async_trait]
impl LoanStore for InMemoryLoanStore {
    async fn insert_loan(&self, loan: &Loan) -> Result<Loan, StoreError> {
        let mut loans = self.loans.write().await;

        if let Some(national_id) = loan.national_id() {
            let clash = loans
                .values()
                .any(|other| is_open(other) && other.national_id() == Some(national_id));
            if clash {
                return Err(StoreError::Duplicate(format!(
                    "an open application already exists for national id {}",
                    national_id
                )));
            }
        }
        if loans.contains_key(&loan.id) {
            return Err(StoreError::Duplicate(format!("loan {}", loan.id)));
        }

        loans.insert(loan.id, loan.clone());
        Ok(loan.clone())
    }

    async fn get_loan(&self, id: Uuid) -> Result<Option<Loan>, StoreError> {
        Ok(self.loans.read().await.get(&id).cloned())
    }

    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StoreError> {
        let loans = self.loans.read().await;
        let mut matching: Vec<Loan> = loans.values().filter(|l| filter.matches(l)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching
            .into_iter()
            .skip(usize::try_from(filter.offset()).unwrap_or(usize::MAX))
            .take(filter.limit() as usize)
            .collect())
    }

    async fn update_loan(&self, loan: &Loan, expected_version: i64) -> Result<Loan, StoreError> {
        let mut loans = self.loans.write().await;
        let current = loans.get_mut(&loan.id).ok_or(StoreError::NotFound(loan.id))?;

        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: loan.id,
                expected: expected_version,
            });
        }

        let mut stored = loan.clone();
        stored.version = expected_version + 1;
        *current = stored.clone();
        Ok(stored)
    }

    async fn overdue_loans(&self, cutoff: DateTime<Utc>) -> Result<Vec<Loan>, StoreError> {
        let loans = self.loans.read().await;
        Ok(loans
            .values()
            .filter(|l| l.status == LoanStatus::Active && l.due_at.map_or(false, |due| due < cutoff))
            .cloned()
            .collect())
    }

    async fn insert_transaction(&self, tx: &MpesaTransaction) -> Result<(), StoreError> {
        let mut transactions = self.transactions.write().await;

        if let Some(reference) = tx.external_reference.as_deref() {
            if transactions
                .iter()
                .any(|other| other.external_reference.as_deref() == Some(reference))
            {
                return Err(StoreError::Duplicate(format!(
                    "transaction reference {}",
                    reference
                )));
            }
        }

        transactions.push(tx.clone());
        Ok(())
    }

    async fn update_transaction_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        description: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut transactions = self.transactions.write().await;
        let tx = transactions
            .iter_mut()
            .find(|tx| tx.id == id)
            .ok_or(StoreError::NotFound(id))?;

        tx.status = status;
        if let Some(description) = description {
            tx.result_description = Some(description.to_string());
        }
        tx.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_transaction(&self, id: Uuid) -> Result<(), StoreError> {
        self.transactions.write().await.retain(|tx| tx.id != id);
        Ok(())
    }

    async fn list_transactions(&self, loan_id: Uuid) -> Result<Vec<MpesaTransaction>, StoreError> {
        Ok(self
            .transactions
            .read()
            .await
            .iter()
            .filter(|tx| tx.loan_id == Some(loan_id))
            .cloned()
            .collect())
    }

    async fn find_transaction(&self, external_reference: &str) -> Result<Option<MpesaTransaction>, StoreError> {
        Ok(self
            .transactions
            .read()
            .await
            .iter()
            .find(|tx| tx.external_reference.as_deref() == Some(external_reference))
            .cloned())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
