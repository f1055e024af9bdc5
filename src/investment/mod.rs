//! Member investments and the returns paid on them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::loan::LoanError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
    Defaulted,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    Interest,
    Principal,
    Dividend,
    CapitalGain,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InvestmentReturn {
    pub kind: ReturnKind,
    pub amount_cents: i64,
    pub recorded_at: DateTime<Utc>,
}

/// An investment. `expected_return_pct` is derived and only written by
/// [`Investment::recompute`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Investment {
    pub id: Uuid,
    pub investor_id: Uuid,
    pub amount_invested_cents: i64,
    pub expected_return_cents: i64,
    pub expected_return_pct: f64,
    pub actual_return_cents: i64,
    pub status: InvestmentStatus,
    pub returns: Vec<InvestmentReturn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Investment {
    pub fn new(
        investor_id: Uuid,
        amount_invested_cents: i64,
        expected_return_cents: i64,
    ) -> Result<Self, LoanError> {
        if amount_invested_cents <= 0 {
            return Err(LoanError::invalid("amount invested must be greater than 0"));
        }
        if expected_return_cents < 0 {
            return Err(LoanError::invalid("expected return cannot be negative"));
        }

        let now = Utc::now();
        let mut investment = Self {
            id: Uuid::new_v4(),
            investor_id,
            amount_invested_cents,
            expected_return_cents,
            expected_return_pct: 0.0,
            actual_return_cents: 0,
            status: InvestmentStatus::Pending,
            returns: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        investment.recompute();
        Ok(investment)
    }

    fn recompute(&mut self) {
        self.expected_return_pct = if self.amount_invested_cents > 0 {
            self.expected_return_cents as f64 / self.amount_invested_cents as f64 * 100.0
        } else {
            0.0
        };
    }

    /// Change the amount invested and/or the expected return
    pub fn revise(
        &mut self,
        amount_invested_cents: Option<i64>,
        expected_return_cents: Option<i64>,
    ) -> Result<(), LoanError> {
        let amount = amount_invested_cents.unwrap_or(self.amount_invested_cents);
        let expected = expected_return_cents.unwrap_or(self.expected_return_cents);
        if amount <= 0 {
            return Err(LoanError::invalid("amount invested must be greater than 0"));
        }
        if expected < 0 {
            return Err(LoanError::invalid("expected return cannot be negative"));
        }

        self.amount_invested_cents = amount;
        self.expected_return_cents = expected;
        self.recompute();
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn activate(&mut self) -> Result<(), LoanError> {
        if self.status != InvestmentStatus::Pending {
            return Err(LoanError::invalid("only pending investments can be activated"));
        }
        self.status = InvestmentStatus::Active;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a return paid out on an active investment
    pub fn record_return(&mut self, kind: ReturnKind, amount_cents: i64) -> Result<(), LoanError> {
        if self.status != InvestmentStatus::Active {
            return Err(LoanError::invalid("returns can only be recorded on active investments"));
        }
        if amount_cents <= 0 {
            return Err(LoanError::invalid("return amount must be greater than 0"));
        }

        let now = Utc::now();
        self.returns.push(InvestmentReturn {
            kind,
            amount_cents,
            recorded_at: now,
        });
        self.actual_return_cents += amount_cents;
        self.updated_at = now;
        Ok(())
    }
}
