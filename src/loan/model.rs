//! Loan records and request DTOs
//!
//! Individual applications and chama loans share one record; the
//! kind-specific fields live in [`LoanOrigin`]. Derived financial fields are
//! only ever written by [`Loan::reprice`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::amortization::{amortization_schedule, compute_amortization};
use super::error::LoanError;
use super::lifecycle::LoanStatus;
use super::money::{to_cents, to_units};
use super::risk::{score_risk, RiskAssessment, RiskInputs};

/// Default annual rate (%) for chama loans when none is agreed
pub const CHAMA_DEFAULT_RATE_PCT: f64 = 5.0;

/// Smallest individual application, in cents (1,000 currency units)
pub const MIN_APPLICATION_CENTS: i64 = 100_000;

/// Longest individual application term, in months
pub const MAX_APPLICATION_TERM_MONTHS: u32 = 60;

/// Longest term any loan may carry, in months
pub const MAX_TERM_MONTHS: u32 = 120;

/// Loan record
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Loan {
    pub id: Uuid,
    /// Optimistic concurrency token, bumped by the store on every write
    pub version: i64,
    pub borrower_id: Uuid,
    pub origin: LoanOrigin,
    pub purpose: Option<String>,
    pub principal_cents: i64,
    pub interest_rate_pct: f64,
    /// False when the rate came from a default table and should follow
    /// recomputation
    pub rate_supplied: bool,
    pub term_months: u32,
    pub monthly_payment_cents: i64,
    pub total_repayment_cents: i64,
    pub repaid_cents: i64,
    pub status: LoanStatus,
    pub payout_number: Option<String>,
    pub disbursed: bool,
    pub disbursement_reference: Option<String>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub defaulted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where the loan came from
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoanOrigin {
    /// Bank-style application scored on income and tenure
    Individual(ApplicantProfile),
    /// Group-internal loan backed by guarantors
    Chama(ChamaDetails),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ApplicantProfile {
    pub national_id: String,
    pub phone: String,
    pub email: Option<String>,
    pub monthly_income_cents: i64,
    pub employment_length_months: u32,
    pub has_collateral: bool,
    pub risk: RiskAssessment,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChamaDetails {
    pub chama_id: Uuid,
    pub guarantors: Vec<Guarantor>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Guarantor {
    pub member_id: Uuid,
    pub guarantee_cents: i64,
    pub status: GuarantorStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuarantorStatus {
    Pending,
    Accepted,
    Declined,
}

/// Installment of a loan's schedule, in cents
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ScheduledInstallment {
    pub number: u32,
    pub payment_cents: i64,
    pub interest_cents: i64,
    pub principal_cents: i64,
    pub balance_cents: i64,
}

impl Loan {
    fn blank(
        borrower_id: Uuid,
        origin: LoanOrigin,
        purpose: Option<String>,
        principal_cents: i64,
        interest_rate_pct: Option<f64>,
        term_months: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: 1,
            borrower_id,
            origin,
            purpose,
            principal_cents,
            interest_rate_pct: interest_rate_pct.unwrap_or(0.0),
            rate_supplied: interest_rate_pct.is_some(),
            term_months,
            monthly_payment_cents: 0,
            total_repayment_cents: 0,
            repaid_cents: 0,
            status: LoanStatus::Pending,
            payout_number: None,
            disbursed: false,
            disbursement_reference: None,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            rejected_at: None,
            disbursed_at: None,
            due_at: None,
            completed_at: None,
            defaulted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a pending individual application: validate, score, amortize.
    pub fn new_individual(
        borrower_id: Uuid,
        request: &LoanApplicationRequest,
        now: DateTime<Utc>,
    ) -> Result<Self, LoanError> {
        let risk = score_risk(&RiskInputs {
            monthly_income: to_units(request.monthly_income_cents),
            loan_amount: to_units(request.loan_amount_cents),
            term_months: request.loan_term_months,
            employment_length_months: request.employment_length_months,
            has_collateral: request.has_collateral,
        })?;

        let profile = ApplicantProfile {
            national_id: request.national_id.trim().to_string(),
            phone: request.phone.trim().to_string(),
            email: request.email.clone(),
            monthly_income_cents: request.monthly_income_cents,
            employment_length_months: request.employment_length_months,
            has_collateral: request.has_collateral,
            risk,
        };

        let mut loan = Self::blank(
            borrower_id,
            LoanOrigin::Individual(profile),
            request.purpose.clone(),
            request.loan_amount_cents,
            request.interest_rate_pct,
            request.loan_term_months,
            now,
        );
        loan.reprice()?;
        Ok(loan)
    }

    /// Build a pending chama loan.
    pub fn new_chama(
        borrower_id: Uuid,
        chama_id: Uuid,
        request: &ChamaLoanRequest,
        now: DateTime<Utc>,
    ) -> Result<Self, LoanError> {
        let mut guarantors = Vec::with_capacity(request.guarantors.len());
        for g in &request.guarantors {
            if g.member_id == borrower_id {
                return Err(LoanError::invalid("borrower cannot guarantee their own loan"));
            }
            if g.guarantee_cents <= 0 {
                return Err(LoanError::invalid("guarantee amount must be greater than 0"));
            }
            if guarantors.iter().any(|x: &Guarantor| x.member_id == g.member_id) {
                return Err(LoanError::invalid("duplicate guarantor"));
            }
            guarantors.push(Guarantor {
                member_id: g.member_id,
                guarantee_cents: g.guarantee_cents,
                status: GuarantorStatus::Pending,
            });
        }

        let mut loan = Self::blank(
            borrower_id,
            LoanOrigin::Chama(ChamaDetails {
                chama_id,
                guarantors,
            }),
            Some(request.purpose.trim().to_string()),
            request.amount_cents,
            request.interest_rate_pct,
            request.duration_months,
            now,
        );
        loan.reprice()?;
        Ok(loan)
    }

    fn validate_terms(&self) -> Result<(), LoanError> {
        if self.term_months < 1 {
            return Err(LoanError::invalid("term must be at least 1 month"));
        }
        if self.term_months > MAX_TERM_MONTHS {
            return Err(LoanError::invalid(format!(
                "loan term cannot exceed {} months",
                MAX_TERM_MONTHS
            )));
        }
        if self.principal_cents <= 0 {
            return Err(LoanError::invalid("amount must be greater than 0"));
        }
        if let LoanOrigin::Individual(_) = self.origin {
            if self.principal_cents < MIN_APPLICATION_CENTS {
                return Err(LoanError::invalid(format!(
                    "loan amount must be at least {}",
                    to_units(MIN_APPLICATION_CENTS)
                )));
            }
            if self.term_months > MAX_APPLICATION_TERM_MONTHS {
                return Err(LoanError::invalid(format!(
                    "loan term cannot exceed {} months",
                    MAX_APPLICATION_TERM_MONTHS
                )));
            }
        }
        if self.rate_supplied
            && (!self.interest_rate_pct.is_finite() || self.interest_rate_pct < 0.0)
        {
            return Err(LoanError::invalid("interest rate cannot be negative"));
        }
        Ok(())
    }

    /// Recompute every derived field from the current terms.
    ///
    /// Order is fixed: validate, score (individual only), select the rate,
    /// amortize.
    pub fn reprice(&mut self) -> Result<(), LoanError> {
        self.validate_terms()?;

        match &mut self.origin {
            LoanOrigin::Individual(profile) => {
                let risk = score_risk(&RiskInputs {
                    monthly_income: to_units(profile.monthly_income_cents),
                    loan_amount: to_units(self.principal_cents),
                    term_months: self.term_months,
                    employment_length_months: profile.employment_length_months,
                    has_collateral: profile.has_collateral,
                })?;
                profile.risk = risk;
                if !self.rate_supplied {
                    self.interest_rate_pct = risk.default_rate_pct;
                }
            }
            LoanOrigin::Chama(_) => {
                if !self.rate_supplied {
                    self.interest_rate_pct = CHAMA_DEFAULT_RATE_PCT;
                }
            }
        }

        let terms = compute_amortization(
            to_units(self.principal_cents),
            self.interest_rate_pct,
            self.term_months,
        )?;
        self.monthly_payment_cents = to_cents(terms.monthly_payment);
        self.total_repayment_cents = to_cents(terms.total_repayment);
        Ok(())
    }

    /// Apply an edit to a pending loan and reprice it.
    pub fn apply_edit(&self, edit: &UpdateTermsRequest, now: DateTime<Utc>) -> Result<Self, LoanError> {
        if self.status != LoanStatus::Pending {
            return Err(LoanError::invalid(format!(
                "terms can only change while a loan is pending (currently {})",
                self.status
            )));
        }

        let mut next = self.clone();
        if let Some(amount) = edit.amount_cents {
            next.principal_cents = amount;
        }
        if let Some(term) = edit.term_months {
            next.term_months = term;
        }
        if let Some(rate) = edit.interest_rate_pct {
            next.interest_rate_pct = rate;
            next.rate_supplied = true;
        }

        let touches_profile = edit.monthly_income_cents.is_some()
            || edit.employment_length_months.is_some()
            || edit.has_collateral.is_some();
        match &mut next.origin {
            LoanOrigin::Individual(profile) => {
                if let Some(income) = edit.monthly_income_cents {
                    profile.monthly_income_cents = income;
                }
                if let Some(months) = edit.employment_length_months {
                    profile.employment_length_months = months;
                }
                if let Some(collateral) = edit.has_collateral {
                    profile.has_collateral = collateral;
                }
            }
            LoanOrigin::Chama(_) if touches_profile => {
                return Err(LoanError::invalid(
                    "income, employment and collateral only apply to individual applications",
                ));
            }
            LoanOrigin::Chama(_) => {}
        }

        next.reprice()?;
        next.updated_at = now;
        Ok(next)
    }

    /// Outstanding amount, never negative
    pub fn remaining_cents(&self) -> i64 {
        (self.total_repayment_cents - self.repaid_cents).max(0)
    }

    pub fn national_id(&self) -> Option<&str> {
        match &self.origin {
            LoanOrigin::Individual(profile) => Some(&profile.national_id),
            LoanOrigin::Chama(_) => None,
        }
    }

    pub fn chama_id(&self) -> Option<Uuid> {
        match &self.origin {
            LoanOrigin::Chama(details) => Some(details.chama_id),
            LoanOrigin::Individual(_) => None,
        }
    }

    /// Borrower, or a guarantor of a chama loan
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.borrower_id == user_id
            || match &self.origin {
                LoanOrigin::Chama(details) => {
                    details.guarantors.iter().any(|g| g.member_id == user_id)
                }
                LoanOrigin::Individual(_) => false,
            }
    }

    pub fn risk(&self) -> Option<&RiskAssessment> {
        match &self.origin {
            LoanOrigin::Individual(profile) => Some(&profile.risk),
            LoanOrigin::Chama(_) => None,
        }
    }

    /// Month-by-month breakdown of the loan, in cents
    pub fn schedule(&self) -> Result<Vec<ScheduledInstallment>, LoanError> {
        schedule_cents(self.principal_cents, self.interest_rate_pct, self.term_months)
    }
}

/// Amortization schedule for the given terms, rounded to cents per row
pub fn schedule_cents(
    principal_cents: i64,
    annual_rate_pct: f64,
    term_months: u32,
) -> Result<Vec<ScheduledInstallment>, LoanError> {
    let rows = amortization_schedule(to_units(principal_cents), annual_rate_pct, term_months)?;
    Ok(rows
        .into_iter()
        .map(|row| ScheduledInstallment {
            number: row.number,
            payment_cents: to_cents(row.payment),
            interest_cents: to_cents(row.interest),
            principal_cents: to_cents(row.principal),
            balance_cents: to_cents(row.balance),
        })
        .collect())
}

/// Request to submit an individual loan application
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoanApplicationRequest {
    #[validate(length(min = 5, max = 20))]
    pub national_id: String,
    #[validate(length(min = 9, max = 15))]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(range(min = 1))]
    pub monthly_income_cents: i64,
    #[validate(range(min = 100000))]
    pub loan_amount_cents: i64,
    #[validate(range(min = 1, max = 60))]
    pub loan_term_months: u32,
    pub employment_length_months: u32,
    #[serde(default)]
    pub has_collateral: bool,
    pub interest_rate_pct: Option<f64>,
    pub purpose: Option<String>,
}

/// Request to borrow from a chama
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChamaLoanRequest {
    #[validate(range(min = 1))]
    pub amount_cents: i64,
    pub interest_rate_pct: Option<f64>,
    #[validate(range(min = 1, max = 120))]
    pub duration_months: u32,
    #[validate(length(min = 3, max = 500))]
    pub purpose: String,
    #[serde(default)]
    pub guarantors: Vec<GuarantorRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuarantorRequest {
    pub member_id: Uuid,
    pub guarantee_cents: i64,
}

/// Edit of a pending loan's financial inputs
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateTermsRequest {
    #[validate(range(min = 1))]
    pub amount_cents: Option<i64>,
    pub interest_rate_pct: Option<f64>,
    #[validate(range(min = 1, max = 120))]
    pub term_months: Option<u32>,
    #[validate(range(min = 1))]
    pub monthly_income_cents: Option<i64>,
    pub employment_length_months: Option<u32>,
    pub has_collateral: Option<bool>,
}

/// Query for listing loans
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoanFilter {
    pub borrower_id: Option<Uuid>,
    pub chama_id: Option<Uuid>,
    pub status: Option<LoanStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Restrict to loans this user borrowed or guarantees. Set by the
    /// service for members, never taken from the query string.
    #[serde(skip)]
    pub visible_to: Option<Uuid>,
}

impl LoanFilter {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(20).clamp(1, 100)
    }

    /// Rows to skip. Computed in `u64` so any `page` from the query string
    /// is representable.
    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }

    pub fn matches(&self, loan: &Loan) -> bool {
        self.borrower_id.map_or(true, |id| loan.borrower_id == id)
            && self.chama_id.map_or(true, |id| loan.chama_id() == Some(id))
            && self.status.map_or(true, |s| loan.status == s)
            && self.visible_to.map_or(true, |id| loan.involves(id))
    }
}
