//! Loan terms calculator
//!
//! Standard annuity formula shared by individual applications and chama
//! loans. Values are returned unrounded; callers round at the currency
//! boundary (see [`super::money`]).

use serde::{Deserialize, Serialize};

use super::error::LoanError;

/// Monthly payment and total repayment for a set of loan terms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Amortization {
    pub monthly_rate: f64,
    pub monthly_payment: f64,
    pub total_repayment: f64,
}

impl Amortization {
    /// Total interest paid over the term
    pub fn total_interest(&self, principal: f64) -> f64 {
        self.total_repayment - principal
    }
}

/// One row of an amortization schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub number: u32,
    pub payment: f64,
    pub interest: f64,
    pub principal: f64,
    pub balance: f64,
}

fn validate_terms(principal: f64, annual_rate_pct: f64, term_months: u32) -> Result<(), LoanError> {
    if term_months < 1 {
        return Err(LoanError::invalid("term must be at least 1 month"));
    }
    if !principal.is_finite() || principal <= 0.0 {
        return Err(LoanError::invalid("principal must be greater than 0"));
    }
    if !annual_rate_pct.is_finite() || annual_rate_pct < 0.0 {
        return Err(LoanError::invalid("interest rate cannot be negative"));
    }
    Ok(())
}

/// Compute the fixed monthly payment and total repayment.
///
/// `annual_rate_pct` is a percentage (`18.0` is 18% a year). A zero rate
/// takes the linear branch `principal / term`.
pub fn compute_amortization(
    principal: f64,
    annual_rate_pct: f64,
    term_months: u32,
) -> Result<Amortization, LoanError> {
    validate_terms(principal, annual_rate_pct, term_months)?;

    let monthly_rate = annual_rate_pct / 100.0 / 12.0;
    let n = term_months as f64;

    let monthly_payment = if monthly_rate == 0.0 {
        principal / n
    } else {
        let exponent = i32::try_from(term_months)
            .map_err(|_| LoanError::invalid("term is too long"))?;
        let factor = (1.0 + monthly_rate).powi(exponent);
        principal * monthly_rate * factor / (factor - 1.0)
    };
    let total_repayment = monthly_payment * n;

    // Extreme rates or terms overflow the annuity factor
    if !monthly_payment.is_finite()
        || monthly_payment <= 0.0
        || !total_repayment.is_finite()
        || total_repayment <= 0.0
    {
        return Err(LoanError::invalid("loan terms are out of range"));
    }

    Ok(Amortization {
        monthly_rate,
        monthly_payment,
        total_repayment,
    })
}

/// Break the loan into per-month installments.
///
/// The last installment clears whatever balance is left so the schedule
/// always closes at exactly zero.
pub fn amortization_schedule(
    principal: f64,
    annual_rate_pct: f64,
    term_months: u32,
) -> Result<Vec<Installment>, LoanError> {
    let terms = compute_amortization(principal, annual_rate_pct, term_months)?;

    let mut balance = principal;
    let mut rows = Vec::with_capacity(term_months as usize);

    for number in 1..=term_months {
        let interest = balance * terms.monthly_rate;
        let (payment, principal_part) = if number == term_months {
            (balance + interest, balance)
        } else {
            (terms.monthly_payment, terms.monthly_payment - interest)
        };
        balance = if number == term_months {
            0.0
        } else {
            balance - principal_part
        };

        rows.push(Installment {
            number,
            payment,
            interest,
            principal: principal_part,
            balance,
        });
    }

    Ok(rows)
}
