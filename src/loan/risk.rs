//! Risk and eligibility scoring for individual loan applications
//!
//! A small point system over debt-to-income, employment tenure and
//! collateral. The resulting tier selects the default interest rate when the
//! applicant did not negotiate one.

use serde::{Deserialize, Serialize};

use super::error::LoanError;

/// Debt-to-income above this adds the most points
const DTI_HIGH_THRESHOLD: f64 = 0.5;

/// Debt-to-income above this adds some points
const DTI_ELEVATED_THRESHOLD: f64 = 0.3;

/// Employment shorter than this (months) is treated as unstable
const SHORT_EMPLOYMENT_MONTHS: u32 = 6;

/// Employment shorter than this (months) is treated as settling in
const RECENT_EMPLOYMENT_MONTHS: u32 = 12;

const HIGH_RISK_SCORE: i32 = 4;
const MEDIUM_RISK_SCORE: i32 = 2;

/// Risk tier of an application
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RiskRating {
    Low,
    Medium,
    High,
}

impl RiskRating {
    pub fn from_score(score: i32) -> Self {
        if score >= HIGH_RISK_SCORE {
            RiskRating::High
        } else if score >= MEDIUM_RISK_SCORE {
            RiskRating::Medium
        } else {
            RiskRating::Low
        }
    }

    /// Annual interest rate (%) applied when the caller supplies none
    pub fn default_rate_pct(&self) -> f64 {
        match self {
            RiskRating::Low => 12.0,
            RiskRating::Medium => 18.0,
            RiskRating::High => 24.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskRating::Low => "low",
            RiskRating::Medium => "medium",
            RiskRating::High => "high",
        }
    }
}

/// Inputs to the scorer, in whole currency units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskInputs {
    pub monthly_income: f64,
    pub loan_amount: f64,
    pub term_months: u32,
    pub employment_length_months: u32,
    pub has_collateral: bool,
}

/// Scorer output, stored on the application
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct RiskAssessment {
    pub rating: RiskRating,
    pub score: i32,
    pub debt_to_income_ratio: f64,
    pub default_rate_pct: f64,
}

/// Score an application.
pub fn score_risk(inputs: &RiskInputs) -> Result<RiskAssessment, LoanError> {
    if inputs.term_months < 1 {
        return Err(LoanError::invalid("term must be at least 1 month"));
    }
    if !inputs.monthly_income.is_finite() || inputs.monthly_income <= 0.0 {
        return Err(LoanError::invalid("monthly income must be greater than 0"));
    }
    if !inputs.loan_amount.is_finite() || inputs.loan_amount <= 0.0 {
        return Err(LoanError::invalid("loan amount must be greater than 0"));
    }

    let debt_to_income_ratio =
        (inputs.loan_amount / inputs.term_months as f64) / inputs.monthly_income;

    let mut score = 0;

    if debt_to_income_ratio > DTI_HIGH_THRESHOLD {
        score += 3;
    } else if debt_to_income_ratio > DTI_ELEVATED_THRESHOLD {
        score += 2;
    }

    if inputs.employment_length_months < SHORT_EMPLOYMENT_MONTHS {
        score += 2;
    } else if inputs.employment_length_months < RECENT_EMPLOYMENT_MONTHS {
        score += 1;
    }

    if inputs.has_collateral {
        score -= 1;
    }

    let rating = RiskRating::from_score(score);

    Ok(RiskAssessment {
        rating,
        score,
        debt_to_income_ratio,
        default_rate_pct: rating.default_rate_pct(),
    })
}
