//! Loan lifecycle state machine
//!
//! Every status change goes through [`transition`], which pattern-matches
//! (current status, action) and either returns the next loan record or a
//! [`LoanError`]. Nothing else in the crate assigns `Loan::status`.
//!
//! ```text
//! pending ──approve──▶ approved ──payout details──▶ ready_to_disburse ──disburse──▶ active ──repaid──▶ completed
//!    └──reject──▶ rejected            (any non-terminal state) ──mark_defaulted──▶ defaulted
//! ```

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::LoanError;
use super::model::Loan;
use crate::models::{Actor, UserRole};
use crate::mpesa::normalize_msisdn;

/// Rejection reasons shorter than this are refused
pub const MIN_REJECTION_REASON_LEN: usize = 10;

/// Loan status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "loan_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    /// Approved, waiting for the borrower's payout number
    Approved,
    ReadyToDisburse,
    /// Funds sent, repayments open
    Active,
    Completed,
    Rejected,
    Defaulted,
}

impl LoanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Completed | LoanStatus::Rejected | LoanStatus::Defaulted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::ReadyToDisburse => "ready_to_disburse",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Defaulted => "defaulted",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload-free action discriminant, used by the authorization policy
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Approve,
    Reject,
    ProvidePayoutDetails,
    Disburse,
    RecordRepayment,
    MarkDefaulted,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Approve => "approve",
            ActionKind::Reject => "reject",
            ActionKind::ProvidePayoutDetails => "provide payout details for",
            ActionKind::Disburse => "disburse",
            ActionKind::RecordRepayment => "record a repayment on",
            ActionKind::MarkDefaulted => "mark as defaulted",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested lifecycle action
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LoanAction {
    Approve,
    Reject { reason: String },
    ProvidePayoutDetails { phone: String },
    Disburse,
    RecordRepayment { amount_cents: i64 },
    MarkDefaulted,
}

impl LoanAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            LoanAction::Approve => ActionKind::Approve,
            LoanAction::Reject { .. } => ActionKind::Reject,
            LoanAction::ProvidePayoutDetails { .. } => ActionKind::ProvidePayoutDetails,
            LoanAction::Disburse => ActionKind::Disburse,
            LoanAction::RecordRepayment { .. } => ActionKind::RecordRepayment,
            LoanAction::MarkDefaulted => ActionKind::MarkDefaulted,
        }
    }
}

/// Role policy: may this role attempt this action at all?
///
/// Ownership (borrower-only actions) is checked separately in
/// [`transition`] because it needs the loan.
pub fn authorize(role: UserRole, action: ActionKind) -> bool {
    match action {
        ActionKind::Approve | ActionKind::Reject | ActionKind::Disburse => role.is_official(),
        ActionKind::MarkDefaulted => role.is_official() || role == UserRole::System,
        ActionKind::ProvidePayoutDetails => role != UserRole::System,
        ActionKind::RecordRepayment => true,
    }
}

fn check_ownership(loan: &Loan, kind: ActionKind, actor: &Actor) -> Result<(), LoanError> {
    let is_borrower = actor.user_id == loan.borrower_id;
    match kind {
        ActionKind::ProvidePayoutDetails if !is_borrower => Err(LoanError::Unauthorized(
            "only the borrower can supply payout details".to_string(),
        )),
        ActionKind::RecordRepayment
            if !is_borrower && !actor.role.is_official() && actor.role != UserRole::System =>
        {
            Err(LoanError::Unauthorized(
                "only the borrower or a chama official can record repayments".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

/// Apply `action` to `loan` on behalf of `actor`.
///
/// Returns the updated record; the input is never modified, so a failed
/// transition leaves the caller's loan untouched.
pub fn transition(
    loan: &Loan,
    action: &LoanAction,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Loan, LoanError> {
    let kind = action.kind();

    if !authorize(actor.role, kind) {
        return Err(LoanError::Unauthorized(format!(
            "{} cannot {} a loan",
            actor.role, kind
        )));
    }
    check_ownership(loan, kind, actor)?;

    let mut next = loan.clone();
    next.updated_at = now;

    match (loan.status, action) {
        (LoanStatus::Pending, LoanAction::Approve) => {
            next.status = LoanStatus::Approved;
            next.approved_by = Some(actor.user_id);
            next.approved_at = Some(now);
        }
        (LoanStatus::Pending, LoanAction::Reject { reason }) => {
            let reason = reason.trim();
            if reason.chars().count() < MIN_REJECTION_REASON_LEN {
                return Err(LoanError::invalid(format!(
                    "rejection reason must be at least {} characters",
                    MIN_REJECTION_REASON_LEN
                )));
            }
            next.status = LoanStatus::Rejected;
            next.rejection_reason = Some(reason.to_string());
            next.rejected_at = Some(now);
        }
        (LoanStatus::Approved, LoanAction::ProvidePayoutDetails { phone }) => {
            if loan.payout_number.is_some() {
                return Err(LoanError::InvalidTransition {
                    from: loan.status,
                    action: kind,
                });
            }
            let msisdn = normalize_msisdn(phone)
                .ok_or_else(|| LoanError::invalid(format!("'{}' is not a valid phone number", phone)))?;
            next.payout_number = Some(msisdn);
            next.status = LoanStatus::ReadyToDisburse;
        }
        (LoanStatus::Approved, LoanAction::Disburse) => {
            return Err(LoanError::MissingPayoutDetails);
        }
        (LoanStatus::ReadyToDisburse, LoanAction::Disburse) => {
            if loan.payout_number.is_none() {
                return Err(LoanError::MissingPayoutDetails);
            }
            if loan.disbursed {
                return Err(LoanError::InvalidTransition {
                    from: loan.status,
                    action: kind,
                });
            }
            let due_at = now
                .checked_add_months(Months::new(loan.term_months))
                .ok_or_else(|| LoanError::invalid("due date out of range"))?;
            next.disbursed = true;
            next.disbursed_at = Some(now);
            next.due_at = Some(due_at);
            next.status = LoanStatus::Active;
        }
        (LoanStatus::Active, LoanAction::RecordRepayment { amount_cents }) => {
            let amount_cents = *amount_cents;
            if amount_cents <= 0 {
                return Err(LoanError::invalid("repayment amount must be greater than 0"));
            }
            let remaining_cents = loan.remaining_cents();
            if amount_cents > remaining_cents {
                return Err(LoanError::Overpayment {
                    amount_cents,
                    remaining_cents,
                });
            }
            next.repaid_cents += amount_cents;
            if next.repaid_cents >= next.total_repayment_cents {
                next.status = LoanStatus::Completed;
                next.completed_at = Some(now);
            }
        }
        (status, LoanAction::MarkDefaulted) if !status.is_terminal() => {
            next.status = LoanStatus::Defaulted;
            next.defaulted_at = Some(now);
        }
        (from, _) => {
            return Err(LoanError::InvalidTransition { from, action: kind });
        }
    }

    Ok(next)
}
