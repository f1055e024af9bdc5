//! Domain errors raised by the calculator, the risk scorer and the
//! lifecycle state machine.

use thiserror::Error;

use super::lifecycle::{ActionKind, LoanStatus};

/// Local validation failures. None of these are transient.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoanError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cannot {action} a loan that is {from}")]
    InvalidTransition { from: LoanStatus, action: ActionKind },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Repayment of {amount_cents} cents exceeds the remaining balance of {remaining_cents} cents")]
    Overpayment {
        amount_cents: i64,
        remaining_cents: i64,
    },

    #[error("Borrower has not supplied payout details")]
    MissingPayoutDetails,
}

impl LoanError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        LoanError::InvalidInput(message.into())
    }
}
