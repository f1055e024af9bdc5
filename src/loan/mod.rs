//! Loans: terms calculation, risk scoring, the lifecycle state machine and
//! the service that drives them against a store.

pub mod amortization;
mod error;
pub mod lifecycle;
mod model;
pub mod money;
pub mod risk;
mod service;
mod sweep;

pub use amortization::{amortization_schedule, compute_amortization, Amortization, Installment};
pub use error::LoanError;
pub use lifecycle::{authorize, transition, ActionKind, LoanAction, LoanStatus};
pub use model::*;
pub use risk::{score_risk, RiskAssessment, RiskInputs, RiskRating};
pub use service::{LoanQuote, LoanService, QuoteRequest};
pub use sweep::default_detector;
