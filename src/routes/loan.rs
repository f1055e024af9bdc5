//! Loan route definitions

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn loan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/loans/quote", post(quote_loan))
        .route("/api/loans/applications", post(apply_individual))
        .route("/api/chamas/:chama_id/loans", post(apply_chama))
        .route("/api/loans", get(list_loans))
        .route("/api/loans/:id", get(get_loan))
        .route("/api/loans/:id/schedule", get(get_schedule))
        .route("/api/loans/:id/transactions", get(list_transactions))
        .route("/api/loans/:id/terms", put(update_terms))
        .route("/api/loans/:id/approve", post(approve_loan))
        .route("/api/loans/:id/reject", post(reject_loan))
        .route("/api/loans/:id/payout-details", post(provide_payout_details))
        .route("/api/loans/:id/disburse", post(disburse_loan))
        .route("/api/loans/:id/repayments", post(record_repayment))
        .route("/api/loans/:id/default", post(mark_defaulted))
        .route("/api/notifications", get(list_notifications))
}
