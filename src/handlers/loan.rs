//! Loan API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::loan::{
    ChamaLoanRequest, Loan, LoanAction, LoanApplicationRequest, LoanFilter, LoanQuote,
    QuoteRequest, ScheduledInstallment, UpdateTermsRequest,
};
use crate::middleware::AuthenticatedUser;
use crate::models::{Actor, ApiResponse, PaginatedResponse};
use crate::mpesa::MpesaTransaction;
use crate::state::AppState;
use crate::websocket::LiveEvent;

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct PayoutDetailsBody {
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct RepaymentBody {
    pub amount_cents: i64,
}

pub async fn quote_loan(
    State(app_state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<ApiResponse<LoanQuote>>, ApiError> {
    let quote = app_state.loan_service.quote(&request)?;
    Ok(Json(ApiResponse::ok(quote)))
}

pub async fn apply_individual(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<LoanApplicationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Loan>>), ApiError> {
    let loan = app_state
        .loan_service
        .apply_individual(&user.actor, request)
        .await?;
    app_state.ws_state.broadcast_event(LiveEvent::loan_updated(&loan));

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(loan))))
}

pub async fn apply_chama(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(chama_id): Path<Uuid>,
    Json(request): Json<ChamaLoanRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Loan>>), ApiError> {
    let loan = app_state
        .loan_service
        .apply_chama(&user.actor, chama_id, request)
        .await?;
    app_state.ws_state.broadcast_event(LiveEvent::loan_updated(&loan));

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(loan))))
}

pub async fn list_loans(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Query(filter): Query<LoanFilter>,
) -> Result<Json<ApiResponse<PaginatedResponse<Loan>>>, ApiError> {
    let page = app_state.loan_service.list(&user.actor, filter).await?;
    Ok(Json(ApiResponse::ok(page)))
}

pub async fn get_loan(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Loan>>, ApiError> {
    let loan = app_state.loan_service.get(&user.actor, id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

pub async fn get_schedule(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<ScheduledInstallment>>>, ApiError> {
    let schedule = app_state.loan_service.schedule(&user.actor, id).await?;
    Ok(Json(ApiResponse::ok(schedule)))
}

pub async fn list_transactions(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<MpesaTransaction>>>, ApiError> {
    let txs = app_state.loan_service.transactions(&user.actor, id).await?;
    Ok(Json(ApiResponse::ok(txs)))
}

pub async fn update_terms(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(edit): Json<UpdateTermsRequest>,
) -> Result<Json<ApiResponse<Loan>>, ApiError> {
    let loan = app_state
        .loan_service
        .update_terms(&user.actor, id, edit)
        .await?;
    app_state.ws_state.broadcast_event(LiveEvent::loan_updated(&loan));

    Ok(Json(ApiResponse::ok(loan)))
}

async fn perform(
    app_state: &AppState,
    actor: &Actor,
    id: Uuid,
    action: LoanAction,
) -> Result<Json<ApiResponse<Loan>>, ApiError> {
    let loan = app_state.loan_service.perform(actor, id, action).await?;
    app_state.ws_state.broadcast_event(LiveEvent::loan_updated(&loan));

    Ok(Json(ApiResponse::ok(loan)))
}

pub async fn approve_loan(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Loan>>, ApiError> {
    perform(&app_state, &user.actor, id, LoanAction::Approve).await
}

pub async fn reject_loan(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectBody>,
) -> Result<Json<ApiResponse<Loan>>, ApiError> {
    let action = LoanAction::Reject {
        reason: body.reason,
    };
    perform(&app_state, &user.actor, id, action).await
}

pub async fn provide_payout_details(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<PayoutDetailsBody>,
) -> Result<Json<ApiResponse<Loan>>, ApiError> {
    let action = LoanAction::ProvidePayoutDetails { phone: body.phone };
    perform(&app_state, &user.actor, id, action).await
}

pub async fn disburse_loan(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Loan>>, ApiError> {
    perform(&app_state, &user.actor, id, LoanAction::Disburse).await
}

pub async fn record_repayment(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(body): Json<RepaymentBody>,
) -> Result<Json<ApiResponse<Loan>>, ApiError> {
    let action = LoanAction::RecordRepayment {
        amount_cents: body.amount_cents,
    };
    perform(&app_state, &user.actor, id, action).await
}

pub async fn mark_defaulted(
    State(app_state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Loan>>, ApiError> {
    perform(&app_state, &user.actor, id, LoanAction::MarkDefaulted).await
}
