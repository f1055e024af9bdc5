//! Loan service layer
//!
//! Creation and edits run validate → score → amortize → persist. Lifecycle
//! actions run read → [`transition`] → versioned write, then the side
//! effects (borrower notification, M-Pesa payout). Side-effect failures are
//! logged and never undo a committed transition.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::amortization::compute_amortization;
use super::error::LoanError;
use super::lifecycle::{transition, LoanAction, LoanStatus};
use super::model::{
    schedule_cents, ChamaLoanRequest, Loan, LoanApplicationRequest, LoanFilter, LoanOrigin,
    ScheduledInstallment, UpdateTermsRequest, CHAMA_DEFAULT_RATE_PCT,
};
use super::money::{parse_units, to_cents, to_units};
use super::risk::{score_risk, RiskAssessment, RiskInputs};
use crate::error::{ApiError, ApiResult};
use crate::models::{Actor, PaginatedResponse, UserRole};
use crate::mpesa::{
    C2bConfirmation, MpesaTransaction, PaymentGateway, PayoutRequest, TransactionKind,
    TransactionStatus,
};
use crate::notify::{NotificationCategory, NotificationRequest, Notifier};
use crate::store::{LoanStore, StoreError};

/// Terms to price without creating a loan. Supplying an income selects the
/// individual (risk-scored) path; otherwise chama defaults apply.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct QuoteRequest {
    #[validate(range(min = 1))]
    pub amount_cents: i64,
    #[validate(range(min = 1, max = 120))]
    pub term_months: u32,
    pub interest_rate_pct: Option<f64>,
    #[validate(range(min = 1))]
    pub monthly_income_cents: Option<i64>,
    pub employment_length_months: Option<u32>,
    #[serde(default)]
    pub has_collateral: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoanQuote {
    pub risk: Option<RiskAssessment>,
    pub interest_rate_pct: f64,
    pub monthly_payment_cents: i64,
    pub total_repayment_cents: i64,
    pub total_interest_cents: i64,
    pub schedule: Vec<ScheduledInstallment>,
}

/// Loan workflow over a store, a notifier and a payment gateway
pub struct LoanService {
    store: Arc<dyn LoanStore>,
    notifier: Arc<dyn Notifier>,
    gateway: Arc<dyn PaymentGateway>,
    grace_period: Duration,
}

impl LoanService {
    pub fn new(
        store: Arc<dyn LoanStore>,
        notifier: Arc<dyn Notifier>,
        gateway: Arc<dyn PaymentGateway>,
        grace_days: i64,
    ) -> Self {
        Self {
            store,
            notifier,
            gateway,
            grace_period: Duration::days(grace_days.max(0)),
        }
    }

    pub fn store(&self) -> &Arc<dyn LoanStore> {
        &self.store
    }

    /// Price a loan without persisting anything
    pub fn quote(&self, request: &QuoteRequest) -> ApiResult<LoanQuote> {
        request.validate()?;

        let risk = match request.monthly_income_cents {
            Some(income) => Some(score_risk(&RiskInputs {
                monthly_income: to_units(income),
                loan_amount: to_units(request.amount_cents),
                term_months: request.term_months,
                employment_length_months: request.employment_length_months.unwrap_or(0),
                has_collateral: request.has_collateral,
            })?),
            None => None,
        };

        let rate = request
            .interest_rate_pct
            .or(risk.map(|r| r.default_rate_pct))
            .unwrap_or(CHAMA_DEFAULT_RATE_PCT);

        let terms = compute_amortization(to_units(request.amount_cents), rate, request.term_months)?;
        let monthly_payment_cents = to_cents(terms.monthly_payment);
        let total_repayment_cents = to_cents(terms.total_repayment);

        Ok(LoanQuote {
            risk,
            interest_rate_pct: rate,
            monthly_payment_cents,
            total_repayment_cents,
            total_interest_cents: total_repayment_cents - request.amount_cents,
            schedule: schedule_cents(request.amount_cents, rate, request.term_months)?,
        })
    }

    /// Submit an individual loan application for `actor`
    pub async fn apply_individual(
        &self,
        actor: &Actor,
        request: LoanApplicationRequest,
    ) -> ApiResult<Loan> {
        request.validate()?;

        let loan = Loan::new_individual(actor.user_id, &request, Utc::now())?;
        let loan = self.store.insert_loan(&loan).await?;

        tracing::info!(
            loan_id = %loan.id,
            borrower_id = %loan.borrower_id,
            principal_cents = loan.principal_cents,
            rate = loan.interest_rate_pct,
            "Loan application submitted"
        );

        self.send(NotificationRequest {
            user_id: loan.borrower_id,
            loan_id: Some(loan.id),
            title: "Application received".to_string(),
            message: format!(
                "Your application for {:.2} over {} months is under review.",
                to_units(loan.principal_cents),
                loan.term_months
            ),
            category: NotificationCategory::Loan,
        })
        .await;

        Ok(loan)
    }

    /// Request a loan from chama `chama_id` on behalf of `actor`
    pub async fn apply_chama(
        &self,
        actor: &Actor,
        chama_id: Uuid,
        request: ChamaLoanRequest,
    ) -> ApiResult<Loan> {
        request.validate()?;

        let loan = Loan::new_chama(actor.user_id, chama_id, &request, Utc::now())?;
        let loan = self.store.insert_loan(&loan).await?;

        tracing::info!(
            loan_id = %loan.id,
            chama_id = %chama_id,
            borrower_id = %loan.borrower_id,
            principal_cents = loan.principal_cents,
            "Chama loan requested"
        );

        if let LoanOrigin::Chama(details) = &loan.origin {
            for guarantor in &details.guarantors {
                self.send(NotificationRequest {
                    user_id: guarantor.member_id,
                    loan_id: Some(loan.id),
                    title: "Guarantee requested".to_string(),
                    message: format!(
                        "You have been named as guarantor for {:.2} of a chama loan.",
                        to_units(guarantor.guarantee_cents)
                    ),
                    category: NotificationCategory::Loan,
                })
                .await;
            }
        }

        Ok(loan)
    }

    /// Edit the terms of a pending loan. Borrower or admin only.
    pub async fn update_terms(
        &self,
        actor: &Actor,
        id: Uuid,
        edit: UpdateTermsRequest,
    ) -> ApiResult<Loan> {
        edit.validate()?;

        let loan = self.load(id).await?;
        if actor.user_id != loan.borrower_id && actor.role != UserRole::Admin {
            return Err(LoanError::Unauthorized(
                "only the borrower or an admin can edit loan terms".to_string(),
            )
            .into());
        }

        let next = loan.apply_edit(&edit, Utc::now())?;
        let saved = self.store.update_loan(&next, loan.version).await?;

        tracing::info!(
            loan_id = %saved.id,
            version = saved.version,
            monthly_payment_cents = saved.monthly_payment_cents,
            "Loan terms updated"
        );
        Ok(saved)
    }

    /// Apply a lifecycle action. A concurrent write to the same loan makes
    /// this fail with a conflict and leaves the stored loan untouched.
    pub async fn perform(&self, actor: &Actor, id: Uuid, action: LoanAction) -> ApiResult<Loan> {
        let loan = self.load(id).await?;
        let next = transition(&loan, &action, actor, Utc::now())?;
        let mut saved = self.store.update_loan(&next, loan.version).await?;

        tracing::info!(
            loan_id = %saved.id,
            from = %loan.status,
            to = %saved.status,
            actor_role = %actor.role,
            version = saved.version,
            "Loan transition applied"
        );

        if let LoanAction::Disburse = action {
            saved = self.pay_out(saved).await;
        }

        self.notify_transition(&saved, &action).await;
        Ok(saved)
    }

    /// Apply an M-Pesa C2B confirmation as a repayment.
    ///
    /// The `TransID` is claimed with a pending transaction before the
    /// repayment is applied, so overlapping deliveries of one confirmation
    /// credit the loan once. Returns `None` when it was already claimed.
    pub async fn record_gateway_payment(
        &self,
        confirmation: &C2bConfirmation,
    ) -> ApiResult<Option<Loan>> {
        let loan_id = Uuid::parse_str(confirmation.bill_ref_number.trim()).map_err(|_| {
            ApiError::BadRequest(format!(
                "account reference '{}' is not a loan id",
                confirmation.bill_ref_number
            ))
        })?;
        let amount_cents = parse_units(&confirmation.trans_amount).ok_or_else(|| {
            ApiError::BadRequest(format!("invalid amount '{}'", confirmation.trans_amount))
        })?;

        // The claim references the loan, so it has to exist first
        self.load(loan_id).await?;

        let claim = MpesaTransaction::new(
            Some(loan_id),
            TransactionKind::C2b,
            TransactionStatus::Pending,
            confirmation.msisdn.clone(),
            amount_cents,
        )
        .with_reference(confirmation.trans_id.clone());
        match self.store.insert_transaction(&claim).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                tracing::info!(trans_id = %confirmation.trans_id, "Duplicate M-Pesa confirmation ignored");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let loan = match self
            .perform(
                &Actor::system(),
                loan_id,
                LoanAction::RecordRepayment { amount_cents },
            )
            .await
        {
            Ok(loan) => loan,
            Err(e) => {
                // Release the claim so a redelivery is evaluated afresh
                if let Err(release) = self.store.delete_transaction(claim.id).await {
                    tracing::error!(
                        trans_id = %confirmation.trans_id,
                        "Failed to release refused M-Pesa confirmation: {}",
                        release
                    );
                }
                return Err(e);
            }
        };

        let description = confirmation
            .transaction_type
            .clone()
            .unwrap_or_else(|| "Pay Bill".to_string());
        if let Err(e) = self
            .store
            .update_transaction_status(claim.id, TransactionStatus::Success, Some(&description))
            .await
        {
            tracing::error!(
                loan_id = %loan.id,
                trans_id = %confirmation.trans_id,
                "Repayment applied but transaction record failed: {}",
                e
            );
        }

        Ok(Some(loan))
    }

    /// Mark every active loan past its due date plus the grace period as
    /// defaulted. Loans modified concurrently are skipped until the next run.
    pub async fn detect_defaults(&self, now: DateTime<Utc>) -> ApiResult<Vec<Loan>> {
        let cutoff = now - self.grace_period;
        let overdue = self.store.overdue_loans(cutoff).await?;
        let system = Actor::system();

        let mut defaulted = Vec::with_capacity(overdue.len());
        for loan in overdue {
            let next = match transition(&loan, &LoanAction::MarkDefaulted, &system, now) {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!(loan_id = %loan.id, "Skipping overdue loan: {}", e);
                    continue;
                }
            };
            match self.store.update_loan(&next, loan.version).await {
                Ok(saved) => {
                    tracing::info!(loan_id = %saved.id, due_at = ?saved.due_at, "Loan defaulted");
                    self.notify_transition(&saved, &LoanAction::MarkDefaulted).await;
                    defaulted.push(saved);
                }
                Err(StoreError::VersionConflict { .. }) => {
                    tracing::debug!(loan_id = %loan.id, "Loan changed during default sweep");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(defaulted)
    }

    pub async fn get(&self, actor: &Actor, id: Uuid) -> ApiResult<Loan> {
        let loan = self.load(id).await?;
        ensure_visible(&loan, actor)?;
        Ok(loan)
    }

    /// Members see the loans they borrowed or guarantee, as with [`Self::get`]
    pub async fn list(&self, actor: &Actor, mut filter: LoanFilter) -> ApiResult<PaginatedResponse<Loan>> {
        filter.visible_to = match actor.role {
            UserRole::Member => Some(actor.user_id),
            _ => None,
        };
        let data = self.store.list_loans(&filter).await?;
        Ok(PaginatedResponse {
            data,
            page: filter.page(),
            limit: filter.limit(),
        })
    }

    pub async fn schedule(&self, actor: &Actor, id: Uuid) -> ApiResult<Vec<ScheduledInstallment>> {
        let loan = self.get(actor, id).await?;
        Ok(loan.schedule()?)
    }

    pub async fn transactions(&self, actor: &Actor, id: Uuid) -> ApiResult<Vec<MpesaTransaction>> {
        let loan = self.get(actor, id).await?;
        Ok(self.store.list_transactions(loan.id).await?)
    }

    async fn load(&self, id: Uuid) -> ApiResult<Loan> {
        self.store
            .get_loan(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Loan {} not found", id)))
    }

    /// Send the disbursed amount to the borrower's payout number and record
    /// the attempt. Returns the loan as stored afterwards.
    async fn pay_out(&self, loan: Loan) -> Loan {
        let Some(phone) = loan.payout_number.clone() else {
            return loan;
        };

        let request = PayoutRequest {
            phone: phone.clone(),
            amount_cents: loan.principal_cents,
            reference: loan.id.to_string(),
            remarks: "Loan disbursement".to_string(),
        };

        let tx = match self.gateway.initiate_payout(&request).await {
            Ok(receipt) => {
                tracing::info!(
                    loan_id = %loan.id,
                    reference = %receipt.external_reference,
                    "Payout accepted by gateway"
                );
                MpesaTransaction::new(
                    Some(loan.id),
                    TransactionKind::B2c,
                    TransactionStatus::Success,
                    phone,
                    loan.principal_cents,
                )
                .with_reference(receipt.external_reference)
                .with_description(receipt.description)
            }
            Err(e) => {
                tracing::warn!(loan_id = %loan.id, "Payout failed, loan stays active: {}", e);
                MpesaTransaction::new(
                    Some(loan.id),
                    TransactionKind::B2c,
                    TransactionStatus::Failed,
                    phone,
                    loan.principal_cents,
                )
                .with_description(e.to_string())
            }
        };

        if let Err(e) = self.store.insert_transaction(&tx).await {
            tracing::warn!(loan_id = %loan.id, "Failed to record payout transaction: {}", e);
        }

        let Some(reference) = tx.external_reference else {
            return loan;
        };
        let mut next = loan.clone();
        next.disbursement_reference = Some(reference);
        next.updated_at = Utc::now();
        match self.store.update_loan(&next, loan.version).await {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(loan_id = %loan.id, "Failed to store disbursement reference: {}", e);
                loan
            }
        }
    }

    async fn notify_transition(&self, loan: &Loan, action: &LoanAction) {
        let amount = |cents: i64| format!("{:.2}", to_units(cents));
        let (title, message, category) = match action {
            LoanAction::Approve => (
                "Loan approved",
                format!(
                    "Your loan of {} was approved. Add your M-Pesa number to receive the funds.",
                    amount(loan.principal_cents)
                ),
                NotificationCategory::Loan,
            ),
            LoanAction::Reject { .. } => (
                "Loan rejected",
                format!(
                    "Your loan was rejected: {}",
                    loan.rejection_reason.as_deref().unwrap_or("no reason given")
                ),
                NotificationCategory::Loan,
            ),
            LoanAction::ProvidePayoutDetails { .. } => return,
            LoanAction::Disburse => (
                "Loan disbursed",
                format!(
                    "{} has been sent to {}. Monthly installment: {}.",
                    amount(loan.principal_cents),
                    loan.payout_number.as_deref().unwrap_or("your account"),
                    amount(loan.monthly_payment_cents)
                ),
                NotificationCategory::Payment,
            ),
            LoanAction::RecordRepayment { amount_cents } if loan.status == LoanStatus::Completed => (
                "Loan fully repaid",
                format!("Final payment of {} received. Your loan is complete.", amount(*amount_cents)),
                NotificationCategory::Payment,
            ),
            LoanAction::RecordRepayment { amount_cents } => (
                "Repayment received",
                format!(
                    "Payment of {} received. Outstanding balance: {}.",
                    amount(*amount_cents),
                    amount(loan.remaining_cents())
                ),
                NotificationCategory::Payment,
            ),
            LoanAction::MarkDefaulted => (
                "Loan in default",
                format!(
                    "Your loan is overdue and has been marked as defaulted. Outstanding balance: {}.",
                    amount(loan.remaining_cents())
                ),
                NotificationCategory::Loan,
            ),
        };

        self.send(NotificationRequest {
            user_id: loan.borrower_id,
            loan_id: Some(loan.id),
            title: title.to_string(),
            message,
            category,
        })
        .await;
    }

    async fn send(&self, request: NotificationRequest) {
        let user_id = request.user_id;
        if let Err(e) = self.notifier.notify(request).await {
            tracing::warn!(user_id = %user_id, "Notification failed: {}", e);
        }
    }
}

/// Borrowers, chama officials and named guarantors may read a loan
fn ensure_visible(loan: &Loan, actor: &Actor) -> Result<(), LoanError> {
    if actor.role != UserRole::Member || loan.involves(actor.user_id) {
        Ok(())
    } else {
        Err(LoanError::Unauthorized("not your loan".to_string()))
    }
}
