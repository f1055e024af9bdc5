//! Loan service workflow tests over the in-memory store

use async_trait::async_trait;
use chama_backend::error::ApiError;
use chama_backend::loan::{
    ChamaLoanRequest, Loan, LoanAction, LoanApplicationRequest, LoanError, LoanFilter,
    LoanService, LoanStatus, UpdateTermsRequest,
};
use chama_backend::models::{Actor, UserRole};
use chama_backend::mpesa::{
    C2bConfirmation, GatewayError, MpesaTransaction, PaymentGateway, PayoutReceipt,
    PayoutRequest, SimulatedGateway, TransactionKind, TransactionStatus,
};
use chama_backend::notify::{InAppNotifier, Notification, NotificationRequest, Notifier, NotifyError};
use chama_backend::store::{InMemoryLoanStore, LoanStore, StoreError};
use chama_backend::websocket::WsState;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _request: NotificationRequest) -> Result<Notification, NotifyError> {
        Err(NotifyError::Delivery("SMS provider unreachable".to_string()))
    }
}

struct FailingGateway;

#[async_trait]
impl PaymentGateway for FailingGateway {
    async fn initiate_payout(&self, _request: &PayoutRequest) -> Result<PayoutReceipt, GatewayError> {
        Err(GatewayError::Rejected("insufficient float".to_string()))
    }
}

/// Store whose transaction inserts stall, widening the window between a
/// callback's first read and its write
struct SlowTransactionStore {
    inner: InMemoryLoanStore,
    delay: std::time::Duration,
}

#[async_trait]
impl LoanStore for SlowTransactionStore {
    async fn insert_loan(&self, loan: &Loan) -> Result<Loan, StoreError> {
        self.inner.insert_loan(loan).await
    }

    async fn get_loan(&self, id: Uuid) -> Result<Option<Loan>, StoreError> {
        self.inner.get_loan(id).await
    }

    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StoreError> {
        self.inner.list_loans(filter).await
    }

    async fn update_loan(&self, loan: &Loan, expected_version: i64) -> Result<Loan, StoreError> {
        self.inner.update_loan(loan, expected_version).await
    }

    async fn overdue_loans(&self, cutoff: DateTime<Utc>) -> Result<Vec<Loan>, StoreError> {
        self.inner.overdue_loans(cutoff).await
    }

    async fn insert_transaction(&self, tx: &MpesaTransaction) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert_transaction(tx).await
    }

    async fn update_transaction_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        description: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner.update_transaction_status(id, status, description).await
    }

    async fn delete_transaction(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_transaction(id).await
    }

    async fn list_transactions(&self, loan_id: Uuid) -> Result<Vec<MpesaTransaction>, StoreError> {
        self.inner.list_transactions(loan_id).await
    }

    async fn find_transaction(&self, external_reference: &str) -> Result<Option<MpesaTransaction>, StoreError> {
        self.inner.find_transaction(external_reference).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

fn service_with(notifier: Arc<dyn Notifier>, gateway: Arc<dyn PaymentGateway>) -> Arc<LoanService> {
    Arc::new(LoanService::new(
        Arc::new(InMemoryLoanStore::new()),
        notifier,
        gateway,
        7,
    ))
}

fn service() -> Arc<LoanService> {
    service_with(
        Arc::new(InAppNotifier::new(WsState::new())),
        Arc::new(SimulatedGateway),
    )
}

fn member() -> Actor {
    Actor::new(Uuid::new_v4(), UserRole::Member)
}

fn treasurer() -> Actor {
    Actor::new(Uuid::new_v4(), UserRole::Treasurer)
}

fn chama_request(amount_cents: i64, months: u32) -> ChamaLoanRequest {
    ChamaLoanRequest {
        amount_cents,
        interest_rate_pct: None,
        duration_months: months,
        purpose: "Poultry feed".to_string(),
        guarantors: vec![],
    }
}

async fn ready_loan(service: &LoanService, borrower: &Actor) -> Loan {
    let loan = service
        .apply_chama(borrower, Uuid::new_v4(), chama_request(600_000, 6))
        .await
        .unwrap();
    service
        .perform(&treasurer(), loan.id, LoanAction::Approve)
        .await
        .unwrap();
    service
        .perform(
            borrower,
            loan.id,
            LoanAction::ProvidePayoutDetails {
                phone: "+254 712 345 678".to_string(),
            },
        )
        .await
        .unwrap()
}

async fn active_loan(service: &LoanService, borrower: &Actor) -> Loan {
    let loan = ready_loan(service, borrower).await;
    service
        .perform(&treasurer(), loan.id, LoanAction::Disburse)
        .await
        .unwrap()
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_disburse_applies_once() {
    let service = service();
    let borrower = member();
    let loan = ready_loan(&service, &borrower).await;

    let a = tokio::spawn({
        let service = service.clone();
        async move { service.perform(&treasurer(), loan.id, LoanAction::Disburse).await }
    });
    let b = tokio::spawn({
        let service = service.clone();
        async move { service.perform(&treasurer(), loan.id, LoanAction::Disburse).await }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    let (ok, err) = match (a, b) {
        (Ok(loan), Err(e)) | (Err(e), Ok(loan)) => (loan, e),
        (a, b) => panic!("expected exactly one success, got {:?} and {:?}", a.is_ok(), b.is_ok()),
    };
    assert_eq!(ok.status, LoanStatus::Active);
    assert!(matches!(
        err,
        ApiError::Conflict(_) | ApiError::Loan(LoanError::InvalidTransition { .. })
    ));

    let payouts: Vec<_> = service
        .store()
        .list_transactions(loan.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::B2c)
        .collect();
    assert_eq!(payouts.len(), 1);
}

#[tokio::test]
async fn test_stale_write_is_a_conflict() {
    let store = InMemoryLoanStore::new();
    let loan = Loan::new_chama(Uuid::new_v4(), Uuid::new_v4(), &chama_request(100_000, 2), Utc::now())
        .unwrap();
    let loan = store.insert_loan(&loan).await.unwrap();

    let mut first = loan.clone();
    first.purpose = Some("first writer".to_string());
    let mut second = loan.clone();
    second.purpose = Some("second writer".to_string());

    store.update_loan(&first, loan.version).await.unwrap();
    let err = store.update_loan(&second, loan.version).await.unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { .. }));

    let stored = store.get_loan(loan.id).await.unwrap().unwrap();
    assert_eq!(stored.purpose.as_deref(), Some("first writer"));
    assert_eq!(ApiError::from(err).status_code(), axum::http::StatusCode::CONFLICT);
}

// ============================================================================
// Side effects
// ============================================================================

#[tokio::test]
async fn test_notification_failure_keeps_transition() {
    let service = service_with(Arc::new(FailingNotifier), Arc::new(SimulatedGateway));
    let borrower = member();
    let loan = service
        .apply_chama(&borrower, Uuid::new_v4(), chama_request(250_000, 3))
        .await
        .unwrap();

    let approved = service
        .perform(&treasurer(), loan.id, LoanAction::Approve)
        .await
        .unwrap();
    assert_eq!(approved.status, LoanStatus::Approved);

    let stored = service.get(&borrower, loan.id).await.unwrap();
    assert_eq!(stored.status, LoanStatus::Approved);
    assert_eq!(stored.version, loan.version + 1);
}

#[tokio::test]
async fn test_payout_failure_leaves_loan_active() {
    let service = service_with(
        Arc::new(InAppNotifier::new(WsState::new())),
        Arc::new(FailingGateway),
    );
    let borrower = member();
    let loan = active_loan(&service, &borrower).await;

    assert_eq!(loan.status, LoanStatus::Active);
    assert!(loan.disbursed);
    assert!(loan.disbursement_reference.is_none());

    let txs = service.transactions(&borrower, loan.id).await.unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].kind, TransactionKind::B2c);
    assert_eq!(txs[0].status, TransactionStatus::Failed);
    assert_eq!(txs[0].phone, "254712345678");
}

#[tokio::test]
async fn test_successful_payout_records_reference() {
    let service = service();
    let borrower = member();
    let loan = active_loan(&service, &borrower).await;

    let reference = loan.disbursement_reference.clone().unwrap();
    assert!(reference.starts_with("sim_"));
    let txs = service.transactions(&borrower, loan.id).await.unwrap();
    assert_eq!(txs[0].status, TransactionStatus::Success);
    assert_eq!(txs[0].external_reference.as_deref(), Some(reference.as_str()));
    assert_eq!(txs[0].amount_cents, 600_000);
}

#[tokio::test]
async fn test_borrower_receives_in_app_notifications() {
    let notifier = Arc::new(InAppNotifier::new(WsState::new()));
    let service = service_with(notifier.clone(), Arc::new(SimulatedGateway));
    let borrower = member();
    active_loan(&service, &borrower).await;

    let titles: Vec<String> = notifier
        .recent(borrower.user_id)
        .await
        .into_iter()
        .map(|n| n.title)
        .collect();
    assert_eq!(titles, vec!["Loan disbursed", "Loan approved"]);
}

// ============================================================================
// Default detection
// ============================================================================

async fn set_due(service: &LoanService, loan: &Loan, days_ago: i64) -> Loan {
    let mut overdue = loan.clone();
    overdue.due_at = Some(Utc::now() - Duration::days(days_ago));
    service.store().update_loan(&overdue, loan.version).await.unwrap()
}

#[tokio::test]
async fn test_sweep_only_defaults_overdue_active_loans() {
    let service = service();
    let borrower = member();

    let long_overdue = active_loan(&service, &borrower).await;
    let long_overdue = set_due(&service, &long_overdue, 30).await;
    let in_grace = active_loan(&service, &borrower).await;
    let in_grace = set_due(&service, &in_grace, 3).await;
    let current = active_loan(&service, &borrower).await;
    let pending = service
        .apply_chama(&borrower, Uuid::new_v4(), chama_request(100_000, 1))
        .await
        .unwrap();

    let defaulted = service.detect_defaults(Utc::now()).await.unwrap();
    assert_eq!(defaulted.len(), 1);
    assert_eq!(defaulted[0].id, long_overdue.id);
    assert_eq!(defaulted[0].status, LoanStatus::Defaulted);

    for (id, status) in [
        (in_grace.id, LoanStatus::Active),
        (current.id, LoanStatus::Active),
        (pending.id, LoanStatus::Pending),
    ] {
        assert_eq!(service.get(&borrower, id).await.unwrap().status, status);
    }

    // Nothing left to do on a second run
    assert!(service.detect_defaults(Utc::now()).await.unwrap().is_empty());
}

// ============================================================================
// Gateway payments
// ============================================================================

fn confirmation(trans_id: &str, loan_id: Uuid, amount: &str) -> C2bConfirmation {
    C2bConfirmation {
        transaction_type: Some("Pay Bill".to_string()),
        trans_id: trans_id.to_string(),
        trans_amount: amount.to_string(),
        bill_ref_number: loan_id.to_string(),
        msisdn: "254712345678".to_string(),
    }
}

#[tokio::test]
async fn test_gateway_payment_is_idempotent() {
    let service = service();
    let borrower = member();
    let loan = active_loan(&service, &borrower).await;

    let payment = confirmation("RKTQDM7W6S", loan.id, "1500.00");
    let applied = service.record_gateway_payment(&payment).await.unwrap().unwrap();
    assert_eq!(applied.repaid_cents, 150_000);

    assert!(service.record_gateway_payment(&payment).await.unwrap().is_none());
    let stored = service.get(&borrower, loan.id).await.unwrap();
    assert_eq!(stored.repaid_cents, 150_000);

    let c2b = service
        .transactions(&borrower, loan.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::C2b)
        .count();
    assert_eq!(c2b, 1);
}

#[tokio::test]
async fn test_gateway_payment_errors() {
    let service = service();
    let borrower = member();
    let loan = active_loan(&service, &borrower).await;

    let mut bad_ref = confirmation("AAA111", loan.id, "100.00");
    bad_ref.bill_ref_number = "not-a-loan".to_string();
    assert!(matches!(
        service.record_gateway_payment(&bad_ref).await,
        Err(ApiError::BadRequest(_))
    ));

    let over = confirmation("BBB222", loan.id, "999999.00");
    assert!(matches!(
        service.record_gateway_payment(&over).await,
        Err(ApiError::Loan(LoanError::Overpayment { .. }))
    ));

    // A refused payment is not recorded, so the same receipt can be retried
    assert!(service.store().find_transaction("BBB222").await.unwrap().is_none());
    let retry = confirmation("BBB222", loan.id, "100.00");
    assert!(service.record_gateway_payment(&retry).await.unwrap().is_some());

    // Unknown loans are refused before anything is recorded
    let unknown = confirmation("CCC333", Uuid::new_v4(), "100.00");
    assert!(matches!(
        service.record_gateway_payment(&unknown).await,
        Err(ApiError::NotFound(_))
    ));
    assert!(service.store().find_transaction("CCC333").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_duplicate_confirmations_credit_once() {
    let service = Arc::new(LoanService::new(
        Arc::new(SlowTransactionStore {
            inner: InMemoryLoanStore::new(),
            delay: std::time::Duration::from_millis(300),
        }),
        Arc::new(InAppNotifier::new(WsState::new())),
        Arc::new(SimulatedGateway),
        7,
    ));
    let borrower = member();
    let loan = active_loan(&service, &borrower).await;
    let payment = confirmation("RKT9X2LQ4B", loan.id, "1000.00");

    let first = tokio::spawn({
        let service = service.clone();
        let payment = payment.clone();
        async move { service.record_gateway_payment(&payment).await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let second = tokio::spawn({
        let service = service.clone();
        let payment = payment.clone();
        async move { service.record_gateway_payment(&payment).await }
    });
    let (first, second) = (first.await.unwrap().unwrap(), second.await.unwrap().unwrap());

    assert_eq!(
        [first.is_some(), second.is_some()].iter().filter(|applied| **applied).count(),
        1
    );
    let stored = service.get(&borrower, loan.id).await.unwrap();
    assert_eq!(stored.repaid_cents, 100_000);

    let c2b: Vec<_> = service
        .store()
        .list_transactions(loan.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::C2b)
        .collect();
    assert_eq!(c2b.len(), 1);
    assert_eq!(c2b[0].status, TransactionStatus::Success);
    assert_eq!(c2b[0].result_description.as_deref(), Some("Pay Bill"));
}

// ============================================================================
// Applications and edits
// ============================================================================

fn application(national_id: &str) -> LoanApplicationRequest {
    LoanApplicationRequest {
        national_id: national_id.to_string(),
        phone: "0712345678".to_string(),
        email: None,
        monthly_income_cents: 2_000_000,
        loan_amount_cents: 20_000_000,
        loan_term_months: 10,
        employment_length_months: 3,
        has_collateral: false,
        interest_rate_pct: None,
        purpose: None,
    }
}

#[tokio::test]
async fn test_duplicate_open_application_conflicts() {
    let service = service();
    service
        .apply_individual(&member(), application("31234567"))
        .await
        .unwrap();
    assert!(matches!(
        service.apply_individual(&member(), application("31234567")).await,
        Err(ApiError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_edit_reprices_and_is_owner_only() {
    let service = service();
    let borrower = member();
    let loan = service
        .apply_individual(&borrower, application("27654321"))
        .await
        .unwrap();
    assert_eq!(loan.interest_rate_pct, 24.0);

    let edit = UpdateTermsRequest {
        employment_length_months: Some(36),
        has_collateral: Some(true),
        monthly_income_cents: Some(10_000_000),
        ..Default::default()
    };
    assert!(matches!(
        service.update_terms(&member(), loan.id, edit.clone()).await,
        Err(ApiError::Loan(LoanError::Unauthorized(_)))
    ));

    let edited = service.update_terms(&borrower, loan.id, edit).await.unwrap();
    assert_eq!(edited.interest_rate_pct, 12.0);
    assert!(edited.monthly_payment_cents < loan.monthly_payment_cents);
    assert_eq!(edited.version, loan.version + 1);

    service
        .perform(&treasurer(), loan.id, LoanAction::Approve)
        .await
        .unwrap();
    let late = UpdateTermsRequest {
        term_months: Some(12),
        ..Default::default()
    };
    assert!(service.update_terms(&borrower, loan.id, late).await.is_err());
}

#[tokio::test]
async fn test_edit_cannot_push_term_past_cap() {
    let service = service();
    let borrower = member();
    let loan = service
        .apply_chama(&borrower, Uuid::new_v4(), chama_request(600_000, 6))
        .await
        .unwrap();

    for term in [121, 1_000_000, u32::MAX] {
        let edit = UpdateTermsRequest {
            term_months: Some(term),
            ..Default::default()
        };
        assert!(matches!(
            service.update_terms(&borrower, loan.id, edit).await,
            Err(ApiError::ValidationError(_))
        ));
    }

    let stored = service.get(&borrower, loan.id).await.unwrap();
    assert_eq!(stored.term_months, 6);
    assert_eq!(stored.total_repayment_cents, loan.total_repayment_cents);
    assert!(stored.total_repayment_cents > 0);
}

#[tokio::test]
async fn test_listing_far_past_the_end_is_empty() {
    let service = service();
    let borrower = member();
    service
        .apply_chama(&borrower, Uuid::new_v4(), chama_request(600_000, 6))
        .await
        .unwrap();

    let filter = LoanFilter {
        page: Some(u32::MAX),
        limit: Some(100),
        ..Default::default()
    };
    let page = service.list(&treasurer(), filter).await.unwrap();
    assert!(page.data.is_empty());
    assert_eq!(page.page, u32::MAX);
}
