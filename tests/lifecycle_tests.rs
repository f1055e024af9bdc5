//! Lifecycle state machine tests

use chama_backend::loan::{
    transition, ActionKind, ChamaLoanRequest, Loan, LoanAction, LoanError, LoanStatus,
};
use chama_backend::models::{Actor, UserRole};
use chrono::{Duration, Utc};
use uuid::Uuid;

struct Fixture {
    borrower: Actor,
    treasurer: Actor,
}

impl Fixture {
    fn new() -> Self {
        Self {
            borrower: Actor::new(Uuid::new_v4(), UserRole::Member),
            treasurer: Actor::new(Uuid::new_v4(), UserRole::Treasurer),
        }
    }

    fn pending(&self, amount_cents: i64, rate: f64, months: u32) -> Loan {
        let request = ChamaLoanRequest {
            amount_cents,
            interest_rate_pct: Some(rate),
            duration_months: months,
            purpose: "Greenhouse kit".to_string(),
            guarantors: vec![],
        };
        Loan::new_chama(self.borrower.user_id, Uuid::new_v4(), &request, Utc::now()).unwrap()
    }

    /// Drive a loan to `status` along the happy path
    fn at(&self, status: LoanStatus) -> Loan {
        let now = Utc::now();
        let loan = self.pending(1_200_000, 0.0, 12);
        if status == LoanStatus::Pending {
            return loan;
        }
        if status == LoanStatus::Rejected {
            return transition(&loan, &reject(), &self.treasurer, now).unwrap();
        }
        if status == LoanStatus::Defaulted {
            return transition(&loan, &LoanAction::MarkDefaulted, &self.treasurer, now).unwrap();
        }

        let loan = transition(&loan, &LoanAction::Approve, &self.treasurer, now).unwrap();
        if status == LoanStatus::Approved {
            return loan;
        }
        let loan = transition(&loan, &payout_details(), &self.borrower, now).unwrap();
        if status == LoanStatus::ReadyToDisburse {
            return loan;
        }
        let loan = transition(&loan, &LoanAction::Disburse, &self.treasurer, now).unwrap();
        if status == LoanStatus::Active {
            return loan;
        }
        let remaining = loan.remaining_cents();
        transition(
            &loan,
            &LoanAction::RecordRepayment {
                amount_cents: remaining,
            },
            &self.borrower,
            now,
        )
        .unwrap()
    }

    /// The actor allowed to attempt `action`, so only state decides
    fn actor_for(&self, action: &LoanAction) -> &Actor {
        match action.kind() {
            ActionKind::ProvidePayoutDetails | ActionKind::RecordRepayment => &self.borrower,
            _ => &self.treasurer,
        }
    }
}

fn reject() -> LoanAction {
    LoanAction::Reject {
        reason: "Guarantors not confirmed".to_string(),
    }
}

fn payout_details() -> LoanAction {
    LoanAction::ProvidePayoutDetails {
        phone: "0712345678".to_string(),
    }
}

fn all_actions() -> Vec<LoanAction> {
    vec![
        LoanAction::Approve,
        reject(),
        payout_details(),
        LoanAction::Disburse,
        LoanAction::RecordRepayment { amount_cents: 100 },
        LoanAction::MarkDefaulted,
    ]
}

const ALL_STATUSES: [LoanStatus; 7] = [
    LoanStatus::Pending,
    LoanStatus::Approved,
    LoanStatus::ReadyToDisburse,
    LoanStatus::Active,
    LoanStatus::Completed,
    LoanStatus::Rejected,
    LoanStatus::Defaulted,
];

fn allowed(from: LoanStatus, action: ActionKind) -> Option<LoanStatus> {
    use ActionKind::*;
    use LoanStatus::*;
    match (from, action) {
        (Pending, Approve) => Some(Approved),
        (Pending, Reject) => Some(Rejected),
        (Approved, ProvidePayoutDetails) => Some(ReadyToDisburse),
        (ReadyToDisburse, Disburse) => Some(Active),
        (Active, RecordRepayment) => Some(Active),
        (Pending | Approved | ReadyToDisburse | Active, MarkDefaulted) => Some(Defaulted),
        _ => None,
    }
}

// ============================================================================
// Transition table
// ============================================================================

#[test]
fn test_only_listed_transitions_succeed() {
    let fixture = Fixture::new();

    for from in ALL_STATUSES {
        let loan = fixture.at(from);
        assert_eq!(loan.status, from);

        for action in all_actions() {
            let result = transition(&loan, &action, fixture.actor_for(&action), Utc::now());
            match allowed(from, action.kind()) {
                Some(to) => {
                    let next = result.unwrap_or_else(|e| {
                        panic!("{:?} from {} should succeed: {}", action.kind(), from, e)
                    });
                    assert_eq!(next.status, to);
                }
                None => {
                    let err = result.expect_err("transition should be refused");
                    assert!(
                        matches!(
                            err,
                            LoanError::InvalidTransition { .. } | LoanError::MissingPayoutDetails
                        ),
                        "{:?} from {} gave {:?}",
                        action.kind(),
                        from,
                        err
                    );
                }
            }
        }
    }
}

#[test]
fn test_disburse_pending_is_invalid_transition() {
    let fixture = Fixture::new();
    let loan = fixture.pending(500_000, 5.0, 6);

    let err = transition(&loan, &LoanAction::Disburse, &fixture.treasurer, Utc::now()).unwrap_err();
    assert_eq!(
        err,
        LoanError::InvalidTransition {
            from: LoanStatus::Pending,
            action: ActionKind::Disburse,
        }
    );
    assert_eq!(loan.status, LoanStatus::Pending);
}

#[test]
fn test_payout_details_cannot_be_replaced() {
    let fixture = Fixture::new();
    let ready = fixture.at(LoanStatus::ReadyToDisburse);
    assert!(transition(&ready, &payout_details(), &fixture.borrower, Utc::now()).is_err());
}

#[test]
fn test_disburse_sets_due_date() {
    let fixture = Fixture::new();
    let ready = fixture.at(LoanStatus::ReadyToDisburse);
    let now = Utc::now();

    let active = transition(&ready, &LoanAction::Disburse, &fixture.treasurer, now).unwrap();
    assert!(active.disbursed);
    assert_eq!(active.disbursed_at, Some(now));
    let due = active.due_at.unwrap();
    assert!(due > now + Duration::days(360) && due < now + Duration::days(370));

    // A second disbursement is refused
    assert!(matches!(
        transition(&active, &LoanAction::Disburse, &fixture.treasurer, now),
        Err(LoanError::InvalidTransition { .. })
    ));
}

// ============================================================================
// Repayments
// ============================================================================

#[test]
fn test_repayments_reach_completed() {
    let fixture = Fixture::new();
    let mut loan = fixture.at(LoanStatus::Active);
    assert_eq!(loan.total_repayment_cents, 1_200_000);

    for _ in 0..11 {
        loan = transition(
            &loan,
            &LoanAction::RecordRepayment {
                amount_cents: 100_000,
            },
            &fixture.borrower,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert!(loan.repaid_cents <= loan.total_repayment_cents);
    }
    assert_eq!(loan.remaining_cents(), 100_000);

    let done = transition(
        &loan,
        &LoanAction::RecordRepayment {
            amount_cents: 100_000,
        },
        &fixture.treasurer,
        Utc::now(),
    )
    .unwrap();
    assert_eq!(done.status, LoanStatus::Completed);
    assert_eq!(done.remaining_cents(), 0);
    assert!(done.completed_at.is_some());
}

#[test]
fn test_overpayment_is_rejected() {
    let fixture = Fixture::new();
    let loan = fixture.at(LoanStatus::Active);
    let remaining = loan.remaining_cents();

    let err = transition(
        &loan,
        &LoanAction::RecordRepayment {
            amount_cents: remaining + 1,
        },
        &fixture.borrower,
        Utc::now(),
    )
    .unwrap_err();
    assert_eq!(
        err,
        LoanError::Overpayment {
            amount_cents: remaining + 1,
            remaining_cents: remaining,
        }
    );
}

#[test]
fn test_non_positive_repayment_is_invalid() {
    let fixture = Fixture::new();
    let loan = fixture.at(LoanStatus::Active);
    for amount_cents in [0, -500] {
        assert!(matches!(
            transition(
                &loan,
                &LoanAction::RecordRepayment { amount_cents },
                &fixture.borrower,
                Utc::now()
            ),
            Err(LoanError::InvalidInput(_))
        ));
    }
}

// ============================================================================
// Authorization
// ============================================================================

#[test]
fn test_outsider_cannot_repay_someone_elses_loan() {
    let fixture = Fixture::new();
    let loan = fixture.at(LoanStatus::Active);
    let outsider = Actor::new(Uuid::new_v4(), UserRole::Secretary);

    assert!(matches!(
        transition(
            &loan,
            &LoanAction::RecordRepayment { amount_cents: 100 },
            &outsider,
            Utc::now()
        ),
        Err(LoanError::Unauthorized(_))
    ));
    assert!(transition(
        &loan,
        &LoanAction::RecordRepayment { amount_cents: 100 },
        &Actor::system(),
        Utc::now()
    )
    .is_ok());
}

#[test]
fn test_authorization_is_checked_before_state() {
    let fixture = Fixture::new();
    let completed = fixture.at(LoanStatus::Completed);

    assert!(matches!(
        transition(&completed, &LoanAction::Approve, &fixture.borrower, Utc::now()),
        Err(LoanError::Unauthorized(_))
    ));
}
