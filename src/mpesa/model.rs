//! M-Pesa transaction records and callback payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment mode
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "mpesa_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    StkPush,
    B2c,
    C2b,
    Reversal,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "mpesa_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
    Timeout,
}

/// Record of a payment moving through the gateway.
///
/// `retry_count` and `max_retries` are kept for reconciliation reports;
/// nothing retries automatically.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct MpesaTransaction {
    pub id: Uuid,
    pub loan_id: Option<Uuid>,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub phone: String,
    pub amount_cents: i64,
    pub external_reference: Option<String>,
    pub result_description: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MpesaTransaction {
    pub const DEFAULT_MAX_RETRIES: i32 = 3;

    pub fn new(
        loan_id: Option<Uuid>,
        kind: TransactionKind,
        status: TransactionStatus,
        phone: impl Into<String>,
        amount_cents: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            loan_id,
            kind,
            status,
            phone: phone.into(),
            amount_cents,
            external_reference: None,
            result_description: None,
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.result_description = Some(description.into());
        self
    }
}

/// C2B confirmation posted by Safaricom when a customer pays our paybill.
///
/// `BillRefNumber` carries the loan id the customer typed as the account.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct C2bConfirmation {
    #[serde(rename = "TransactionType", default)]
    pub transaction_type: Option<String>,
    #[serde(rename = "TransID")]
    pub trans_id: String,
    #[serde(rename = "TransAmount")]
    pub trans_amount: String,
    #[serde(rename = "BillRefNumber")]
    pub bill_ref_number: String,
    #[serde(rename = "MSISDN")]
    pub msisdn: String,
}

/// Acknowledgement body Safaricom expects back
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct C2bAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl C2bAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            result_code: 1,
            result_desc: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_field_names() {
        let body = r#"{
            "TransactionType": "Pay Bill",
            "TransID": "RKTQDM7W6S",
            "TransTime": "20191122063845",
            "TransAmount": "1500.00",
            "BusinessShortCode": "600638",
            "BillRefNumber": "5f8b2c9e-0000-4000-8000-000000000000",
            "MSISDN": "254708374149"
        }"#;
        let confirmation: C2bConfirmation = serde_json::from_str(body).unwrap();
        assert_eq!(confirmation.trans_id, "RKTQDM7W6S");
        assert_eq!(confirmation.trans_amount, "1500.00");
    }

    #[test]
    fn test_new_transaction_defaults() {
        let tx = MpesaTransaction::new(
            None,
            TransactionKind::B2c,
            TransactionStatus::Pending,
            "254712345678",
            500,
        )
        .with_reference("AG_123");
        assert_eq!(tx.retry_count, 0);
        assert_eq!(tx.max_retries, MpesaTransaction::DEFAULT_MAX_RETRIES);
        assert_eq!(tx.external_reference.as_deref(), Some("AG_123"));
    }
}
