//! M-Pesa payment gateway
//!
//! The loan workflow only needs "pay this phone" and "a payment arrived";
//! both sit behind [`PaymentGateway`] so the service can run against the
//! live Daraja API or the simulator.

mod client;
mod model;

pub use client::{MpesaClient, MpesaConfig};
pub use model::*;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Gateway failures. Logged by the caller, never rolled into loan state.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    Request(String),

    #[error("Gateway rejected the payout: {0}")]
    Rejected(String),

    #[error("Gateway authentication failed: {0}")]
    Auth(String),
}

/// Outbound payout
#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub phone: String,
    pub amount_cents: i64,
    /// Our reference, usually the loan id
    pub reference: String,
    pub remarks: String,
}

/// Gateway acknowledgement of a payout
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutReceipt {
    pub external_reference: String,
    pub description: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, GatewayError>;
}

/// Gateway used when no M-Pesa credentials are configured
#[derive(Debug, Clone, Default)]
pub struct SimulatedGateway;

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, GatewayError> {
        tracing::info!(
            phone = %request.phone,
            amount_cents = request.amount_cents,
            reference = %request.reference,
            "Simulating M-Pesa payout"
        );
        Ok(PayoutReceipt {
            external_reference: format!("sim_{}", Uuid::new_v4().simple()),
            description: "Simulated payout accepted".to_string(),
        })
    }
}

/// Normalize a Kenyan mobile number to the `2547XXXXXXXX` / `2541XXXXXXXX`
/// form the gateway expects.
pub fn normalize_msisdn(raw: &str) -> Option<String> {
    let digits: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let subscriber = if let Some(rest) = digits.strip_prefix("254") {
        rest
    } else if let Some(rest) = digits.strip_prefix('0') {
        rest
    } else {
        digits
    };

    if subscriber.len() == 9 && (subscriber.starts_with('7') || subscriber.starts_with('1')) {
        Some(format!("254{}", subscriber))
    } else {
        None
    }
}
