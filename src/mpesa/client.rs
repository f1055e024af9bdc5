//! Daraja (M-Pesa) HTTP client for B2C payouts

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{GatewayError, PaymentGateway, PayoutReceipt, PayoutRequest};

/// Refresh tokens this long before Daraja says they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Daraja credentials and endpoints
#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub initiator_name: String,
    pub security_credential: String,
    pub result_url: String,
    pub timeout_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct B2cRequest<'a> {
    initiator_name: &'a str,
    security_credential: &'a str,
    #[serde(rename = "CommandID")]
    command_id: &'a str,
    amount: i64,
    party_a: &'a str,
    party_b: &'a str,
    remarks: &'a str,
    #[serde(rename = "QueueTimeOutURL")]
    queue_timeout_url: &'a str,
    #[serde(rename = "ResultURL")]
    result_url: &'a str,
    occasion: &'a str,
}

#[derive(Debug, Deserialize)]
struct B2cResponse {
    #[serde(rename = "ConversationID")]
    conversation_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// Live gateway backed by the Daraja API
pub struct MpesaClient {
    http: Client,
    config: MpesaConfig,
    token: RwLock<Option<(String, Instant)>>,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            config,
            token: RwLock::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        if let Some((token, expires)) = self.token.read().await.as_ref() {
            if Instant::now() < *expires {
                return Ok(token.clone());
            }
        }

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Auth(e.to_string()))?;

        let ttl = body
            .expires_in
            .parse::<u64>()
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3599));
        let expires = Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_MARGIN);

        *self.token.write().await = Some((body.access_token.clone(), expires));
        Ok(body.access_token)
    }
}

/// Daraja only moves whole shillings. Rounds half up; `None` when the
/// amount rounds to nothing or overflows.
fn whole_shillings(amount_cents: i64) -> Option<i64> {
    amount_cents
        .checked_add(50)
        .map(|cents| cents / 100)
        .filter(|shillings| *shillings > 0)
}

#[async_trait]
impl PaymentGateway for MpesaClient {
    async fn initiate_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, GatewayError> {
        let token = self.access_token().await?;

        let amount = whole_shillings(request.amount_cents).ok_or_else(|| {
            GatewayError::Rejected(format!("amount {} is out of range", request.amount_cents))
        })?;

        let body = B2cRequest {
            initiator_name: &self.config.initiator_name,
            security_credential: &self.config.security_credential,
            command_id: "BusinessPayment",
            amount,
            party_a: &self.config.shortcode,
            party_b: &request.phone,
            remarks: &request.remarks,
            queue_timeout_url: &self.config.timeout_url,
            result_url: &self.config.result_url,
            occasion: &request.reference,
        };

        let url = format!(
            "{}/mpesa/b2c/v1/paymentrequest",
            self.config.base_url.trim_end_matches('/')
        );

        tracing::info!(
            phone = %request.phone,
            amount = amount,
            reference = %request.reference,
            "Submitting B2C payout"
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let status = response.status();
        let parsed: B2cResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Request(format!("unreadable response ({}): {}", status, e)))?;

        match (parsed.response_code.as_deref(), parsed.conversation_id) {
            (Some("0"), Some(conversation_id)) => Ok(PayoutReceipt {
                external_reference: conversation_id,
                description: parsed
                    .response_description
                    .unwrap_or_else(|| "Accepted".to_string()),
            }),
            _ => Err(GatewayError::Rejected(
                parsed
                    .error_message
                    .or(parsed.response_description)
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_shillings_rounds_half_up() {
        assert_eq!(whole_shillings(600_000), Some(6_000));
        assert_eq!(whole_shillings(12_349), Some(123));
        assert_eq!(whole_shillings(12_350), Some(124));
        assert_eq!(whole_shillings(i64::MAX - 50), Some(i64::MAX / 100));
    }

    #[test]
    fn test_whole_shillings_rejects_out_of_range() {
        assert_eq!(whole_shillings(i64::MAX), None);
        assert_eq!(whole_shillings(0), None);
        assert_eq!(whole_shillings(49), None);
        assert_eq!(whole_shillings(-100), None);
    }
}
