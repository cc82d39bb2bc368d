use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use meza_core::error::CustodyError;
use meza_core::gateway::{StkGateway, StkPushAck};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Daraja (M-Pesa) gateway credentials and endpoints.
#[derive(Debug, Clone)]
pub struct DarajaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: String,
    pub passkey: String,
}

impl Default for DarajaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.safaricom.co.ke".to_string(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            short_code: String::new(),
            passkey: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Error body the gateway attaches to rejected requests (HTTP 4xx/5xx).
#[derive(Debug, Deserialize)]
struct DarajaError {
    #[serde(rename = "errorCode")]
    error_code: String,
    #[serde(rename = "errorMessage")]
    error_message: String,
}

#[derive(Debug, Serialize)]
struct StkPushRequest<'a> {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: &'a str,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "TransactionType")]
    transaction_type: &'static str,
    #[serde(rename = "Amount")]
    amount: u64,
    #[serde(rename = "PartyA")]
    party_a: &'a str,
    #[serde(rename = "PartyB")]
    party_b: &'a str,
    #[serde(rename = "PhoneNumber")]
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    #[serde(rename = "AccountReference")]
    account_reference: &'a str,
    #[serde(rename = "TransactionDesc")]
    transaction_desc: &'static str,
}

/// HTTP client for the Daraja STK push API.
///
/// Each push fetches a fresh OAuth token; charge volume is low enough that
/// token caching is not worth the refresh bookkeeping.
pub struct DarajaGateway {
    config: DarajaConfig,
    http: reqwest::Client,
}

impl DarajaGateway {
    pub fn new(config: DarajaConfig) -> Result<Self, CustodyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CustodyError::GatewayTransport(e.to_string()))?;
        Ok(Self { config, http })
    }

    async fn access_token(&self) -> Result<String, CustodyError> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );
        let response = self
            .http
            .get(url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| CustodyError::GatewayTransport(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CustodyError::GatewayTransport(format!(
                "token request returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CustodyError::GatewayTransport(format!("bad token response: {e}")))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl StkGateway for DarajaGateway {
    async fn stk_push(
        &self,
        phone_number: &str,
        amount: u64,
        callback_url: &str,
        account_reference: &str,
    ) -> Result<StkPushAck, CustodyError> {
        let token = self.access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let body = StkPushRequest {
            business_short_code: &self.config.short_code,
            password: stk_password(&self.config.short_code, &self.config.passkey, &timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount,
            party_a: phone_number,
            party_b: &self.config.short_code,
            phone_number,
            callback_url,
            account_reference,
            transaction_desc: "deposit",
        };

        let response = self
            .http
            .post(format!(
                "{}/mpesa/stkpush/v1/processrequest",
                self.config.base_url
            ))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CustodyError::GatewayTransport(format!("stk push failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(push_rejection(status, &body));
        }
        response
            .json()
            .await
            .map_err(|e| CustodyError::GatewayTransport(format!("bad stk push response: {e}")))
    }
}

/// A reachable gateway rejects with its own error fields in the body; only a
/// body we cannot read as such counts as a transport fault.
fn push_rejection(status: reqwest::StatusCode, body: &str) -> CustodyError {
    match serde_json::from_str::<DarajaError>(body) {
        Ok(error) => CustodyError::GatewayRejected {
            code: i64::from(status.as_u16()),
            description: format!("{}: {}", error.error_code, error.error_message),
        },
        Err(_) => CustodyError::GatewayTransport(format!("stk push returned {status}")),
    }
}

/// `base64(shortcode + passkey + timestamp)`, the per-request API password.
fn stk_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{short_code}{passkey}{timestamp}"))
}
