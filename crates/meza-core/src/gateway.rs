use crate::error::CustodyError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Synchronous acknowledgement to an STK push charge request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkPushAck {
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: i64,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
}

impl StkPushAck {
    pub fn accepted(&self) -> bool {
        self.response_code == 0
    }
}

/// Mobile-money gateway boundary.
///
/// `stk_push` initiates a charge prompt on the payer's handset; the result
/// arrives later through the callback URL. Transport failures surface as
/// [`CustodyError::GatewayTransport`]; a reachable gateway that declines the
/// charge returns an ack with a non-zero response code.
#[async_trait]
pub trait StkGateway: Send + Sync {
    async fn stk_push(
        &self,
        phone_number: &str,
        amount: u64,
        callback_url: &str,
        account_reference: &str,
    ) -> Result<StkPushAck, CustodyError>;
}
