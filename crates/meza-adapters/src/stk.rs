use async_trait::async_trait;
use meza_core::error::CustodyError;
use meza_core::gateway::{StkGateway, StkPushAck};
use std::sync::Mutex;
use uuid::Uuid;

/// One charge prompt recorded by [`MockStkGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPush {
    pub phone_number: String,
    pub amount: u64,
    pub callback_url: String,
    pub account_reference: String,
}

/// Gateway stub that accepts every charge and records it for assertions.
///
/// Checkout request ids follow the `ws_CO_...` shape the real gateway uses.
#[derive(Default)]
pub struct MockStkGateway {
    pushes: Mutex<Vec<RecordedPush>>,
}

impl MockStkGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pushes(&self) -> Vec<RecordedPush> {
        self.pushes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl StkGateway for MockStkGateway {
    async fn stk_push(
        &self,
        phone_number: &str,
        amount: u64,
        callback_url: &str,
        account_reference: &str,
    ) -> Result<StkPushAck, CustodyError> {
        self.pushes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedPush {
                phone_number: phone_number.to_string(),
                amount,
                callback_url: callback_url.to_string(),
                account_reference: account_reference.to_string(),
            });

        Ok(StkPushAck {
            checkout_request_id: format!("ws_CO_{}", Uuid::new_v4().simple()),
            response_code: 0,
            response_description: "Success. Request accepted for processing".to_string(),
        })
    }
}

/// Gateway stub that is reachable but declines every charge.
pub struct RejectingGateway {
    code: i64,
    description: String,
}

impl RejectingGateway {
    pub fn new(code: i64, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

#[async_trait]
impl StkGateway for RejectingGateway {
    async fn stk_push(
        &self,
        _phone_number: &str,
        _amount: u64,
        _callback_url: &str,
        _account_reference: &str,
    ) -> Result<StkPushAck, CustodyError> {
        Ok(StkPushAck {
            checkout_request_id: String::new(),
            response_code: self.code,
            response_description: self.description.clone(),
        })
    }
}

/// Gateway stub that fails at the transport layer.
#[derive(Default)]
pub struct OfflineGateway;

#[async_trait]
impl StkGateway for OfflineGateway {
    async fn stk_push(
        &self,
        _phone_number: &str,
        _amount: u64,
        _callback_url: &str,
        _account_reference: &str,
    ) -> Result<StkPushAck, CustodyError> {
        Err(CustodyError::GatewayTransport(
            "connection refused".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_gateway_records_pushes_and_issues_unique_ids() {
        let gateway = MockStkGateway::new();

        let first = gateway
            .stk_push("254712345678", 500, "http://cb", "GROUP")
            .await
            .unwrap();
        let second = gateway
            .stk_push("254712345678", 700, "http://cb", "GROUP")
            .await
            .unwrap();

        assert!(first.accepted());
        assert!(first.checkout_request_id.starts_with("ws_CO_"));
        assert_ne!(first.checkout_request_id, second.checkout_request_id);
        assert_eq!(gateway.pushes().len(), 2);
        assert_eq!(gateway.pushes()[1].amount, 700);
    }

    #[tokio::test]
    async fn rejecting_gateway_returns_non_zero_ack() {
        let gateway = RejectingGateway::new(1, "Unable to lock subscriber");
        let ack = gateway
            .stk_push("254712345678", 500, "http://cb", "GROUP")
            .await
            .unwrap();
        assert!(!ack.accepted());
        assert_eq!(ack.response_code, 1);
    }

    #[tokio::test]
    async fn offline_gateway_fails_at_transport() {
        let err = OfflineGateway
            .stk_push("254712345678", 500, "http://cb", "GROUP")
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::GatewayTransport(_)));
    }
}
