use crate::keys::Keypair;
use crate::ledger::{Asset, LedgerError, Memo, Operation, TransactionBuilder, TransactionEnvelope};
use crate::policy::CustodyPolicy;
use serde::{Deserialize, Serialize};

/// Gateway callback envelope: `{Body: {stkCallback: {...}}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

/// Asynchronous charge result. A zero result code means the payer approved
/// and the money left their mobile-money account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

impl StkCallback {
    pub fn succeeded(&self) -> bool {
        self.result_code == 0
    }

    /// `"<code>: <description>"`, persisted on gateway-failed deposits.
    pub fn failure_message(&self) -> String {
        format!("{}: {}", self.result_code, self.result_desc)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub item: Vec<CallbackItem>,
}

/// One entry of the gateway's loosely-typed name/value list. Field order and
/// presence are not contractually guaranteed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: serde_json::Value,
}

/// Settlement fields picked defensively out of the callback item list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettlementFields {
    pub amount: Option<u64>,
    pub phone: Option<String>,
    pub receipt: Option<String>,
}

impl SettlementFields {
    pub fn extract(metadata: Option<&CallbackMetadata>) -> Self {
        let mut fields = Self::default();
        let Some(metadata) = metadata else {
            return fields;
        };

        for item in &metadata.item {
            match item.name.as_str() {
                "Amount" => fields.amount = as_amount(&item.value),
                "PhoneNumber" => fields.phone = as_text(&item.value),
                "MpesaReceiptNumber" => fields.receipt = as_text(&item.value),
                _ => {}
            }
        }
        fields
    }
}

fn as_amount(value: &serde_json::Value) -> Option<u64> {
    if let Some(amount) = value.as_u64() {
        return Some(amount);
    }
    // The gateway occasionally reports fractional or string amounts.
    if let Some(amount) = value.as_f64() {
        if amount >= 0.0 {
            return Some(amount.round() as u64);
        }
    }
    value.as_str().and_then(|text| text.parse::<u64>().ok())
}

fn as_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Build the atomic ledger credit for a gateway-confirmed deposit.
///
/// One transaction: sponsor the user's reserves, issue the custody asset to
/// the user's wallet, forward the same amount from the user to the group
/// wallet, close the sponsorship, and tag the whole thing with the reason
/// memo. Co-signed by the custody credential and the user's credential.
pub fn settlement_transaction(
    custody: &Keypair,
    user: &Keypair,
    group_wallet: &str,
    asset: &Asset,
    amount: u64,
    reason: &str,
    policy: &CustodyPolicy,
) -> Result<TransactionEnvelope, LedgerError> {
    let user_key = user.public_key();

    let tx = TransactionBuilder::new(custody.public_key())
        .with_validity(policy.tx_validity())
        .add_operation(Operation::BeginSponsoringFutureReserves {
            sponsored_id: user_key.clone(),
        })
        .add_operation(Operation::Payment {
            source: None,
            destination: user_key.clone(),
            asset: asset.clone(),
            amount,
        })
        .add_operation(Operation::Payment {
            source: Some(user_key.clone()),
            destination: group_wallet.to_string(),
            asset: asset.clone(),
            amount,
        })
        .add_operation(Operation::EndSponsoringFutureReserves { source: user_key })
        .add_memo(Memo::text(reason))
        .build()?;

    let mut envelope = TransactionEnvelope::new(tx);
    envelope.sign(custody)?;
    envelope.sign(user)?;
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(items: serde_json::Value) -> CallbackMetadata {
        serde_json::from_value(json!({ "Item": items })).unwrap()
    }

    #[test]
    fn extracts_fields_regardless_of_item_order() {
        let metadata = metadata(json!([
            { "Name": "PhoneNumber", "Value": 254712345678u64 },
            { "Name": "MpesaReceiptNumber", "Value": "MRLSJHDH9" },
            { "Name": "Amount", "Value": 500 },
        ]));

        let fields = SettlementFields::extract(Some(&metadata));
        assert_eq!(fields.amount, Some(500));
        assert_eq!(fields.phone.as_deref(), Some("254712345678"));
        assert_eq!(fields.receipt.as_deref(), Some("MRLSJHDH9"));
    }

    #[test]
    fn tolerates_missing_and_unknown_items() {
        let metadata = metadata(json!([
            { "Name": "Balance", "Value": 1200.5 },
            { "Name": "Amount" },
        ]));

        let fields = SettlementFields::extract(Some(&metadata));
        assert_eq!(fields.amount, None);
        assert_eq!(fields.phone, None);
        assert_eq!(fields.receipt, None);

        assert_eq!(SettlementFields::extract(None), SettlementFields::default());
    }

    #[test]
    fn fractional_amounts_round_to_whole_units() {
        let metadata = metadata(json!([{ "Name": "Amount", "Value": 499.6 }]));
        assert_eq!(SettlementFields::extract(Some(&metadata)).amount, Some(500));
    }

    #[test]
    fn callback_parses_wire_shape() {
        let envelope: StkCallbackEnvelope = serde_json::from_value(json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_123",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        }))
        .unwrap();

        let callback = envelope.body.stk_callback;
        assert!(!callback.succeeded());
        assert_eq!(callback.failure_message(), "1032: Request cancelled by user");
        assert!(callback.callback_metadata.is_none());
    }

    #[test]
    fn settlement_credits_user_then_forwards_to_group() {
        let custody = Keypair::random();
        let user = Keypair::random();
        let policy = CustodyPolicy::default();
        let asset = policy.asset(&custody.public_key());

        let envelope = settlement_transaction(
            &custody,
            &user,
            "GROUPWALLET",
            &asset,
            500,
            "contribution",
            &policy,
        )
        .unwrap();

        let ops = &envelope.tx.operations;
        match (&ops[1], &ops[2]) {
            (
                Operation::Payment {
                    source: None,
                    destination: issued_to,
                    amount: issued,
                    ..
                },
                Operation::Payment {
                    source: Some(forwarded_from),
                    destination: forwarded_to,
                    amount: forwarded,
                    ..
                },
            ) => {
                assert_eq!(issued_to, &user.public_key());
                assert_eq!(forwarded_from, &user.public_key());
                assert_eq!(forwarded_to, "GROUPWALLET");
                assert_eq!((*issued, *forwarded), (500, 500));
            }
            other => panic!("unexpected payment pair {other:?}"),
        }

        assert_eq!(envelope.tx.memo, Memo::text("contribution"));
        assert!(envelope.signed_by(&custody.public_key()));
        assert!(envelope.signed_by(&user.public_key()));
    }
}
