use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted user account record (`users/{id}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "pubKey")]
    pub pub_key: String,
    #[serde(rename = "signKey")]
    pub sign_key: String,
    /// Group memberships; mutated by the group lifecycle, not by this record.
    #[serde(default)]
    pub groups: Vec<String>,
    /// False when the on-chain creation transaction failed; deposit
    /// initiation refuses unprovisioned users until reconciled.
    pub provisioned: bool,
    pub created_at: DateTime<Utc>,
}

/// Persisted savings-group record (`groups/{id}`).
///
/// The first entry in `members` is the creator and is registered as the sole
/// ledger signer at creation time. Every membership mutation bumps `revision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    #[serde(rename = "groupId")]
    pub group_id: String,
    pub name: String,
    pub members: Vec<String>,
    #[serde(rename = "pubKey", default, skip_serializing_if = "Option::is_none")]
    pub pub_key: Option<String>,
    #[serde(rename = "signKey", default, skip_serializing_if = "Option::is_none")]
    pub sign_key: Option<String>,
    #[serde(default)]
    pub provisioned: bool,
    #[serde(default)]
    pub revision: u64,
    /// Meeting/contribution policy, opaque to the custody core.
    #[serde(default)]
    pub meeting: serde_json::Value,
    #[serde(
        rename = "monthlyContribution",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub monthly_contribution: Option<u64>,
}

impl GroupRecord {
    pub fn new(group_id: impl Into<String>, name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            group_id: group_id.into(),
            name: name.into(),
            members,
            pub_key: None,
            sign_key: None,
            provisioned: false,
            revision: 0,
            meeting: serde_json::Value::Null,
            monthly_contribution: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    /// In-progress marker claimed by the callback invocation that won the
    /// pending transition; never persisted as a terminal outcome.
    Settling,
    Success,
    Failed,
}

impl DepositStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Settling => "settling",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Which collaborator a failed deposit died at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailPoint {
    Gateway,
    Ledger,
}

/// Persisted deposit record (`deposits/{gatewayTransactionId}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositRecord {
    #[serde(rename = "depositId")]
    pub deposit_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Destination group wallet public identifier.
    #[serde(rename = "chamaWallet")]
    pub chama_wallet: String,
    pub amount: u64,
    pub status: DepositStatus,
    pub reason: String,
    #[serde(rename = "failPoint", default, skip_serializing_if = "Option::is_none")]
    pub fail_point: Option<FailPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(
        rename = "MpesaReceiptNumber",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub mpesa_receipt_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "txHash", default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DepositRecord {
    pub fn pending(
        deposit_id: impl Into<String>,
        user_id: impl Into<String>,
        chama_wallet: impl Into<String>,
        amount: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            deposit_id: deposit_id.into(),
            user_id: user_id.into(),
            chama_wallet: chama_wallet.into(),
            amount,
            status: DepositStatus::Pending,
            reason: reason.into(),
            fail_point: None,
            phone: None,
            mpesa_receipt_number: None,
            message: None,
            tx_hash: None,
            timestamp: Utc::now(),
        }
    }
}

/// Deposit initiation request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    pub amount: u64,
    #[serde(rename = "chamaWallet")]
    pub chama_wallet: String,
    pub reason: String,
}

/// Accepted deposit initiation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositAck {
    #[serde(rename = "transactionId")]
    pub transaction_id: String,
}
