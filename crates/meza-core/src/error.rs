use crate::ledger::LedgerError;
use thiserror::Error;

/// Custody backend errors.
#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("User '{0}' not found")]
    UserNotFound(String),

    #[error("Group '{0}' not found")]
    GroupNotFound(String),

    #[error("Group '{0}' has no members")]
    EmptyGroup(String),

    #[error("Deposit '{0}' not found")]
    DepositNotFound(String),

    #[error("Account '{0}' has no provisioned ledger wallet")]
    Unprovisioned(String),

    #[error("Gateway rejected request ({code}): {description}")]
    GatewayRejected { code: i64, description: String },

    #[error("Gateway transport failure: {0}")]
    GatewayTransport(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Group '{group_id}' revision conflict: reconciling revision {expected}, store holds {found}")]
    RevisionConflict {
        group_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Deposit '{deposit_id}' is already {status}")]
    DepositAlreadySettled { deposit_id: String, status: String },

    #[error("Invalid gateway callback: {0}")]
    InvalidCallback(String),
}
