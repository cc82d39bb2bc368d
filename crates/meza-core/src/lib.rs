//! Meza custody core.
//!
//! Provisions sponsored ledger wallets for users and savings groups, keeps
//! group wallets governed by a 2/3 member supermajority, and settles
//! mobile-money deposits into the ledger off asynchronous gateway callbacks.

#![deny(unsafe_code)]

pub mod deposit;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod ledger;
pub mod multisig;
pub mod policy;
pub mod provision;
pub mod runtime;
pub mod store;
pub mod types;

pub use deposit::{
    settlement_transaction, CallbackItem, CallbackMetadata, SettlementFields, StkCallback,
    StkCallbackBody, StkCallbackEnvelope,
};
pub use error::CustodyError;
pub use gateway::{StkGateway, StkPushAck};
pub use keys::{verify_signature, Keypair};
pub use ledger::{
    Asset, DecoratedSignature, LedgerClient, LedgerError, LedgerSigner, Memo, Operation,
    SubmitReceipt, TimeBounds, Transaction, TransactionBuilder, TransactionEnvelope,
};
pub use multisig::{quorum_members, quorum_size, quorum_threshold, signer_diff, SignerDiff};
pub use policy::{AssetAccess, CustodyPolicy};
pub use provision::{group_provisioning_transaction, user_provisioning_transaction};
pub use runtime::{CustodyEngine, CustodyEngineConfig};
pub use store::{DepositFinalize, DocumentStore, StoreConfig, StoreEvent};
pub use types::{
    DepositAck, DepositRecord, DepositRequest, DepositStatus, FailPoint, GroupRecord, UserRecord,
};
