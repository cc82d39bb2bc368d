use crate::keys::Keypair;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flat per-operation fee charged by the ledger network.
pub const BASE_FEE: u32 = 100;

/// Default transaction validity window. The upstream design left transactions
/// valid forever; a bounded window turns stale submissions into a distinct
/// [`LedgerError::Expired`] instead of a silent replay hazard.
pub const DEFAULT_VALIDITY_SECS: i64 = 300;

/// Maximum byte length of a text memo.
pub const MAX_MEMO_BYTES: usize = 28;

/// A non-native asset, identified by code and issuing account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub code: String,
    pub issuer: String,
}

impl Asset {
    pub fn new(code: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            issuer: issuer.into(),
        }
    }
}

/// An additional signing key registered on an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSigner {
    pub public_key: String,
    pub weight: u8,
}

/// Ledger operations the custody backend builds.
///
/// Operations execute atomically and in append order within one transaction.
/// An operation without an explicit `source` acts on the transaction source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    BeginSponsoringFutureReserves {
        sponsored_id: String,
    },
    EndSponsoringFutureReserves {
        source: String,
    },
    CreateAccount {
        destination: String,
        starting_balance: u64,
    },
    ChangeTrust {
        source: String,
        asset: Asset,
    },
    AllowTrust {
        trustor: String,
        asset_code: String,
        authorize: bool,
    },
    SetOptions {
        source: String,
        master_weight: Option<u8>,
        low_threshold: Option<u8>,
        med_threshold: Option<u8>,
        high_threshold: Option<u8>,
        signer: Option<LedgerSigner>,
    },
    Payment {
        source: Option<String>,
        destination: String,
        asset: Asset,
        amount: u64,
    },
}

impl Operation {
    /// Convenience constructor for signer-only option updates.
    pub fn set_signer(source: impl Into<String>, public_key: impl Into<String>, weight: u8) -> Self {
        Self::SetOptions {
            source: source.into(),
            master_weight: None,
            low_threshold: None,
            med_threshold: None,
            high_threshold: None,
            signer: Some(LedgerSigner {
                public_key: public_key.into(),
                weight,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Memo {
    #[default]
    None,
    Text(String),
}

impl Memo {
    /// Build a text memo, truncating to the ledger's 28-byte limit on a char
    /// boundary.
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.len() <= MAX_MEMO_BYTES {
            return Self::Text(value);
        }
        let mut end = MAX_MEMO_BYTES;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        Self::Text(value[..end].to_string())
    }
}

/// Validity window in unix seconds. `max_time == 0` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBounds {
    pub min_time: i64,
    pub max_time: i64,
}

/// An unsigned multi-operation transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub source: String,
    pub fee: u32,
    pub operations: Vec<Operation>,
    pub memo: Memo,
    pub time_bounds: TimeBounds,
}

impl Transaction {
    /// Deterministic hash of the transaction body; this is what signatures
    /// cover.
    pub fn hash(&self) -> Result<String, LedgerError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.time_bounds.max_time != 0 && now.timestamp() > self.time_bounds.max_time
    }
}

/// A signature over a transaction hash, tagged with the signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoratedSignature {
    pub public_key: String,
    pub signature: String,
}

/// A transaction plus its accumulated signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub tx: Transaction,
    pub signatures: Vec<DecoratedSignature>,
}

impl TransactionEnvelope {
    pub fn new(tx: Transaction) -> Self {
        Self {
            tx,
            signatures: Vec::new(),
        }
    }

    pub fn sign(&mut self, keypair: &Keypair) -> Result<(), LedgerError> {
        let hash = self.tx.hash()?;
        self.signatures.push(DecoratedSignature {
            public_key: keypair.public_key(),
            signature: keypair.sign(hash.as_bytes()),
        });
        Ok(())
    }

    pub fn signed_by(&self, public_key: &str) -> bool {
        self.signatures
            .iter()
            .any(|sig| sig.public_key == public_key)
    }
}

/// Ordered transaction builder.
///
/// `build` refuses empty transactions and unpaired sponsorship blocks, so a
/// transaction that sponsors reserves for an account always carries the
/// matching end operation signed into the same atomic unit.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    source: String,
    fee: u32,
    operations: Vec<Operation>,
    memo: Memo,
    validity: Duration,
}

impl TransactionBuilder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            fee: BASE_FEE,
            operations: Vec::new(),
            memo: Memo::None,
            validity: Duration::seconds(DEFAULT_VALIDITY_SECS),
        }
    }

    pub fn add_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn add_memo(mut self, memo: Memo) -> Self {
        self.memo = memo;
        self
    }

    pub fn with_validity(mut self, window: Duration) -> Self {
        self.validity = window;
        self
    }

    pub fn build(self) -> Result<Transaction, LedgerError> {
        if self.operations.is_empty() {
            return Err(LedgerError::EmptyTransaction);
        }
        check_sponsorship_pairing(&self.operations)?;

        let now = Utc::now();
        Ok(Transaction {
            source: self.source,
            fee: self.fee,
            operations: self.operations,
            memo: self.memo,
            time_bounds: TimeBounds {
                min_time: 0,
                max_time: (now + self.validity).timestamp(),
            },
        })
    }
}

/// Every begin-sponsoring for an id must be followed by an end-sponsoring
/// sourced by that id, within the same transaction.
fn check_sponsorship_pairing(operations: &[Operation]) -> Result<(), LedgerError> {
    let mut open: Vec<&str> = Vec::new();
    for operation in operations {
        match operation {
            Operation::BeginSponsoringFutureReserves { sponsored_id } => {
                if open.contains(&sponsored_id.as_str()) {
                    return Err(LedgerError::UnbalancedSponsorship(format!(
                        "sponsorship for '{sponsored_id}' opened twice"
                    )));
                }
                open.push(sponsored_id);
            }
            Operation::EndSponsoringFutureReserves { source } => {
                let Some(position) = open.iter().position(|id| *id == source.as_str()) else {
                    return Err(LedgerError::UnbalancedSponsorship(format!(
                        "end-sponsoring for '{source}' without matching begin"
                    )));
                };
                open.remove(position);
            }
            _ => {}
        }
    }
    if let Some(dangling) = open.first() {
        return Err(LedgerError::UnbalancedSponsorship(format!(
            "sponsorship for '{dangling}' never closed"
        )));
    }
    Ok(())
}

/// Receipt for an accepted transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub tx_hash: String,
    pub ledger_sequence: u64,
}

/// Ledger boundary errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("transaction validity window elapsed before submission")]
    Expired,

    #[error("transaction has no operations")]
    EmptyTransaction,

    #[error("unbalanced sponsorship: {0}")]
    UnbalancedSponsorship(String),

    #[error("bad signature from '{0}'")]
    BadSignature(String),

    #[error("missing required signature for '{0}'")]
    MissingSignature(String),

    #[error("insufficient sponsor reserve: {0}")]
    InsufficientReserve(String),

    #[error("ledger rejected transaction: {0}")]
    Rejected(String),

    #[error("ledger transport failure: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Submission boundary to the ledger network.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn submit(&self, envelope: &TransactionEnvelope) -> Result<SubmitReceipt, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn begin(id: &str) -> Operation {
        Operation::BeginSponsoringFutureReserves {
            sponsored_id: id.to_string(),
        }
    }

    fn end(id: &str) -> Operation {
        Operation::EndSponsoringFutureReserves {
            source: id.to_string(),
        }
    }

    #[test]
    fn builder_rejects_empty_transaction() {
        let err = TransactionBuilder::new("CUSTODY").build().unwrap_err();
        assert_eq!(err, LedgerError::EmptyTransaction);
    }

    #[test]
    fn builder_rejects_unclosed_sponsorship() {
        let err = TransactionBuilder::new("CUSTODY")
            .add_operation(begin("ACCT"))
            .add_operation(Operation::CreateAccount {
                destination: "ACCT".to_string(),
                starting_balance: 0,
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnbalancedSponsorship(_)));
    }

    #[test]
    fn builder_rejects_end_without_begin() {
        let err = TransactionBuilder::new("CUSTODY")
            .add_operation(end("ACCT"))
            .build()
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnbalancedSponsorship(_)));
    }

    #[test]
    fn builder_accepts_paired_sponsorship_and_bounds_validity() {
        let tx = TransactionBuilder::new("CUSTODY")
            .add_operation(begin("ACCT"))
            .add_operation(end("ACCT"))
            .build()
            .unwrap();
        assert_ne!(tx.time_bounds.max_time, 0);
        assert!(!tx.is_expired(Utc::now()));
        assert!(tx.is_expired(Utc::now() + Duration::seconds(DEFAULT_VALIDITY_SECS + 60)));
    }

    #[test]
    fn memo_text_truncates_to_limit() {
        let Memo::Text(text) = Memo::text("a".repeat(40)) else {
            panic!("expected text memo");
        };
        assert_eq!(text.len(), MAX_MEMO_BYTES);
    }

    #[test]
    fn envelope_signatures_cover_transaction_hash() {
        let keypair = Keypair::random();
        let tx = TransactionBuilder::new(keypair.public_key())
            .add_operation(begin("ACCT"))
            .add_operation(end("ACCT"))
            .build()
            .unwrap();
        let hash = tx.hash().unwrap();

        let mut envelope = TransactionEnvelope::new(tx);
        envelope.sign(&keypair).unwrap();

        assert!(envelope.signed_by(&keypair.public_key()));
        assert!(crate::keys::verify_signature(
            &envelope.signatures[0].public_key,
            hash.as_bytes(),
            &envelope.signatures[0].signature,
        ));
    }
}
