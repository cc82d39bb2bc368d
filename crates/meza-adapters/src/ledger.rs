use async_trait::async_trait;
use chrono::Utc;
use meza_core::keys::verify_signature;
use meza_core::ledger::{
    LedgerClient, LedgerError, Operation, SubmitReceipt, TransactionEnvelope,
};
use std::collections::HashMap;
use std::sync::Mutex;

/// Simulated account state tracked by [`MockLedger`].
#[derive(Debug, Clone, Default)]
pub struct MockAccount {
    pub master_weight: u8,
    pub low_threshold: u8,
    pub med_threshold: u8,
    pub high_threshold: u8,
    /// Signer entries by public key. Zero-weight entries are retained, not
    /// deleted, matching how removals are expressed.
    pub signers: HashMap<String, u8>,
    /// Trustlines by asset code, true once the issuer authorized them.
    pub trustlines: HashMap<String, bool>,
    /// Balances by asset code.
    pub balances: HashMap<String, u64>,
}

impl MockAccount {
    fn created() -> Self {
        Self {
            master_weight: 1,
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct MockLedgerState {
    sequence: u64,
    accounts: HashMap<String, MockAccount>,
    submissions: Vec<TransactionEnvelope>,
}

/// In-process ledger simulation for deterministic local and test runs.
///
/// Validates the validity window and every decorated signature against the
/// transaction hash, then applies operations in order against simulated
/// account state. Application is all-or-nothing per envelope.
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<MockLedgerState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> Vec<TransactionEnvelope> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).submissions.clone()
    }

    pub fn account(&self, public_key: &str) -> Option<MockAccount> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .accounts
            .get(public_key)
            .cloned()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn submit(&self, envelope: &TransactionEnvelope) -> Result<SubmitReceipt, LedgerError> {
        if envelope.tx.is_expired(Utc::now()) {
            return Err(LedgerError::Expired);
        }

        let tx_hash = envelope.tx.hash()?;
        if envelope.signatures.is_empty() {
            return Err(LedgerError::MissingSignature(envelope.tx.source.clone()));
        }
        for decorated in &envelope.signatures {
            if !verify_signature(
                &decorated.public_key,
                tx_hash.as_bytes(),
                &decorated.signature,
            ) {
                return Err(LedgerError::BadSignature(decorated.public_key.clone()));
            }
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut accounts = state.accounts.clone();
        for operation in &envelope.tx.operations {
            apply(&mut accounts, &envelope.tx.source, operation)?;
        }

        state.accounts = accounts;
        state.sequence += 1;
        state.submissions.push(envelope.clone());
        Ok(SubmitReceipt {
            tx_hash,
            ledger_sequence: state.sequence,
        })
    }
}

fn apply(
    accounts: &mut HashMap<String, MockAccount>,
    tx_source: &str,
    operation: &Operation,
) -> Result<(), LedgerError> {
    match operation {
        Operation::BeginSponsoringFutureReserves { .. }
        | Operation::EndSponsoringFutureReserves { .. } => Ok(()),

        Operation::CreateAccount { destination, .. } => {
            if accounts.contains_key(destination) {
                return Err(LedgerError::Rejected(format!(
                    "account '{destination}' already exists"
                )));
            }
            accounts.insert(destination.clone(), MockAccount::created());
            Ok(())
        }

        Operation::SetOptions {
            source,
            master_weight,
            low_threshold,
            med_threshold,
            high_threshold,
            signer,
        } => {
            let account = accounts
                .get_mut(source)
                .ok_or_else(|| LedgerError::Rejected(format!("unknown account '{source}'")))?;
            if let Some(weight) = master_weight {
                account.master_weight = *weight;
            }
            if let Some(threshold) = low_threshold {
                account.low_threshold = *threshold;
            }
            if let Some(threshold) = med_threshold {
                account.med_threshold = *threshold;
            }
            if let Some(threshold) = high_threshold {
                account.high_threshold = *threshold;
            }
            if let Some(signer) = signer {
                account.signers.insert(signer.public_key.clone(), signer.weight);
            }
            Ok(())
        }

        Operation::ChangeTrust { source, asset } => {
            let account = accounts
                .get_mut(source)
                .ok_or_else(|| LedgerError::Rejected(format!("unknown account '{source}'")))?;
            account.trustlines.entry(asset.code.clone()).or_insert(false);
            Ok(())
        }

        Operation::AllowTrust {
            trustor,
            asset_code,
            authorize,
        } => {
            let account = accounts
                .get_mut(trustor)
                .ok_or_else(|| LedgerError::Rejected(format!("unknown account '{trustor}'")))?;
            let authorized = account.trustlines.get_mut(asset_code).ok_or_else(|| {
                LedgerError::Rejected(format!("'{trustor}' holds no '{asset_code}' trustline"))
            })?;
            *authorized = *authorize;
            Ok(())
        }

        Operation::Payment {
            source,
            destination,
            asset,
            amount,
        } => {
            let from = source.as_deref().unwrap_or(tx_source);

            // The issuer mints; anyone else spends an existing balance.
            if from != asset.issuer {
                let account = accounts
                    .get_mut(from)
                    .ok_or_else(|| LedgerError::Rejected(format!("unknown account '{from}'")))?;
                let balance = account.balances.entry(asset.code.clone()).or_insert(0);
                if *balance < *amount {
                    return Err(LedgerError::Rejected(format!(
                        "'{from}' holds {balance} {}, cannot pay {amount}",
                        asset.code
                    )));
                }
                *balance -= amount;
            }

            if destination != &asset.issuer {
                let account = accounts.get_mut(destination).ok_or_else(|| {
                    LedgerError::Rejected(format!("unknown account '{destination}'"))
                })?;
                let authorized = account
                    .trustlines
                    .get(&asset.code)
                    .copied()
                    .unwrap_or(false);
                if !authorized {
                    return Err(LedgerError::Rejected(format!(
                        "'{destination}' is not authorized for '{}'",
                        asset.code
                    )));
                }
                *account.balances.entry(asset.code.clone()).or_insert(0) += amount;
            }
            Ok(())
        }
    }
}

/// Ledger stub that refuses every submission with a fixed error.
pub struct FailingLedger {
    error: LedgerError,
}

impl FailingLedger {
    pub fn new(error: LedgerError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl LedgerClient for FailingLedger {
    async fn submit(&self, _envelope: &TransactionEnvelope) -> Result<SubmitReceipt, LedgerError> {
        Err(self.error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use meza_core::deposit::settlement_transaction;
    use meza_core::keys::Keypair;
    use meza_core::ledger::TransactionBuilder;
    use meza_core::policy::CustodyPolicy;
    use meza_core::provision::{group_provisioning_transaction, user_provisioning_transaction};

    async fn provisioned_user(
        ledger: &MockLedger,
        custody: &Keypair,
        policy: &CustodyPolicy,
    ) -> Keypair {
        let user = Keypair::random();
        let envelope = user_provisioning_transaction(custody, &user, policy).unwrap();
        ledger.submit(&envelope).await.unwrap();
        user
    }

    #[tokio::test]
    async fn provisioning_creates_account_with_custody_signer_and_trustline() {
        let ledger = MockLedger::new();
        let custody = Keypair::random();
        let policy = CustodyPolicy::default();

        let user = provisioned_user(&ledger, &custody, &policy).await;

        let account = ledger.account(&user.public_key()).unwrap();
        assert_eq!(account.signers.get(&custody.public_key()), Some(&10));
        assert_eq!(account.trustlines.get("KESM"), Some(&true));
    }

    #[tokio::test]
    async fn group_provisioning_zeroes_master_weight() {
        let ledger = MockLedger::new();
        let custody = Keypair::random();
        let policy = CustodyPolicy::default();

        let creator = provisioned_user(&ledger, &custody, &policy).await;
        let group = Keypair::random();
        let envelope =
            group_provisioning_transaction(&custody, &group, &creator.public_key(), &policy)
                .unwrap();
        ledger.submit(&envelope).await.unwrap();

        let account = ledger.account(&group.public_key()).unwrap();
        assert_eq!(account.master_weight, 0);
        assert_eq!(account.signers.get(&creator.public_key()), Some(&1));
        assert_eq!(account.signers.get(&custody.public_key()), Some(&10));
    }

    #[tokio::test]
    async fn settlement_moves_issued_funds_to_the_group_wallet() {
        let ledger = MockLedger::new();
        let custody = Keypair::random();
        let policy = CustodyPolicy::default();
        let asset = policy.asset(&custody.public_key());

        let user = provisioned_user(&ledger, &custody, &policy).await;
        let group = Keypair::random();
        let group_tx =
            group_provisioning_transaction(&custody, &group, &user.public_key(), &policy).unwrap();
        ledger.submit(&group_tx).await.unwrap();

        let settle = settlement_transaction(
            &custody,
            &user,
            &group.public_key(),
            &asset,
            500,
            "contribution",
            &policy,
        )
        .unwrap();
        ledger.submit(&settle).await.unwrap();

        let user_account = ledger.account(&user.public_key()).unwrap();
        let group_account = ledger.account(&group.public_key()).unwrap();
        assert_eq!(user_account.balances.get("KESM"), Some(&0));
        assert_eq!(group_account.balances.get("KESM"), Some(&500));
    }

    #[tokio::test]
    async fn payment_to_unauthorized_account_is_rejected_atomically() {
        let ledger = MockLedger::new();
        let custody = Keypair::random();
        let policy = CustodyPolicy::default();
        let asset = policy.asset(&custody.public_key());

        let user = provisioned_user(&ledger, &custody, &policy).await;

        // Settlement towards a wallet that was never provisioned.
        let settle = settlement_transaction(
            &custody,
            &user,
            "DEAD",
            &asset,
            500,
            "contribution",
            &policy,
        )
        .unwrap();
        let err = ledger.submit(&settle).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));

        // The minting leg must not have been applied either.
        let account = ledger.account(&user.public_key()).unwrap();
        assert_eq!(account.balances.get("KESM"), None);
    }

    #[tokio::test]
    async fn expired_envelope_is_refused() {
        let ledger = MockLedger::new();
        let custody = Keypair::random();

        let tx = TransactionBuilder::new(custody.public_key())
            .with_validity(Duration::seconds(-60))
            .add_operation(Operation::CreateAccount {
                destination: "ACCT".to_string(),
                starting_balance: 0,
            })
            .build()
            .unwrap();
        let mut envelope = TransactionEnvelope::new(tx);
        envelope.sign(&custody).unwrap();

        let err = ledger.submit(&envelope).await.unwrap_err();
        assert_eq!(err, LedgerError::Expired);
    }

    #[tokio::test]
    async fn tampered_envelope_fails_signature_verification() {
        let ledger = MockLedger::new();
        let custody = Keypair::random();

        let tx = TransactionBuilder::new(custody.public_key())
            .add_operation(Operation::CreateAccount {
                destination: "ACCT".to_string(),
                starting_balance: 0,
            })
            .build()
            .unwrap();
        let mut envelope = TransactionEnvelope::new(tx);
        envelope.sign(&custody).unwrap();
        envelope.tx.fee += 1;

        let err = ledger.submit(&envelope).await.unwrap_err();
        assert!(matches!(err, LedgerError::BadSignature(_)));
    }
}
