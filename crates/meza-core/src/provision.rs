use crate::keys::Keypair;
use crate::ledger::{LedgerError, Operation, TransactionBuilder, TransactionEnvelope};
use crate::policy::CustodyPolicy;

/// Build the sponsored creation transaction for a user wallet.
///
/// Operation order: begin-sponsoring (custody pays the reserves) →
/// create-account at zero balance → custody signer registration → trustline →
/// end-sponsoring (sourced by the new account) → allow-trust from the issuer.
/// Co-signed by the custody credential and the new account's credential; the
/// latter exists in-process at creation time only.
pub fn user_provisioning_transaction(
    custody: &Keypair,
    account: &Keypair,
    policy: &CustodyPolicy,
) -> Result<TransactionEnvelope, LedgerError> {
    let custody_key = custody.public_key();
    let account_key = account.public_key();
    let access = policy.grant_asset_access(&account_key, &custody_key);

    let tx = TransactionBuilder::new(custody_key.clone())
        .with_validity(policy.tx_validity())
        .add_operation(Operation::BeginSponsoringFutureReserves {
            sponsored_id: account_key.clone(),
        })
        .add_operation(Operation::CreateAccount {
            destination: account_key.clone(),
            starting_balance: 0,
        })
        .add_operation(Operation::set_signer(
            account_key.clone(),
            custody_key,
            policy.custody_signer_weight,
        ))
        .add_operation(access.change_trust)
        .add_operation(Operation::EndSponsoringFutureReserves {
            source: account_key,
        })
        .add_operation(access.allow_trust)
        .build()?;

    let mut envelope = TransactionEnvelope::new(tx);
    envelope.sign(custody)?;
    envelope.sign(account)?;
    Ok(envelope)
}

/// Build the sponsored creation transaction for a savings-group wallet.
///
/// Beyond the user shape, the group account zeroes its master weight (the
/// group's own keypair alone can never authorize anything), fixes all
/// thresholds at 1, and registers the creator as the sole member signer at
/// weight 1.
pub fn group_provisioning_transaction(
    custody: &Keypair,
    group: &Keypair,
    creator_pub_key: &str,
    policy: &CustodyPolicy,
) -> Result<TransactionEnvelope, LedgerError> {
    let custody_key = custody.public_key();
    let group_key = group.public_key();
    let access = policy.grant_asset_access(&group_key, &custody_key);

    let tx = TransactionBuilder::new(custody_key.clone())
        .with_validity(policy.tx_validity())
        .add_operation(Operation::BeginSponsoringFutureReserves {
            sponsored_id: group_key.clone(),
        })
        .add_operation(Operation::CreateAccount {
            destination: group_key.clone(),
            starting_balance: 0,
        })
        .add_operation(Operation::SetOptions {
            source: group_key.clone(),
            master_weight: Some(0),
            low_threshold: Some(1),
            med_threshold: Some(1),
            high_threshold: Some(1),
            signer: Some(crate::ledger::LedgerSigner {
                public_key: creator_pub_key.to_string(),
                weight: 1,
            }),
        })
        .add_operation(Operation::set_signer(
            group_key.clone(),
            custody_key,
            policy.custody_signer_weight,
        ))
        .add_operation(access.change_trust)
        .add_operation(Operation::EndSponsoringFutureReserves { source: group_key })
        .add_operation(access.allow_trust)
        .build()?;

    let mut envelope = TransactionEnvelope::new(tx);
    envelope.sign(custody)?;
    envelope.sign(group)?;
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_provisioning_orders_operations_inside_sponsorship() {
        let custody = Keypair::random();
        let account = Keypair::random();
        let policy = CustodyPolicy::default();

        let envelope = user_provisioning_transaction(&custody, &account, &policy).unwrap();
        let ops = &envelope.tx.operations;

        assert!(matches!(
            ops[0],
            Operation::BeginSponsoringFutureReserves { .. }
        ));
        assert!(matches!(
            ops[1],
            Operation::CreateAccount {
                starting_balance: 0,
                ..
            }
        ));
        assert!(matches!(ops[3], Operation::ChangeTrust { .. }));
        assert!(matches!(
            ops[4],
            Operation::EndSponsoringFutureReserves { .. }
        ));
        assert!(matches!(ops[5], Operation::AllowTrust { authorize: true, .. }));

        assert!(envelope.signed_by(&custody.public_key()));
        assert!(envelope.signed_by(&account.public_key()));
    }

    #[test]
    fn group_provisioning_registers_creator_and_zeroes_master_weight() {
        let custody = Keypair::random();
        let group = Keypair::random();
        let policy = CustodyPolicy::default();

        let envelope =
            group_provisioning_transaction(&custody, &group, "CREATORKEY", &policy).unwrap();

        let set_options = envelope
            .tx
            .operations
            .iter()
            .find_map(|op| match op {
                Operation::SetOptions {
                    master_weight: Some(master),
                    low_threshold,
                    med_threshold,
                    high_threshold,
                    signer: Some(signer),
                    ..
                } => Some((*master, *low_threshold, *med_threshold, *high_threshold, signer.clone())),
                _ => None,
            })
            .expect("group options operation present");

        let (master, low, med, high, signer) = set_options;
        assert_eq!(master, 0);
        assert_eq!((low, med, high), (Some(1), Some(1), Some(1)));
        assert_eq!(signer.public_key, "CREATORKEY");
        assert_eq!(signer.weight, 1);
    }

    #[test]
    fn custody_signer_is_registered_on_both_account_kinds() {
        let custody = Keypair::random();
        let account = Keypair::random();
        let policy = CustodyPolicy::default();

        for envelope in [
            user_provisioning_transaction(&custody, &account, &policy).unwrap(),
            group_provisioning_transaction(&custody, &account, "CREATORKEY", &policy).unwrap(),
        ] {
            let registered = envelope.tx.operations.iter().any(|op| match op {
                Operation::SetOptions {
                    signer: Some(signer),
                    ..
                } => {
                    signer.public_key == custody.public_key()
                        && signer.weight == policy.custody_signer_weight
                }
                _ => false,
            });
            assert!(registered, "custody signer missing from provisioning tx");
        }
    }
}
