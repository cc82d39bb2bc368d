use crate::keys::Keypair;
use crate::ledger::{LedgerError, Operation, TransactionBuilder, TransactionEnvelope};
use crate::policy::CustodyPolicy;
use std::collections::BTreeSet;

/// Membership delta between two snapshots of a group's member sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignerDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SignerDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Symmetric difference of two member sequences, order-preserving.
pub fn signer_diff(previous: &[String], current: &[String]) -> SignerDiff {
    let before: BTreeSet<&str> = previous.iter().map(String::as_str).collect();
    let after: BTreeSet<&str> = current.iter().map(String::as_str).collect();

    SignerDiff {
        added: current
            .iter()
            .filter(|member| !before.contains(member.as_str()))
            .cloned()
            .collect(),
        removed: previous
            .iter()
            .filter(|member| !after.contains(member.as_str()))
            .cloned()
            .collect(),
    }
}

/// 2/3 supermajority rule for medium and high thresholds.
pub fn quorum_threshold(member_count: usize) -> u8 {
    let threshold = ((2.0 * member_count as f64) / 3.0).round();
    threshold.min(u8::MAX as f64) as u8
}

/// Number of pre-change members whose signatures authorize a reconciliation.
pub fn quorum_size(previous_member_count: usize) -> usize {
    (quorum_threshold(previous_member_count) as usize).max(1)
}

/// Pre-change members eligible to co-sign a reconciliation, order-preserving.
///
/// Members being removed by the change never qualify: they have left quorum
/// status and must not authorize their own removal's side effects. The quorum
/// count itself stays a function of the full pre-change member count.
pub fn quorum_members(previous: &[String], removed: &[String]) -> Vec<String> {
    let gone: BTreeSet<&str> = removed.iter().map(String::as_str).collect();
    previous
        .iter()
        .filter(|member| !gone.contains(member.as_str()))
        .take(quorum_size(previous.len()))
        .cloned()
        .collect()
}

/// Build the signer-update transaction for a membership change.
///
/// Added members are granted weight 1; removed members are zero-weighted
/// (signer entries are never deleted). One trailing set-options moves medium
/// and high thresholds to the 2/3 rule over the post-change member count. The
/// whole block is wrapped in a sponsorship pair so the custody account covers
/// any reserve increase from new signer entries, and co-signed by the custody
/// credential plus the quorum signers drawn from the pre-change membership.
pub fn reconcile_transaction(
    custody: &Keypair,
    group_wallet: &str,
    added_keys: &[String],
    removed_keys: &[String],
    current_member_count: usize,
    quorum_signers: &[Keypair],
    policy: &CustodyPolicy,
) -> Result<TransactionEnvelope, LedgerError> {
    let threshold = quorum_threshold(current_member_count);

    let mut builder = TransactionBuilder::new(custody.public_key())
        .with_validity(policy.tx_validity())
        .add_operation(Operation::BeginSponsoringFutureReserves {
            sponsored_id: group_wallet.to_string(),
        });

    for key in added_keys {
        builder = builder.add_operation(Operation::set_signer(group_wallet, key.clone(), 1));
    }
    for key in removed_keys {
        builder = builder.add_operation(Operation::set_signer(group_wallet, key.clone(), 0));
    }

    let tx = builder
        .add_operation(Operation::SetOptions {
            source: group_wallet.to_string(),
            master_weight: None,
            low_threshold: None,
            med_threshold: Some(threshold),
            high_threshold: Some(threshold),
            signer: None,
        })
        .add_operation(Operation::EndSponsoringFutureReserves {
            source: group_wallet.to_string(),
        })
        .build()?;

    let mut envelope = TransactionEnvelope::new(tx);
    envelope.sign(custody)?;
    for signer in quorum_signers {
        envelope.sign(signer)?;
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerSigner;

    fn members(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn diff_detects_additions_and_removals() {
        let previous = members(&["u0", "u1", "u2"]);
        let current = members(&["u0", "u2", "u3"]);

        let diff = signer_diff(&previous, &current);
        assert_eq!(diff.added, members(&["u3"]));
        assert_eq!(diff.removed, members(&["u1"]));
    }

    #[test]
    fn diff_of_identical_sequences_is_empty() {
        let snapshot = members(&["u0", "u1"]);
        assert!(signer_diff(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn threshold_follows_two_thirds_rounding() {
        assert_eq!(quorum_threshold(1), 1);
        assert_eq!(quorum_threshold(2), 1);
        assert_eq!(quorum_threshold(3), 2);
        assert_eq!(quorum_threshold(4), 3);
        assert_eq!(quorum_threshold(6), 4);
        assert_eq!(quorum_threshold(9), 6);
    }

    #[test]
    fn quorum_size_never_drops_below_one() {
        assert_eq!(quorum_size(0), 1);
        assert_eq!(quorum_size(1), 1);
        assert_eq!(quorum_size(3), 2);
    }

    #[test]
    fn quorum_excludes_removed_members() {
        let previous = members(&["u0", "u1", "u2"]);

        // Removing the first member must not let them co-sign.
        let quorum = quorum_members(&previous, &members(&["u0"]));
        assert_eq!(quorum, members(&["u1", "u2"]));

        let quorum = quorum_members(&previous, &members(&["u1"]));
        assert_eq!(quorum, members(&["u0", "u2"]));

        // No removals: first quorum-many previous members.
        let quorum = quorum_members(&previous, &[]);
        assert_eq!(quorum, members(&["u0", "u1"]));
    }

    #[test]
    fn reconcile_zero_weights_removed_members_and_updates_thresholds() {
        let custody = Keypair::random();
        let signer = Keypair::random();
        let policy = CustodyPolicy::default();

        let envelope = reconcile_transaction(
            &custody,
            "GROUPWALLET",
            &members(&["NEWKEY"]),
            &members(&["OLDKEY"]),
            4,
            &[signer.clone()],
            &policy,
        )
        .unwrap();

        let ops = &envelope.tx.operations;
        assert!(matches!(
            ops[0],
            Operation::BeginSponsoringFutureReserves { .. }
        ));
        assert_eq!(
            ops[1],
            Operation::set_signer("GROUPWALLET", "NEWKEY", 1)
        );
        assert_eq!(
            ops[2],
            Operation::set_signer("GROUPWALLET", "OLDKEY", 0)
        );
        match &ops[3] {
            Operation::SetOptions {
                med_threshold,
                high_threshold,
                signer,
                master_weight,
                ..
            } => {
                assert_eq!(*med_threshold, Some(3));
                assert_eq!(*high_threshold, Some(3));
                assert!(signer.is_none());
                assert!(master_weight.is_none());
            }
            other => panic!("unexpected operation {other:?}"),
        }
        assert!(matches!(
            ops[4],
            Operation::EndSponsoringFutureReserves { .. }
        ));

        assert!(envelope.signed_by(&custody.public_key()));
        assert!(envelope.signed_by(&signer.public_key()));
    }

    #[test]
    fn removal_uses_zero_weight_not_deletion() {
        let custody = Keypair::random();
        let policy = CustodyPolicy::default();

        let envelope = reconcile_transaction(
            &custody,
            "GROUPWALLET",
            &[],
            &members(&["LEAVER"]),
            2,
            &[],
            &policy,
        )
        .unwrap();

        let zeroed = envelope.tx.operations.iter().any(|op| {
            matches!(
                op,
                Operation::SetOptions {
                    signer: Some(LedgerSigner { public_key, weight: 0 }),
                    ..
                } if public_key == "LEAVER"
            )
        });
        assert!(zeroed);
    }
}
