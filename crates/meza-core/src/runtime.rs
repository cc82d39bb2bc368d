use crate::deposit::{settlement_transaction, SettlementFields, StkCallback};
use crate::error::CustodyError;
use crate::gateway::StkGateway;
use crate::keys::Keypair;
use crate::ledger::{LedgerClient, SubmitReceipt};
use crate::multisig::{quorum_members, reconcile_transaction, signer_diff};
use crate::policy::CustodyPolicy;
use crate::provision::{group_provisioning_transaction, user_provisioning_transaction};
use crate::store::{DepositFinalize, DocumentStore};
use crate::types::{DepositAck, DepositRecord, DepositRequest, FailPoint, GroupRecord, UserRecord};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct CustodyEngineConfig {
    pub policy: CustodyPolicy,
    /// Where the gateway posts asynchronous charge results.
    pub callback_url: String,
}

impl Default for CustodyEngineConfig {
    fn default() -> Self {
        Self {
            policy: CustodyPolicy::default(),
            callback_url: "http://127.0.0.1:8080/v1/deposits/callback".to_string(),
        }
    }
}

/// Orchestrates account provisioning, group multisig reconciliation, and
/// deposit settlement over the document store, the ledger client, and the
/// mobile-money gateway.
#[derive(Clone)]
pub struct CustodyEngine {
    store: DocumentStore,
    ledger: Arc<dyn LedgerClient>,
    gateway: Arc<dyn StkGateway>,
    custody: Keypair,
    config: CustodyEngineConfig,
}

impl CustodyEngine {
    pub fn new(
        store: DocumentStore,
        ledger: Arc<dyn LedgerClient>,
        gateway: Arc<dyn StkGateway>,
        custody: Keypair,
        config: CustodyEngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            gateway,
            custody,
            config,
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn custody_public_key(&self) -> String {
        self.custody.public_key()
    }

    pub fn policy(&self) -> &CustodyPolicy {
        &self.config.policy
    }

    /// Provision a ledger wallet for a newly registered user.
    ///
    /// Tolerates redelivery: if a record already exists it is returned as-is.
    /// A failed ledger submission still persists the record, flagged
    /// unprovisioned so deposit initiation refuses it until reconciled.
    pub async fn provision_user(&self, user_id: &str) -> Result<UserRecord, CustodyError> {
        if let Some(existing) = self.store.get_user(user_id).await? {
            debug!(user_id, "user already provisioned, ignoring redelivery");
            return Ok(existing);
        }

        let account = Keypair::random();
        let envelope =
            user_provisioning_transaction(&self.custody, &account, &self.config.policy)?;

        let provisioned = match self.ledger.submit(&envelope).await {
            Ok(receipt) => {
                info!(
                    user_id,
                    pub_key = %account.public_key(),
                    tx_hash = %receipt.tx_hash,
                    "user wallet provisioned"
                );
                true
            }
            Err(error) => {
                error!(user_id, %error, "user wallet provisioning failed on ledger");
                false
            }
        };

        let record = UserRecord {
            user_id: user_id.to_string(),
            pub_key: account.public_key(),
            sign_key: account.secret_seed(),
            groups: Vec::new(),
            provisioned,
            created_at: Utc::now(),
        };
        self.store.put_user(record.clone()).await?;
        Ok(record)
    }

    /// Provision the multisig wallet for a newly created savings group.
    ///
    /// The first member is the creator and becomes the sole member signer.
    /// Redelivery-tolerant: a group that already carries wallet credentials
    /// is returned untouched.
    pub async fn on_group_created(&self, group_id: &str) -> Result<GroupRecord, CustodyError> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| CustodyError::GroupNotFound(group_id.to_string()))?;
        if group.pub_key.is_some() {
            debug!(group_id, "group wallet already assigned, ignoring redelivery");
            return Ok(group);
        }

        let creator_id = group
            .members
            .first()
            .ok_or_else(|| CustodyError::EmptyGroup(group_id.to_string()))?
            .clone();
        let creator = self
            .store
            .get_user(&creator_id)
            .await?
            .ok_or_else(|| CustodyError::UserNotFound(creator_id.clone()))?;

        let wallet = Keypair::random();
        let envelope = group_provisioning_transaction(
            &self.custody,
            &wallet,
            &creator.pub_key,
            &self.config.policy,
        )?;

        let provisioned = match self.ledger.submit(&envelope).await {
            Ok(receipt) => {
                info!(
                    group_id,
                    wallet = %wallet.public_key(),
                    tx_hash = %receipt.tx_hash,
                    "group wallet provisioned"
                );
                true
            }
            Err(error) => {
                error!(group_id, %error, "group wallet provisioning failed on ledger");
                false
            }
        };

        let record = self
            .store
            .set_group_wallet(group_id, wallet.public_key(), wallet.secret_seed(), provisioned)
            .await?;
        self.store.add_user_group(&creator_id, group_id).await?;
        Ok(record)
    }

    /// Reconcile the group wallet's signer set after a membership change.
    ///
    /// No-op when the member sequence is unchanged. The current snapshot must
    /// still be the latest revision in the store; a concurrent membership
    /// write surfaces as [`CustodyError::RevisionConflict`] and the caller
    /// retries off the follow-up notification.
    pub async fn on_group_updated(
        &self,
        previous: &GroupRecord,
        current: &GroupRecord,
    ) -> Result<Option<SubmitReceipt>, CustodyError> {
        let diff = signer_diff(&previous.members, &current.members);
        if diff.is_empty() {
            debug!(group_id = %current.group_id, "membership unchanged, nothing to reconcile");
            return Ok(None);
        }

        let group_id = current.group_id.as_str();
        let latest = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| CustodyError::GroupNotFound(group_id.to_string()))?;
        if latest.revision != current.revision {
            return Err(CustodyError::RevisionConflict {
                group_id: group_id.to_string(),
                expected: current.revision,
                found: latest.revision,
            });
        }
        let wallet = latest
            .pub_key
            .clone()
            .ok_or_else(|| CustodyError::Unprovisioned(group_id.to_string()))?;

        let added_keys = self.resolve_member_keys(&diff.added).await?;
        let removed_keys = self.resolve_member_keys(&diff.removed).await?;

        // Authorization comes from the pre-change membership, excluding
        // anyone this change removes.
        let mut quorum_signers = Vec::new();
        for member in quorum_members(&previous.members, &diff.removed) {
            let user = self
                .store
                .get_user(&member)
                .await?
                .ok_or_else(|| CustodyError::UserNotFound(member.clone()))?;
            quorum_signers.push(Keypair::from_secret_seed(&user.sign_key)?);
        }

        let envelope = reconcile_transaction(
            &self.custody,
            &wallet,
            &added_keys,
            &removed_keys,
            current.members.len(),
            &quorum_signers,
            &self.config.policy,
        )?;
        let receipt = self.ledger.submit(&envelope).await?;

        for member in &diff.added {
            self.store.add_user_group(member, group_id).await?;
        }

        info!(
            group_id,
            added = diff.added.len(),
            removed = diff.removed.len(),
            tx_hash = %receipt.tx_hash,
            "group signers reconciled"
        );
        Ok(Some(receipt))
    }

    /// Start a deposit: push the charge prompt to the payer's handset and
    /// persist a pending record keyed by the gateway transaction id.
    pub async fn initiate_deposit(
        &self,
        request: DepositRequest,
    ) -> Result<DepositAck, CustodyError> {
        let user = self
            .store
            .get_user(&request.user_id)
            .await?
            .ok_or_else(|| CustodyError::UserNotFound(request.user_id.clone()))?;
        if !user.provisioned {
            return Err(CustodyError::Unprovisioned(request.user_id.clone()));
        }

        let ack = self
            .gateway
            .stk_push(
                &request.phone_number,
                request.amount,
                &self.config.callback_url,
                &request.chama_wallet,
            )
            .await?;
        if !ack.accepted() {
            return Err(CustodyError::GatewayRejected {
                code: ack.response_code,
                description: ack.response_description,
            });
        }

        let mut record = DepositRecord::pending(
            &ack.checkout_request_id,
            &request.user_id,
            &request.chama_wallet,
            request.amount,
            &request.reason,
        );
        record.phone = Some(request.phone_number);
        self.store.put_deposit(record).await?;

        info!(
            deposit_id = %ack.checkout_request_id,
            user_id = %request.user_id,
            amount = request.amount,
            "deposit initiated"
        );
        Ok(DepositAck {
            transaction_id: ack.checkout_request_id,
        })
    }

    /// Settle (or fail) a deposit off the gateway's asynchronous result.
    ///
    /// The claim makes this safe under duplicate callbacks: once a record is
    /// terminal, later deliveries get it back unchanged without touching the
    /// ledger. A record stuck in settling (a prior attempt died before
    /// finalizing) is claimed again, so the gateway's retry can complete it.
    pub async fn handle_stk_callback(
        &self,
        callback: StkCallback,
    ) -> Result<DepositRecord, CustodyError> {
        let deposit_id = callback.checkout_request_id.clone();

        let claimed = match self.store.claim_deposit(&deposit_id).await {
            Ok(record) => record,
            Err(CustodyError::DepositAlreadySettled { status, .. }) => {
                warn!(%deposit_id, %status, "duplicate gateway callback ignored");
                return self
                    .store
                    .get_deposit(&deposit_id)
                    .await?
                    .ok_or_else(|| CustodyError::DepositNotFound(deposit_id));
            }
            Err(error) => return Err(error),
        };

        if !callback.succeeded() {
            let record = self
                .store
                .finalize_deposit(
                    &deposit_id,
                    DepositFinalize::failed(FailPoint::Gateway, callback.failure_message()),
                )
                .await?;
            warn!(
                %deposit_id,
                result_code = callback.result_code,
                "deposit failed at gateway"
            );
            return Ok(record);
        }

        let update = match self.settle_claimed(&claimed, &callback).await {
            Ok(update) => update,
            Err(error) => {
                error!(%deposit_id, %error, "deposit settlement failed on ledger");
                DepositFinalize::failed(FailPoint::Ledger, error.to_string())
            }
        };
        let record = self.store.finalize_deposit(&deposit_id, update).await?;
        info!(%deposit_id, status = record.status.label(), "deposit finalized");
        Ok(record)
    }

    pub async fn deposit(&self, deposit_id: &str) -> Result<Option<DepositRecord>, CustodyError> {
        self.store.get_deposit(deposit_id).await
    }

    async fn settle_claimed(
        &self,
        claimed: &DepositRecord,
        callback: &StkCallback,
    ) -> Result<DepositFinalize, CustodyError> {
        let fields = SettlementFields::extract(callback.callback_metadata.as_ref());
        // Older gateway deployments omit the amount item; fall back to what
        // the payer was prompted for.
        let amount = fields.amount.unwrap_or(claimed.amount);

        let user = self
            .store
            .get_user(&claimed.user_id)
            .await?
            .ok_or_else(|| CustodyError::UserNotFound(claimed.user_id.clone()))?;
        let user_keys = Keypair::from_secret_seed(&user.sign_key)?;
        let asset = self.config.policy.asset(&self.custody.public_key());

        let envelope = settlement_transaction(
            &self.custody,
            &user_keys,
            &claimed.chama_wallet,
            &asset,
            amount,
            &claimed.reason,
            &self.config.policy,
        )?;
        let receipt = self.ledger.submit(&envelope).await?;

        Ok(DepositFinalize::success(
            amount,
            fields.phone.clone().or_else(|| claimed.phone.clone()),
            fields.receipt.clone(),
            receipt.tx_hash,
        ))
    }

    async fn resolve_member_keys(&self, members: &[String]) -> Result<Vec<String>, CustodyError> {
        let mut keys = Vec::with_capacity(members.len());
        for member in members {
            let user = self
                .store
                .get_user(member)
                .await?
                .ok_or_else(|| CustodyError::UserNotFound(member.clone()))?;
            keys.push(user.pub_key);
        }
        Ok(keys)
    }
}
