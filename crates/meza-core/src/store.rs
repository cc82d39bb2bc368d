use crate::error::CustodyError;
use crate::types::{DepositRecord, DepositStatus, FailPoint, GroupRecord, UserRecord};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Document store backend configuration.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Keep all records in process memory only.
    Memory,
    /// Persist records in PostgreSQL, one JSONB document per record.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Change notifications emitted on group create/update, standing in for the
/// document store's notify-on-write primitive. Delivery is at-least-once from
/// the consumer's perspective; handlers must tolerate redelivery.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    GroupCreated {
        group: GroupRecord,
    },
    GroupUpdated {
        previous: GroupRecord,
        current: GroupRecord,
    },
}

/// Terminal update applied to a deposit record exactly once.
#[derive(Debug, Clone)]
pub struct DepositFinalize {
    pub status: DepositStatus,
    pub fail_point: Option<FailPoint>,
    pub phone: Option<String>,
    pub amount: Option<u64>,
    pub mpesa_receipt_number: Option<String>,
    pub message: Option<String>,
    pub tx_hash: Option<String>,
}

impl DepositFinalize {
    pub fn success(
        amount: u64,
        phone: Option<String>,
        mpesa_receipt_number: Option<String>,
        tx_hash: String,
    ) -> Self {
        Self {
            status: DepositStatus::Success,
            fail_point: None,
            phone,
            amount: Some(amount),
            mpesa_receipt_number,
            message: None,
            tx_hash: Some(tx_hash),
        }
    }

    pub fn failed(fail_point: FailPoint, message: impl Into<String>) -> Self {
        Self {
            status: DepositStatus::Failed,
            fail_point: Some(fail_point),
            phone: None,
            amount: None,
            mpesa_receipt_number: None,
            message: Some(message.into()),
            tx_hash: None,
        }
    }

    fn apply(&self, record: &mut DepositRecord) {
        record.status = self.status;
        record.fail_point = self.fail_point;
        if let Some(amount) = self.amount {
            record.amount = amount;
        }
        if let Some(phone) = &self.phone {
            record.phone = Some(phone.clone());
        }
        if let Some(receipt) = &self.mpesa_receipt_number {
            record.mpesa_receipt_number = Some(receipt.clone());
        }
        if let Some(message) = &self.message {
            record.message = Some(message.clone());
        }
        if let Some(tx_hash) = &self.tx_hash {
            record.tx_hash = Some(tx_hash.clone());
        }
    }
}

#[derive(Clone)]
enum Backend {
    Memory(MemoryBackend),
    Postgres(PostgresBackend),
}

/// Per-collection CRUD over users, groups, and deposits, plus the CAS paths
/// the settlement and reconciliation flows rely on.
#[derive(Clone)]
pub struct DocumentStore {
    backend: Backend,
    events: broadcast::Sender<StoreEvent>,
}

impl DocumentStore {
    pub async fn bootstrap(config: StoreConfig) -> Result<Self, CustodyError> {
        let backend = match config {
            StoreConfig::Memory => Backend::Memory(MemoryBackend::default()),
            StoreConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresBackend::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                Backend::Postgres(store)
            }
        };
        let (events, _) = broadcast::channel(64);
        Ok(Self { backend, events })
    }

    pub fn backend_label(&self) -> &'static str {
        match &self.backend {
            Backend::Memory(_) => "memory",
            Backend::Postgres(_) => "postgres",
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        // No receivers is fine; the watcher may not be attached in tests.
        let _ = self.events.send(event);
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, CustodyError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.state.read().await.users.get(user_id).cloned()),
            Backend::Postgres(store) => store.get_user(user_id).await,
        }
    }

    pub async fn put_user(&self, record: UserRecord) -> Result<(), CustodyError> {
        match &self.backend {
            Backend::Memory(store) => {
                store
                    .state
                    .write()
                    .await
                    .users
                    .insert(record.user_id.clone(), record);
                Ok(())
            }
            Backend::Postgres(store) => store.put_user(&record).await,
        }
    }

    /// Append a group id to a user's membership list (array-union semantics).
    pub async fn add_user_group(
        &self,
        user_id: &str,
        group_id: &str,
    ) -> Result<UserRecord, CustodyError> {
        let mut record = self
            .get_user(user_id)
            .await?
            .ok_or_else(|| CustodyError::UserNotFound(user_id.to_string()))?;
        if !record.groups.iter().any(|id| id == group_id) {
            record.groups.push(group_id.to_string());
            self.put_user(record.clone()).await?;
        }
        Ok(record)
    }

    pub async fn get_group(&self, group_id: &str) -> Result<Option<GroupRecord>, CustodyError> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.state.read().await.groups.get(group_id).cloned()),
            Backend::Postgres(store) => store.get_group(group_id).await,
        }
    }

    /// Create a group document and notify subscribers.
    pub async fn create_group(&self, record: GroupRecord) -> Result<GroupRecord, CustodyError> {
        match &self.backend {
            Backend::Memory(store) => {
                let mut state = store.state.write().await;
                if state.groups.contains_key(&record.group_id) {
                    return Err(CustodyError::Store(format!(
                        "group '{}' already exists",
                        record.group_id
                    )));
                }
                state.groups.insert(record.group_id.clone(), record.clone());
            }
            Backend::Postgres(store) => store.insert_group(&record).await?,
        }
        self.emit(StoreEvent::GroupCreated {
            group: record.clone(),
        });
        Ok(record)
    }

    /// Merge wallet credentials into a group record. Does not bump the
    /// revision or emit a membership event.
    pub async fn set_group_wallet(
        &self,
        group_id: &str,
        pub_key: String,
        sign_key: String,
        provisioned: bool,
    ) -> Result<GroupRecord, CustodyError> {
        let mut record = self
            .get_group(group_id)
            .await?
            .ok_or_else(|| CustodyError::GroupNotFound(group_id.to_string()))?;
        record.pub_key = Some(pub_key);
        record.sign_key = Some(sign_key);
        record.provisioned = provisioned;
        self.put_group(&record).await?;
        Ok(record)
    }

    /// Replace a group's member sequence under an optimistic revision check,
    /// bumping the revision and notifying subscribers with both snapshots.
    pub async fn update_group_members(
        &self,
        group_id: &str,
        members: Vec<String>,
        expected_revision: u64,
    ) -> Result<(GroupRecord, GroupRecord), CustodyError> {
        let (previous, current) = match &self.backend {
            Backend::Memory(store) => {
                let mut state = store.state.write().await;
                let record = state
                    .groups
                    .get_mut(group_id)
                    .ok_or_else(|| CustodyError::GroupNotFound(group_id.to_string()))?;
                if record.revision != expected_revision {
                    return Err(CustodyError::RevisionConflict {
                        group_id: group_id.to_string(),
                        expected: expected_revision,
                        found: record.revision,
                    });
                }
                let previous = record.clone();
                record.members = members;
                record.revision += 1;
                (previous, record.clone())
            }
            Backend::Postgres(store) => {
                store
                    .update_group_members(group_id, members, expected_revision)
                    .await?
            }
        };
        self.emit(StoreEvent::GroupUpdated {
            previous: previous.clone(),
            current: current.clone(),
        });
        Ok((previous, current))
    }

    pub async fn get_deposit(
        &self,
        deposit_id: &str,
    ) -> Result<Option<DepositRecord>, CustodyError> {
        match &self.backend {
            Backend::Memory(store) => {
                Ok(store.state.read().await.deposits.get(deposit_id).cloned())
            }
            Backend::Postgres(store) => store.get_deposit(deposit_id).await,
        }
    }

    pub async fn put_deposit(&self, record: DepositRecord) -> Result<(), CustodyError> {
        match &self.backend {
            Backend::Memory(store) => {
                store
                    .state
                    .write()
                    .await
                    .deposits
                    .insert(record.deposit_id.clone(), record);
                Ok(())
            }
            Backend::Postgres(store) => store.put_deposit(&record).await,
        }
    }

    /// Atomically move a non-terminal deposit into settling. Terminal records
    /// refuse the claim with [`CustodyError::DepositAlreadySettled`], so a
    /// finalized deposit is never reprocessed. A record already in settling
    /// may be re-claimed: the gateway only redelivers after a non-2xx
    /// response, which means the previous attempt died between claim and
    /// finalize and the retry must be allowed to finish the job.
    pub async fn claim_deposit(&self, deposit_id: &str) -> Result<DepositRecord, CustodyError> {
        match &self.backend {
            Backend::Memory(store) => {
                let mut state = store.state.write().await;
                let record = state
                    .deposits
                    .get_mut(deposit_id)
                    .ok_or_else(|| CustodyError::DepositNotFound(deposit_id.to_string()))?;
                if record.status.is_terminal() {
                    return Err(CustodyError::DepositAlreadySettled {
                        deposit_id: deposit_id.to_string(),
                        status: record.status.label().to_string(),
                    });
                }
                record.status = DepositStatus::Settling;
                Ok(record.clone())
            }
            Backend::Postgres(store) => store.claim_deposit(deposit_id).await,
        }
    }

    /// Write a deposit's terminal outcome. Refused once the record is
    /// terminal, so pending→terminal happens at most once.
    pub async fn finalize_deposit(
        &self,
        deposit_id: &str,
        update: DepositFinalize,
    ) -> Result<DepositRecord, CustodyError> {
        debug_assert!(update.status.is_terminal());
        match &self.backend {
            Backend::Memory(store) => {
                let mut state = store.state.write().await;
                let record = state
                    .deposits
                    .get_mut(deposit_id)
                    .ok_or_else(|| CustodyError::DepositNotFound(deposit_id.to_string()))?;
                if record.status.is_terminal() {
                    return Err(CustodyError::DepositAlreadySettled {
                        deposit_id: deposit_id.to_string(),
                        status: record.status.label().to_string(),
                    });
                }
                update.apply(record);
                Ok(record.clone())
            }
            Backend::Postgres(store) => store.finalize_deposit(deposit_id, &update).await,
        }
    }

    async fn put_group(&self, record: &GroupRecord) -> Result<(), CustodyError> {
        match &self.backend {
            Backend::Memory(store) => {
                store
                    .state
                    .write()
                    .await
                    .groups
                    .insert(record.group_id.clone(), record.clone());
                Ok(())
            }
            Backend::Postgres(store) => store.put_group(record).await,
        }
    }
}

#[derive(Default, Clone)]
struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, UserRecord>,
    groups: HashMap<String, GroupRecord>,
    deposits: HashMap<String, DepositRecord>,
}

#[derive(Clone)]
struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    async fn connect(database_url: &str, max_connections: u32) -> Result<Self, CustodyError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| CustodyError::Store(format!("postgres connect failed: {e}")))?;
        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<(), CustodyError> {
        for statement in [
            r#"
            CREATE TABLE IF NOT EXISTS meza_users (
                user_id TEXT PRIMARY KEY,
                doc JSONB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS meza_groups (
                group_id TEXT PRIMARY KEY,
                revision BIGINT NOT NULL,
                doc JSONB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS meza_deposits (
                deposit_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                doc JSONB NOT NULL
            )
            "#,
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| CustodyError::Store(format!("postgres schema create failed: {e}")))?;
        }
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, CustodyError> {
        let row = sqlx::query("SELECT doc FROM meza_users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CustodyError::Store(format!("postgres user read failed: {e}")))?;
        row.map(|row| decode_doc(&row)).transpose()
    }

    async fn put_user(&self, record: &UserRecord) -> Result<(), CustodyError> {
        sqlx::query(
            r#"
            INSERT INTO meza_users (user_id, doc) VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET doc = EXCLUDED.doc
            "#,
        )
        .bind(&record.user_id)
        .bind(encode_doc(record)?)
        .execute(&self.pool)
        .await
        .map_err(|e| CustodyError::Store(format!("postgres user write failed: {e}")))?;
        Ok(())
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<GroupRecord>, CustodyError> {
        let row = sqlx::query("SELECT doc FROM meza_groups WHERE group_id = $1")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CustodyError::Store(format!("postgres group read failed: {e}")))?;
        row.map(|row| decode_doc(&row)).transpose()
    }

    async fn insert_group(&self, record: &GroupRecord) -> Result<(), CustodyError> {
        let result = sqlx::query(
            "INSERT INTO meza_groups (group_id, revision, doc) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(&record.group_id)
        .bind(record.revision as i64)
        .bind(encode_doc(record)?)
        .execute(&self.pool)
        .await
        .map_err(|e| CustodyError::Store(format!("postgres group insert failed: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(CustodyError::Store(format!(
                "group '{}' already exists",
                record.group_id
            )));
        }
        Ok(())
    }

    async fn put_group(&self, record: &GroupRecord) -> Result<(), CustodyError> {
        sqlx::query(
            r#"
            INSERT INTO meza_groups (group_id, revision, doc) VALUES ($1, $2, $3)
            ON CONFLICT (group_id) DO UPDATE SET revision = EXCLUDED.revision, doc = EXCLUDED.doc
            "#,
        )
        .bind(&record.group_id)
        .bind(record.revision as i64)
        .bind(encode_doc(record)?)
        .execute(&self.pool)
        .await
        .map_err(|e| CustodyError::Store(format!("postgres group write failed: {e}")))?;
        Ok(())
    }

    async fn update_group_members(
        &self,
        group_id: &str,
        members: Vec<String>,
        expected_revision: u64,
    ) -> Result<(GroupRecord, GroupRecord), CustodyError> {
        let previous = self
            .get_group(group_id)
            .await?
            .ok_or_else(|| CustodyError::GroupNotFound(group_id.to_string()))?;

        let mut current = previous.clone();
        current.members = members;
        current.revision = expected_revision + 1;

        let result = sqlx::query(
            "UPDATE meza_groups SET revision = $1, doc = $2 WHERE group_id = $3 AND revision = $4",
        )
        .bind(current.revision as i64)
        .bind(encode_doc(&current)?)
        .bind(group_id)
        .bind(expected_revision as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| CustodyError::Store(format!("postgres group update failed: {e}")))?;

        if result.rows_affected() == 0 {
            let found = self
                .get_group(group_id)
                .await?
                .map(|record| record.revision)
                .unwrap_or_default();
            return Err(CustodyError::RevisionConflict {
                group_id: group_id.to_string(),
                expected: expected_revision,
                found,
            });
        }
        Ok((previous, current))
    }

    async fn get_deposit(&self, deposit_id: &str) -> Result<Option<DepositRecord>, CustodyError> {
        let row = sqlx::query("SELECT doc FROM meza_deposits WHERE deposit_id = $1")
            .bind(deposit_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CustodyError::Store(format!("postgres deposit read failed: {e}")))?;
        row.map(|row| decode_doc(&row)).transpose()
    }

    async fn put_deposit(&self, record: &DepositRecord) -> Result<(), CustodyError> {
        sqlx::query(
            r#"
            INSERT INTO meza_deposits (deposit_id, status, doc) VALUES ($1, $2, $3)
            ON CONFLICT (deposit_id) DO UPDATE SET status = EXCLUDED.status, doc = EXCLUDED.doc
            "#,
        )
        .bind(&record.deposit_id)
        .bind(record.status.label())
        .bind(encode_doc(record)?)
        .execute(&self.pool)
        .await
        .map_err(|e| CustodyError::Store(format!("postgres deposit write failed: {e}")))?;
        Ok(())
    }

    async fn claim_deposit(&self, deposit_id: &str) -> Result<DepositRecord, CustodyError> {
        let row = sqlx::query(
            r#"
            UPDATE meza_deposits
            SET status = 'settling', doc = doc || '{"status":"settling"}'::jsonb
            WHERE deposit_id = $1 AND status IN ('pending', 'settling')
            RETURNING doc
            "#,
        )
        .bind(deposit_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CustodyError::Store(format!("postgres deposit claim failed: {e}")))?;

        match row {
            Some(row) => decode_doc(&row),
            None => {
                let current = self
                    .get_deposit(deposit_id)
                    .await?
                    .ok_or_else(|| CustodyError::DepositNotFound(deposit_id.to_string()))?;
                Err(CustodyError::DepositAlreadySettled {
                    deposit_id: deposit_id.to_string(),
                    status: current.status.label().to_string(),
                })
            }
        }
    }

    async fn finalize_deposit(
        &self,
        deposit_id: &str,
        update: &DepositFinalize,
    ) -> Result<DepositRecord, CustodyError> {
        let mut record = self
            .get_deposit(deposit_id)
            .await?
            .ok_or_else(|| CustodyError::DepositNotFound(deposit_id.to_string()))?;
        if record.status.is_terminal() {
            return Err(CustodyError::DepositAlreadySettled {
                deposit_id: deposit_id.to_string(),
                status: record.status.label().to_string(),
            });
        }
        update.apply(&mut record);

        let result = sqlx::query(
            r#"
            UPDATE meza_deposits SET status = $1, doc = $2
            WHERE deposit_id = $3 AND status IN ('pending', 'settling')
            "#,
        )
        .bind(record.status.label())
        .bind(encode_doc(&record)?)
        .bind(deposit_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CustodyError::Store(format!("postgres deposit finalize failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(CustodyError::DepositAlreadySettled {
                deposit_id: deposit_id.to_string(),
                status: "terminal".to_string(),
            });
        }
        Ok(record)
    }
}

fn encode_doc<T: serde::Serialize>(record: &T) -> Result<serde_json::Value, CustodyError> {
    serde_json::to_value(record).map_err(|e| CustodyError::Serialization(e.to_string()))
}

fn decode_doc<T: serde::de::DeserializeOwned>(
    row: &sqlx::postgres::PgRow,
) -> Result<T, CustodyError> {
    let doc: serde_json::Value = row
        .try_get("doc")
        .map_err(|e| CustodyError::Store(format!("postgres doc decode failed: {e}")))?;
    serde_json::from_value(doc).map_err(|e| CustodyError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn memory_store() -> DocumentStore {
        DocumentStore::bootstrap(StoreConfig::memory()).await.unwrap()
    }

    fn user(id: &str) -> UserRecord {
        UserRecord {
            user_id: id.to_string(),
            pub_key: format!("PUB-{id}"),
            sign_key: format!("SEED-{id}"),
            groups: Vec::new(),
            provisioned: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn add_user_group_is_idempotent() {
        let store = memory_store().await;
        store.put_user(user("u1")).await.unwrap();

        store.add_user_group("u1", "g1").await.unwrap();
        let record = store.add_user_group("u1", "g1").await.unwrap();
        assert_eq!(record.groups, vec!["g1".to_string()]);
    }

    #[tokio::test]
    async fn group_creation_notifies_subscribers() {
        let store = memory_store().await;
        let mut events = store.subscribe();

        store
            .create_group(GroupRecord::new("g1", "kikundi", vec!["u1".to_string()]))
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            StoreEvent::GroupCreated { group } => assert_eq!(group.group_id, "g1"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn member_update_bumps_revision_and_carries_both_snapshots() {
        let store = memory_store().await;
        store
            .create_group(GroupRecord::new("g1", "kikundi", vec!["u1".to_string()]))
            .await
            .unwrap();
        let mut events = store.subscribe();

        let (previous, current) = store
            .update_group_members("g1", vec!["u1".to_string(), "u2".to_string()], 0)
            .await
            .unwrap();
        assert_eq!(previous.revision, 0);
        assert_eq!(current.revision, 1);
        assert_eq!(current.members.len(), 2);

        match events.recv().await.unwrap() {
            StoreEvent::GroupUpdated { previous, current } => {
                assert_eq!(previous.members.len(), 1);
                assert_eq!(current.members.len(), 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let store = memory_store().await;
        store
            .create_group(GroupRecord::new("g1", "kikundi", vec!["u1".to_string()]))
            .await
            .unwrap();
        store
            .update_group_members("g1", vec!["u1".to_string(), "u2".to_string()], 0)
            .await
            .unwrap();

        let err = store
            .update_group_members("g1", vec!["u1".to_string()], 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::RevisionConflict { found: 1, .. }));
    }

    #[tokio::test]
    async fn settling_deposit_can_be_reclaimed_until_finalized() {
        let store = memory_store().await;
        store
            .put_deposit(DepositRecord::pending("d1", "u1", "GROUP", 500, "contribution"))
            .await
            .unwrap();

        let claimed = store.claim_deposit("d1").await.unwrap();
        assert_eq!(claimed.status, DepositStatus::Settling);

        // An interrupted settlement attempt leaves the record in settling;
        // the gateway's redelivery must be able to pick it back up.
        let reclaimed = store.claim_deposit("d1").await.unwrap();
        assert_eq!(reclaimed.status, DepositStatus::Settling);

        store
            .finalize_deposit(
                "d1",
                DepositFinalize::failed(FailPoint::Ledger, "custody account underfunded"),
            )
            .await
            .unwrap();
        let err = store.claim_deposit("d1").await.unwrap_err();
        assert!(matches!(err, CustodyError::DepositAlreadySettled { .. }));
    }

    #[tokio::test]
    async fn terminal_deposits_never_reopen() {
        let store = memory_store().await;
        store
            .put_deposit(DepositRecord::pending("d1", "u1", "GROUP", 500, "contribution"))
            .await
            .unwrap();
        store.claim_deposit("d1").await.unwrap();
        store
            .finalize_deposit(
                "d1",
                DepositFinalize::success(500, Some("2547...".into()), Some("MRL1".into()), "hash".into()),
            )
            .await
            .unwrap();

        let err = store
            .finalize_deposit("d1", DepositFinalize::failed(FailPoint::Gateway, "1: dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::DepositAlreadySettled { .. }));

        let record = store.get_deposit("d1").await.unwrap().unwrap();
        assert_eq!(record.status, DepositStatus::Success);
        assert_eq!(record.mpesa_receipt_number.as_deref(), Some("MRL1"));
    }
}
