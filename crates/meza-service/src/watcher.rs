use meza_core::{CustodyEngine, StoreEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Dispatch store change notifications into the custody engine.
///
/// Handler failures are logged, never fatal: provisioning and reconciliation
/// are redelivery-tolerant, so the next notification (or a manual replay)
/// picks up where a failed attempt left off.
pub fn spawn_store_watcher(
    engine: Arc<CustodyEngine>,
    mut events: broadcast::Receiver<StoreEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StoreEvent::GroupCreated { group }) => {
                    if let Err(error) = engine.on_group_created(&group.group_id).await {
                        error!(group_id = %group.group_id, %error, "group wallet provisioning failed");
                    }
                }
                Ok(StoreEvent::GroupUpdated { previous, current }) => {
                    if let Err(error) = engine.on_group_updated(&previous, &current).await {
                        error!(group_id = %current.group_id, %error, "signer reconciliation failed");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "store event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ServiceConfig, ServiceState};
    use meza_core::GroupRecord;
    use std::time::Duration;

    #[tokio::test]
    async fn group_creation_event_provisions_the_wallet() {
        let state = ServiceState::bootstrap(ServiceConfig::default())
            .await
            .unwrap();
        state.engine.provision_user("creator").await.unwrap();

        let watcher = spawn_store_watcher(state.engine.clone(), state.engine.store().subscribe());

        state
            .engine
            .store()
            .create_group(GroupRecord::new("g1", "kikundi", vec!["creator".to_string()]))
            .await
            .unwrap();

        let mut provisioned = None;
        for _ in 0..50 {
            let group = state.engine.store().get_group("g1").await.unwrap().unwrap();
            if group.provisioned {
                provisioned = Some(group);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let group = provisioned.expect("watcher provisioned the group wallet");
        assert!(group.pub_key.is_some());

        watcher.abort();
    }

    #[tokio::test]
    async fn membership_update_event_reconciles_signers() {
        let state = ServiceState::bootstrap(ServiceConfig::default())
            .await
            .unwrap();
        for user in ["u0", "u1"] {
            state.engine.provision_user(user).await.unwrap();
        }
        state
            .engine
            .store()
            .create_group(GroupRecord::new("g1", "kikundi", vec!["u0".to_string()]))
            .await
            .unwrap();
        state.engine.on_group_created("g1").await.unwrap();

        let watcher = spawn_store_watcher(state.engine.clone(), state.engine.store().subscribe());

        state
            .engine
            .store()
            .update_group_members("g1", vec!["u0".to_string(), "u1".to_string()], 0)
            .await
            .unwrap();

        let mut joined = false;
        for _ in 0..50 {
            let user = state.engine.store().get_user("u1").await.unwrap().unwrap();
            if user.groups.contains(&"g1".to_string()) {
                joined = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(joined, "watcher linked the new member to the group");

        watcher.abort();
    }
}
