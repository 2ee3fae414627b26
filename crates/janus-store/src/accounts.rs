//! In-memory AccountStore: per-user service switch and active policy.

use async_trait::async_trait;
use janus_types::{AccountStore, AccountStoreError, ActiveConfig, ServiceStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct Account {
    status: ServiceStatus,
    config: Option<ActiveConfig>,
}

pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn is_service_running(&self, user_id: &str) -> Result<bool, AccountStoreError> {
        Ok(self.service_status(user_id).await? == ServiceStatus::Running)
    }

    async fn service_status(&self, user_id: &str) -> Result<ServiceStatus, AccountStoreError> {
        let guard = self.accounts.read().await;
        let status = guard.get(user_id).map(|a| a.status).unwrap_or_default();
        tracing::debug!(user_id, status = ?status, "service status");
        Ok(status)
    }

    async fn set_service_status(
        &self,
        user_id: &str,
        status: ServiceStatus,
    ) -> Result<(), AccountStoreError> {
        let mut guard = self.accounts.write().await;
        guard.entry(user_id.to_string()).or_default().status = status;
        Ok(())
    }

    async fn active_config(
        &self,
        user_id: &str,
    ) -> Result<Option<ActiveConfig>, AccountStoreError> {
        let guard = self.accounts.read().await;
        Ok(guard.get(user_id).and_then(|a| a.config.clone()))
    }

    async fn activate_config(
        &self,
        user_id: &str,
        config: ActiveConfig,
    ) -> Result<(), AccountStoreError> {
        let mut guard = self.accounts.write().await;
        guard.entry(user_id.to_string()).or_default().config = Some(config);
        Ok(())
    }

    async fn deactivate_config(&self, user_id: &str) -> Result<bool, AccountStoreError> {
        let mut guard = self.accounts.write().await;
        Ok(guard
            .get_mut(user_id)
            .and_then(|a| a.config.take())
            .is_some())
    }
}
