//! Read-through cache of each user's parsed active policy.

use janus_types::{AccountStore, AccountStoreError, Policy, PolicyError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct CachedPolicy {
    pub config_id: String,
    pub policy: Arc<Policy>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigCacheError {
    #[error(transparent)]
    Account(#[from] AccountStoreError),
    #[error("active config {config_id} for user {user_id} is invalid: {source}")]
    InvalidPolicy {
        user_id: String,
        config_id: String,
        #[source]
        source: PolicyError,
    },
}

pub struct ConfigCache {
    accounts: Arc<dyn AccountStore + Send + Sync>,
    entries: RwLock<HashMap<String, CachedPolicy>>,
}

impl ConfigCache {
    pub fn new(accounts: Arc<dyn AccountStore + Send + Sync>) -> Self {
        Self {
            accounts,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore + Send + Sync> {
        &self.accounts
    }

    /// Cached policy, or the store's active config parsed and cached. `None` when the user
    /// has no active config.
    pub async fn get(&self, user_id: &str) -> Result<Option<CachedPolicy>, ConfigCacheError> {
        if let Some(hit) = self.entries.read().await.get(user_id) {
            return Ok(Some(hit.clone()));
        }
        let Some(active) = self.accounts.active_config(user_id).await? else {
            return Ok(None);
        };
        let policy = Policy::from_value(active.config).map_err(|source| {
            ConfigCacheError::InvalidPolicy {
                user_id: user_id.to_string(),
                config_id: active.config_id.clone(),
                source,
            }
        })?;
        let entry = CachedPolicy {
            config_id: active.config_id,
            policy: Arc::new(policy),
        };
        self.entries
            .write()
            .await
            .insert(user_id.to_string(), entry.clone());
        tracing::debug!(user_id, config_id = %entry.config_id, "policy cached");
        Ok(Some(entry))
    }

    pub async fn invalidate(&self, user_id: &str) {
        self.entries.write().await.remove(user_id);
    }

    /// Drop the cached entry and load the store's current config.
    pub async fn refresh(&self, user_id: &str) -> Result<Option<CachedPolicy>, ConfigCacheError> {
        self.invalidate(user_id).await;
        self.get(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryAccountStore;
    use janus_types::ActiveConfig;
    use serde_json::json;

    fn policy(max_jobs: i64) -> serde_json::Value {
        json!({
            "version": 1,
            "global_execution_limit": { "max_jobs": max_jobs, "window_ms": 1000 },
            "default_job_policy": { "idempotency_window_ms": 1000 }
        })
    }

    #[tokio::test]
    async fn caches_until_refreshed() {
        let accounts = Arc::new(InMemoryAccountStore::new());
        let cache = ConfigCache::new(accounts.clone());
        assert!(cache.get("u").await.unwrap().is_none());

        accounts
            .activate_config("u", ActiveConfig { config_id: "c1".into(), config: policy(5) })
            .await
            .unwrap();
        let hit = cache.get("u").await.unwrap().unwrap();
        assert_eq!(hit.config_id, "c1");

        accounts
            .activate_config("u", ActiveConfig { config_id: "c2".into(), config: policy(9) })
            .await
            .unwrap();
        assert_eq!(cache.get("u").await.unwrap().unwrap().config_id, "c1");
        let fresh = cache.refresh("u").await.unwrap().unwrap();
        assert_eq!(fresh.config_id, "c2");
        assert_eq!(fresh.policy.global_execution_limit.max_jobs, 9);
    }

    #[tokio::test]
    async fn invalid_stored_policy_is_an_error() {
        let accounts = Arc::new(InMemoryAccountStore::new());
        accounts
            .activate_config("u", ActiveConfig { config_id: "bad".into(), config: json!({}) })
            .await
            .unwrap();
        let cache = ConfigCache::new(accounts);
        assert!(matches!(
            cache.get("u").await,
            Err(ConfigCacheError::InvalidPolicy { .. })
        ));
    }
}
