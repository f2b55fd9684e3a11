//! Key-value-store-backed repositories.
//!
//! Layout:
//! - `autoscale_policy:<id>` serialized policy, `autoscale_policies:cluster:<cid>` id set
//! - `deployment:<id>` serialized deployment, `deployments:cluster:<cid>` id set
//! - `provider:<id>` serialized provider, `providers:all` id set,
//!   `provider_used:<id>` atomic used counter

use async_trait::async_trait;
use chrono::Utc;
use clustergenie_core::errors::{CoreResult, DeploymentError, PolicyError, ScheduleError, StoreError};
use clustergenie_core::models::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::kv::KvStore;
use crate::repository::{DeploymentRepository, PolicyRepository, ProviderRepository};

pub struct KvPolicyRepository {
    kv: Arc<dyn KvStore>,
}

impl KvPolicyRepository {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        KvPolicyRepository { kv }
    }

    fn key(id: &str) -> String {
        format!("autoscale_policy:{}", id)
    }

    fn index(cluster_id: &str) -> String {
        format!("autoscale_policies:cluster:{}", cluster_id)
    }
}

#[async_trait]
impl PolicyRepository for KvPolicyRepository {
    async fn create(&self, mut policy: AutoscalePolicy) -> CoreResult<AutoscalePolicy> {
        if policy.id.is_empty() {
            policy.id = format!("policy-{}", Uuid::new_v4());
        }
        let now = Utc::now();
        policy.created_at = now;
        policy.updated_at = now;

        let payload = serde_json::to_string(&policy).map_err(StoreError::from)?;
        self.kv.set(&Self::key(&policy.id), &payload).await?;
        self.kv
            .sadd(&Self::index(&policy.cluster_id), &policy.id)
            .await?;
        Ok(policy)
    }

    async fn get(&self, id: &str) -> CoreResult<AutoscalePolicy> {
        let raw = self
            .kv
            .get(&Self::key(id))
            .await?
            .ok_or(PolicyError::NotFound)?;
        Ok(serde_json::from_str(&raw).map_err(StoreError::from)?)
    }

    async fn list(&self, cluster_id: &str) -> CoreResult<Vec<AutoscalePolicy>> {
        let ids = self.kv.smembers(&Self::index(cluster_id)).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(raw) = self.kv.get(&Self::key(&id)).await? {
                out.push(serde_json::from_str(&raw).map_err(StoreError::from)?);
            }
        }
        Ok(out)
    }

    async fn update(&self, mut policy: AutoscalePolicy) -> CoreResult<AutoscalePolicy> {
        policy.updated_at = Utc::now();
        let payload = serde_json::to_string(&policy).map_err(StoreError::from)?;
        self.kv.set(&Self::key(&policy.id), &payload).await?;
        Ok(policy)
    }

    async fn delete(&self, id: &str) -> CoreResult<()> {
        let policy = self.get(id).await?;
        self.kv.del(&Self::key(id)).await?;
        self.kv
            .srem(&Self::index(&policy.cluster_id), id)
            .await?;
        Ok(())
    }
}

pub struct KvDeploymentRepository {
    kv: Arc<dyn KvStore>,
}

impl KvDeploymentRepository {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        KvDeploymentRepository { kv }
    }

    fn key(id: &str) -> String {
        format!("deployment:{}", id)
    }

    fn index(cluster_id: &str) -> String {
        format!("deployments:cluster:{}", cluster_id)
    }
}

#[async_trait]
impl DeploymentRepository for KvDeploymentRepository {
    async fn create(&self, mut deployment: Deployment) -> CoreResult<Deployment> {
        if deployment.id.is_empty() {
            deployment.id = format!("deploy-{}", Uuid::new_v4());
        }
        let payload = serde_json::to_string(&deployment).map_err(StoreError::from)?;
        self.kv.set(&Self::key(&deployment.id), &payload).await?;
        self.kv
            .sadd(&Self::index(&deployment.cluster_id), &deployment.id)
            .await?;
        self.kv.sadd("deployments:all", &deployment.id).await?;
        Ok(deployment)
    }

    async fn get(&self, id: &str) -> CoreResult<Deployment> {
        let raw = self
            .kv
            .get(&Self::key(id))
            .await?
            .ok_or(DeploymentError::NotFound)?;
        Ok(serde_json::from_str(&raw).map_err(StoreError::from)?)
    }

    async fn list(&self, cluster_id: Option<&str>) -> CoreResult<Vec<Deployment>> {
        let ids = match cluster_id {
            Some(cid) => self.kv.smembers(&Self::index(cid)).await?,
            None => self.kv.smembers("deployments:all").await?,
        };
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(raw) = self.kv.get(&Self::key(&id)).await? {
                out.push(serde_json::from_str(&raw).map_err(StoreError::from)?);
            }
        }
        Ok(out)
    }

    async fn update(&self, mut deployment: Deployment) -> CoreResult<Deployment> {
        deployment.updated_at = Utc::now();
        let payload = serde_json::to_string(&deployment).map_err(StoreError::from)?;
        self.kv.set(&Self::key(&deployment.id), &payload).await?;
        Ok(deployment)
    }
}

pub struct KvProviderRepository {
    kv: Arc<dyn KvStore>,
}

impl KvProviderRepository {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        KvProviderRepository { kv }
    }

    fn key(id: &str) -> String {
        format!("provider:{}", id)
    }

    fn used_key(id: &str) -> String {
        format!("provider_used:{}", id)
    }

    async fn load(&self, id: &str) -> CoreResult<Option<Provider>> {
        let Some(raw) = self.kv.get(&Self::key(id)).await? else {
            return Ok(None);
        };
        let mut provider: Provider = serde_json::from_str(&raw).map_err(StoreError::from)?;
        provider.used = self.kv.get_i64(&Self::used_key(id)).await?;
        Ok(Some(provider))
    }
}

#[async_trait]
impl ProviderRepository for KvProviderRepository {
    async fn create(&self, mut provider: Provider) -> CoreResult<Provider> {
        if provider.id.is_empty() {
            provider.id = format!("provider-{}", provider.name);
        }
        let used = provider.used;
        // the counter key is authoritative for `used`
        let mut stored = provider.clone();
        stored.used = 0;
        let payload = serde_json::to_string(&stored).map_err(StoreError::from)?;
        self.kv.set(&Self::key(&provider.id), &payload).await?;
        self.kv.set_i64(&Self::used_key(&provider.id), used).await?;
        self.kv.sadd("providers:all", &provider.id).await?;
        Ok(provider)
    }

    async fn get(&self, id: &str) -> CoreResult<Provider> {
        self.load(id)
            .await?
            .ok_or_else(|| ScheduleError::ProviderNotFound.into())
    }

    async fn get_by_name(&self, name: &str) -> CoreResult<Option<Provider>> {
        for id in self.kv.smembers("providers:all").await? {
            if let Some(p) = self.load(&id).await? {
                if p.name == name {
                    return Ok(Some(p));
                }
            }
        }
        Ok(None)
    }

    async fn list(&self) -> CoreResult<Vec<Provider>> {
        let ids = self.kv.smembers("providers:all").await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(p) = self.load(&id).await? {
                out.push(p);
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn update(&self, provider: Provider) -> CoreResult<Provider> {
        let mut stored = provider.clone();
        stored.used = 0;
        let payload = serde_json::to_string(&stored).map_err(StoreError::from)?;
        self.kv.set(&Self::key(&provider.id), &payload).await?;
        Ok(provider)
    }

    async fn adjust_used(&self, id: &str, delta: i64) -> CoreResult<i64> {
        let key = Self::used_key(id);
        if delta >= 0 {
            Ok(self.kv.incr_by(&key, delta).await?)
        } else {
            Ok(self.kv.decr_floor_zero(&key, -delta).await?)
        }
    }
}
