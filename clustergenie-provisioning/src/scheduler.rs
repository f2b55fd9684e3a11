//! Placement scheduler.
//!
//! Picks a provider and region for new droplets honoring capacity, an
//! optional preferred provider and an optional provider to avoid. Migration
//! adjusts usage counters first and touches the droplet last, so a
//! single-step failure cannot over-count.

use clustergenie_core::errors::{CoreResult, ScheduleError};
use clustergenie_core::models::*;
use clustergenie_store::{DropletRepository, ProviderRepository};
use std::sync::Arc;
use tracing::info;

pub struct SchedulerService {
    provider_repo: Arc<dyn ProviderRepository>,
    droplet_repo: Arc<dyn DropletRepository>,
}

impl SchedulerService {
    pub fn new(
        provider_repo: Arc<dyn ProviderRepository>,
        droplet_repo: Arc<dyn DropletRepository>,
    ) -> SchedulerService {
        SchedulerService {
            provider_repo,
            droplet_repo,
        }
    }

    pub async fn list_providers(&self) -> CoreResult<Vec<Provider>> {
        self.provider_repo.list().await
    }

    pub async fn create_provider(&self, req: &CreateProviderRequest) -> CoreResult<Provider> {
        if req.name.is_empty() {
            return Err(ScheduleError::NameRequired.into());
        }
        self.provider_repo
            .create(Provider {
                id: String::new(),
                name: req.name.clone(),
                regions: req.regions.clone(),
                capacity: req.capacity,
                used: 0,
                classes: req.classes.clone(),
                price_per_hour: req.price_per_hour,
            })
            .await
    }

    /// Pick `(provider, region)` for a new droplet. A preferred provider with
    /// remaining capacity wins outright; otherwise the provider with the most
    /// remaining capacity is chosen, skipping `avoid`. Ties keep the
    /// first-seen provider.
    pub async fn schedule_placement(
        &self,
        _cluster_id: &str,
        preferred: &str,
        avoid: &str,
    ) -> CoreResult<(Provider, String)> {
        let providers = self.provider_repo.list().await?;

        if !preferred.is_empty() {
            if let Some(p) = providers
                .iter()
                .find(|p| p.name == preferred && p.remaining() > 0)
            {
                let region = p.regions.first().cloned().unwrap_or_default();
                return Ok((p.clone(), region));
            }
        }

        let mut candidate: Option<&Provider> = None;
        for p in &providers {
            if !avoid.is_empty() && p.name == avoid {
                continue;
            }
            if p.remaining() <= 0 {
                continue;
            }
            if candidate.map_or(true, |c| p.remaining() > c.remaining()) {
                candidate = Some(p);
            }
        }

        let candidate = candidate.ok_or(ScheduleError::NoCapacity)?;
        let region = candidate.regions.first().cloned().unwrap_or_default();
        Ok((candidate.clone(), region))
    }

    /// Move a droplet onto `target_provider`, adjusting both usage counters.
    /// Counter updates happen through the store's atomic arithmetic; the
    /// droplet record is written last.
    pub async fn migrate_droplet(&self, droplet_id: &str, target_provider: &str) -> CoreResult<()> {
        let mut droplet = self.droplet_repo.get(droplet_id).await?;
        if droplet.provider == target_provider {
            return Ok(());
        }

        if !droplet.provider.is_empty() {
            if let Some(old) = self.provider_repo.get_by_name(&droplet.provider).await? {
                self.provider_repo.adjust_used(&old.id, -1).await?;
            }
        }
        if let Some(target) = self.provider_repo.get_by_name(target_provider).await? {
            self.provider_repo.adjust_used(&target.id, 1).await?;
        }

        info!(droplet_id = %droplet_id, target = %target_provider, "migrating droplet");
        droplet.provider = target_provider.to_string();
        self.droplet_repo.update(droplet).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clustergenie_store::{KvProviderRepository, MemoryDropletRepository, MemoryKv};

    async fn fixture(providers: Vec<Provider>) -> (SchedulerService, Arc<dyn DropletRepository>) {
        let kv = Arc::new(MemoryKv::new());
        let provider_repo = Arc::new(KvProviderRepository::new(kv));
        for p in providers {
            provider_repo.create(p).await.unwrap();
        }
        let droplet_repo: Arc<dyn DropletRepository> = Arc::new(MemoryDropletRepository::new());
        (
            SchedulerService::new(provider_repo, droplet_repo.clone()),
            droplet_repo,
        )
    }

    fn provider(name: &str, capacity: i64, used: i64) -> Provider {
        Provider {
            id: String::new(),
            name: name.to_string(),
            regions: vec![format!("{}-region-1", name), format!("{}-region-2", name)],
            capacity,
            used,
            classes: Vec::new(),
            price_per_hour: 0.05,
        }
    }

    #[tokio::test]
    async fn picks_provider_with_most_remaining_capacity() {
        let (scheduler, _) =
            fixture(vec![provider("A", 5, 5), provider("B", 10, 2)]).await;

        let (picked, region) = scheduler.schedule_placement("c1", "", "").await.unwrap();
        assert_eq!(picked.name, "B");
        assert_eq!(region, "B-region-1");
    }

    #[tokio::test]
    async fn preferred_provider_wins_when_it_has_room() {
        let (scheduler, _) =
            fixture(vec![provider("A", 5, 3), provider("B", 10, 2)]).await;

        let (picked, _) = scheduler.schedule_placement("c1", "A", "").await.unwrap();
        assert_eq!(picked.name, "A");
    }

    #[tokio::test]
    async fn full_preferred_falls_back_to_best_remaining() {
        let (scheduler, _) =
            fixture(vec![provider("A", 5, 5), provider("B", 10, 2)]).await;

        let (picked, _) = scheduler.schedule_placement("c1", "A", "").await.unwrap();
        assert_eq!(picked.name, "B");
    }

    #[tokio::test]
    async fn avoid_skips_a_provider() {
        let (scheduler, _) =
            fixture(vec![provider("A", 5, 0), provider("B", 10, 0)]).await;

        let (picked, _) = scheduler.schedule_placement("c1", "", "B").await.unwrap();
        assert_eq!(picked.name, "A");
    }

    #[tokio::test]
    async fn all_full_reports_no_capacity() {
        let (scheduler, _) =
            fixture(vec![provider("A", 5, 5), provider("B", 2, 2)]).await;

        let err = scheduler
            .schedule_placement("c1", "", "")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no provider capacity available");
    }

    #[tokio::test]
    async fn migration_moves_usage_counters() {
        let (scheduler, droplet_repo) =
            fixture(vec![provider("do", 2, 2), provider("aws", 3, 0)]).await;

        droplet_repo
            .create(Droplet {
                id: "d1".into(),
                cluster_id: None,
                name: "d1".into(),
                region: "nyc1".into(),
                provider: "do".into(),
                size: "s-1vcpu-1gb".into(),
                image: "ubuntu".into(),
                status: DropletStatus::Active,
                created_at: Utc::now(),
                ip_address: None,
            })
            .await
            .unwrap();

        scheduler.migrate_droplet("d1", "aws").await.unwrap();

        let providers = scheduler.list_providers().await.unwrap();
        let by_name = |n: &str| providers.iter().find(|p| p.name == n).unwrap().used;
        assert_eq!(by_name("do"), 1);
        assert_eq!(by_name("aws"), 1);
        assert_eq!(droplet_repo.get("d1").await.unwrap().provider, "aws");

        // migrating to the same provider is a no-op
        scheduler.migrate_droplet("d1", "aws").await.unwrap();
        let providers = scheduler.list_providers().await.unwrap();
        assert_eq!(providers.iter().find(|p| p.name == "aws").unwrap().used, 1);
    }
}
