//! Cost estimation.

use clustergenie_core::errors::CoreResult;
use clustergenie_core::models::*;
use clustergenie_store::{DropletRepository, ProviderRepository};
use std::collections::HashMap;
use std::sync::Arc;

/// Demo price applied when a droplet carries no provider.
const DEFAULT_HOURLY_PRICE: f64 = 0.05;

pub struct BillingService {
    droplet_repo: Arc<dyn DropletRepository>,
    provider_repo: Arc<dyn ProviderRepository>,
}

impl BillingService {
    pub fn new(
        droplet_repo: Arc<dyn DropletRepository>,
        provider_repo: Arc<dyn ProviderRepository>,
    ) -> BillingService {
        BillingService {
            droplet_repo,
            provider_repo,
        }
    }

    /// Hourly and monthly cost snapshot for a cluster's droplets.
    pub async fn estimate_cluster_cost(&self, cluster_id: &str) -> CoreResult<CostEstimate> {
        let droplets = self.droplet_repo.list().await?;
        let prices: HashMap<String, f64> = self
            .provider_repo
            .list()
            .await?
            .into_iter()
            .map(|p| (p.name, p.price_per_hour))
            .collect();

        let mut count = 0;
        let mut hourly = 0.0;
        for droplet in droplets {
            if droplet.cluster_id.as_deref() != Some(cluster_id) {
                continue;
            }
            count += 1;
            hourly += prices
                .get(&droplet.provider)
                .copied()
                .unwrap_or(DEFAULT_HOURLY_PRICE);
        }

        Ok(CostEstimate {
            cluster_id: cluster_id.to_string(),
            droplet_count: count,
            hourly_cost: format!("{:.4}", hourly),
            monthly_cost: format!("{:.2}", hourly * 24.0 * 30.0),
        })
    }
}
