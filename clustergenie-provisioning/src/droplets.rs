//! Provisioning service.
//!
//! Droplets are persisted in `provisioning` and transition to `active` with a
//! mock address after a bounded delay. When a droplet is bound to a cluster
//! its id joins the cluster's membership set within the same operation, and a
//! `droplet_created` event is committed keyed by the droplet id.

use async_trait::async_trait;
use chrono::Utc;
use clustergenie_core::errors::{CoreResult, ProvisionError};
use clustergenie_core::models::*;
use clustergenie_events::{Event, EventKind, EventPublisher, CLUSTER_EVENTS_TOPIC};
use clustergenie_jobs::ClusterProvisioner;
use clustergenie_store::DropletRepository;
use serde_json::Map;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::autoscaler::ScalesClusters;
use crate::cluster::ClusterService;
use crate::scheduler::SchedulerService;

const ACTIVATION_DELAY: Duration = Duration::from_secs(2);
const MOCK_IP: &str = "192.168.1.100";

pub struct ProvisioningService {
    droplet_repo: Arc<dyn DropletRepository>,
    cluster_svc: Arc<ClusterService>,
    publisher: Arc<dyn EventPublisher>,
    scheduler: Option<Arc<SchedulerService>>,
}

impl ProvisioningService {
    pub fn new(
        droplet_repo: Arc<dyn DropletRepository>,
        publisher: Arc<dyn EventPublisher>,
        cluster_svc: Arc<ClusterService>,
        scheduler: Option<Arc<SchedulerService>>,
    ) -> ProvisioningService {
        ProvisioningService {
            droplet_repo,
            cluster_svc,
            publisher,
            scheduler,
        }
    }

    pub async fn create_droplet(&self, req: &CreateDropletRequest) -> CoreResult<DropletResponse> {
        if req.name.is_empty() || req.region.is_empty() {
            return Err(ProvisionError::NameAndRegionRequired.into());
        }
        if let Some(cluster_id) = &req.cluster_id {
            self.cluster_svc
                .get(cluster_id)
                .await
                .map_err(|_| ProvisionError::ClusterNotFound)?;
        }

        let droplet = self
            .droplet_repo
            .create(Droplet {
                // name-derived ids keep re-creation idempotent
                id: format!("droplet-{}", req.name),
                cluster_id: req.cluster_id.clone(),
                name: req.name.clone(),
                region: req.region.clone(),
                provider: req.provider.clone(),
                size: req.size.clone(),
                image: req.image.clone(),
                status: DropletStatus::Provisioning,
                created_at: Utc::now(),
                ip_address: None,
            })
            .await?;

        if let Some(cluster_id) = &req.cluster_id {
            self.cluster_svc
                .add_droplet_to_cluster(cluster_id, &droplet.id)
                .await?;
        }

        let mut payload = Map::new();
        payload.insert(
            "droplet".to_string(),
            serde_json::to_value(&droplet).map_err(clustergenie_core::StoreError::from)?,
        );
        let event = Event::new(EventKind::DropletCreated)
            .with_cluster(req.cluster_id.as_deref().unwrap_or(""))
            .with_payload(payload);
        if let Err(e) = self
            .publisher
            .publish(CLUSTER_EVENTS_TOPIC, &droplet.id, &event)
            .await
        {
            warn!(droplet_id = %droplet.id, "failed to publish droplet_created: {}", e);
        }

        self.spawn_activation(droplet.id.clone());

        Ok(DropletResponse {
            droplet,
            message: "Droplet creation initiated".to_string(),
        })
    }

    /// Simulated provisioning: the droplet turns `active` with a mock address
    /// after a bounded delay.
    fn spawn_activation(&self, droplet_id: String) {
        let repo = self.droplet_repo.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ACTIVATION_DELAY).await;
            match repo.get(&droplet_id).await {
                Ok(mut droplet) => {
                    droplet.status = DropletStatus::Active;
                    droplet.ip_address = Some(MOCK_IP.to_string());
                    if let Err(e) = repo.update(droplet).await {
                        warn!(droplet_id = %droplet_id, "failed to activate droplet: {}", e);
                    }
                }
                // deleted before activation; nothing to do
                Err(_) => {}
            }
        });
    }

    pub async fn get_droplet(&self, id: &str) -> CoreResult<Droplet> {
        self.droplet_repo.get(id).await
    }

    pub async fn list_droplets(&self) -> CoreResult<Vec<Droplet>> {
        self.droplet_repo.list().await
    }

    pub async fn delete_droplet(&self, id: &str) -> CoreResult<()> {
        self.droplet_repo.delete(id).await
    }

    pub async fn scale(&self, cluster_id: &str, action: &str) -> CoreResult<()> {
        match action {
            "scale_up" => {
                let (provider, region) = match &self.scheduler {
                    Some(scheduler) => {
                        let (provider, region) =
                            scheduler.schedule_placement(cluster_id, "", "").await?;
                        (provider.name, region)
                    }
                    None => (String::new(), String::new()),
                };
                let req = CreateDropletRequest {
                    name: format!("scaled-{}", short_id()),
                    cluster_id: Some(cluster_id.to_string()),
                    region: if region.is_empty() {
                        "nyc1".to_string()
                    } else {
                        region
                    },
                    size: "s-1vcpu-1gb".to_string(),
                    image: "ubuntu-22-04-x64".to_string(),
                    provider,
                };
                self.create_droplet(&req).await?;
                Ok(())
            }
            "scale_down" => {
                let cluster = self.cluster_svc.get(cluster_id).await?;
                let Some(oldest) = cluster.droplets.first().cloned() else {
                    return Err(ProvisionError::NoDropletsToScaleDown.into());
                };
                self.droplet_repo.delete(&oldest).await?;
                self.cluster_svc
                    .remove_droplet_from_cluster(cluster_id, &oldest)
                    .await?;
                Ok(())
            }
            _ => Err(ProvisionError::InvalidScaleAction.into()),
        }
    }
}

#[async_trait]
impl ClusterProvisioner for ProvisioningService {
    async fn create_droplet(&self, req: CreateDropletRequest) -> CoreResult<DropletResponse> {
        ProvisioningService::create_droplet(self, &req).await
    }

    async fn scale_cluster(&self, cluster_id: &str, action: &str) -> CoreResult<()> {
        self.scale(cluster_id, action).await
    }
}

#[async_trait]
impl ScalesClusters for ProvisioningService {
    async fn scale_cluster(&self, cluster_id: &str, action: &str) -> CoreResult<()> {
        self.scale(cluster_id, action).await
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustergenie_events::{Broker, LocalEventBus};
    use clustergenie_store::{MemoryClusterRepository, MemoryDropletRepository};

    struct Fixture {
        service: ProvisioningService,
        clusters: Arc<ClusterService>,
        bus: Arc<LocalEventBus>,
    }

    fn fixture() -> Fixture {
        let clusters = Arc::new(ClusterService::new(Arc::new(MemoryClusterRepository::new())));
        let bus = Arc::new(LocalEventBus::new(Arc::new(Broker::new())));
        let service = ProvisioningService::new(
            Arc::new(MemoryDropletRepository::new()),
            bus.clone(),
            clusters.clone(),
            None,
        );
        Fixture {
            service,
            clusters,
            bus,
        }
    }

    fn droplet_request(name: &str, cluster_id: Option<String>) -> CreateDropletRequest {
        CreateDropletRequest {
            name: name.to_string(),
            cluster_id,
            region: "nyc3".to_string(),
            size: "s-1vcpu-1gb".to_string(),
            image: "ubuntu-22-04-x64".to_string(),
            provider: String::new(),
        }
    }

    #[tokio::test]
    async fn validates_name_and_region() {
        let f = fixture();
        let err = f
            .service
            .create_droplet(&CreateDropletRequest {
                name: String::new(),
                cluster_id: None,
                region: "nyc3".into(),
                size: String::new(),
                image: String::new(),
                provider: String::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "name and region are required");
    }

    #[tokio::test]
    async fn rejects_missing_cluster() {
        let f = fixture();
        let err = f
            .service
            .create_droplet(&droplet_request("web-1", Some("missing".into())))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cluster not found");
    }

    #[tokio::test]
    async fn binds_droplet_into_cluster_without_duplicates() {
        let f = fixture();
        let cluster = f
            .clusters
            .create(&CreateClusterRequest {
                name: "c1".into(),
                region: "nyc1".into(),
            })
            .await
            .unwrap()
            .cluster;

        let resp = f
            .service
            .create_droplet(&droplet_request("web-1", Some(cluster.id.clone())))
            .await
            .unwrap();
        assert_eq!(resp.droplet.status, DropletStatus::Provisioning);

        // re-creating the same droplet must not duplicate membership
        f.service
            .create_droplet(&droplet_request("web-1", Some(cluster.id.clone())))
            .await
            .unwrap();

        let cluster = f.clusters.get(&cluster.id).await.unwrap();
        assert_eq!(cluster.droplets, vec![resp.droplet.id.clone()]);
    }

    #[tokio::test]
    async fn publishes_droplet_created_keyed_by_droplet() {
        let f = fixture();
        let mut rx = f.bus.subscribe_topic(CLUSTER_EVENTS_TOPIC);

        f.service
            .create_droplet(&droplet_request("web-2", None))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::DropletCreated);
        assert!(event.payload.contains_key("droplet"));
    }

    #[tokio::test]
    async fn droplet_activates_after_bounded_delay() {
        let f = fixture();
        let resp = f
            .service
            .create_droplet(&droplet_request("web-3", None))
            .await
            .unwrap();

        let mut droplet = f.service.get_droplet(&resp.droplet.id).await.unwrap();
        assert_eq!(droplet.status, DropletStatus::Provisioning);

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            droplet = f.service.get_droplet(&resp.droplet.id).await.unwrap();
            if droplet.status == DropletStatus::Active {
                break;
            }
        }
        assert_eq!(droplet.status, DropletStatus::Active);
        assert_eq!(droplet.ip_address.as_deref(), Some(MOCK_IP));
    }

    #[tokio::test]
    async fn scale_up_adds_and_scale_down_removes_oldest() {
        let f = fixture();
        let cluster = f
            .clusters
            .create(&CreateClusterRequest {
                name: "c1".into(),
                region: "nyc1".into(),
            })
            .await
            .unwrap()
            .cluster;

        f.service.scale(&cluster.id, "scale_up").await.unwrap();
        f.service.scale(&cluster.id, "scale_up").await.unwrap();
        let after_up = f.clusters.get(&cluster.id).await.unwrap();
        assert_eq!(after_up.droplets.len(), 2);

        let oldest = after_up.droplets[0].clone();
        f.service.scale(&cluster.id, "scale_down").await.unwrap();
        let after_down = f.clusters.get(&cluster.id).await.unwrap();
        assert_eq!(after_down.droplets.len(), 1);
        assert!(!after_down.droplets.contains(&oldest));
    }

    #[tokio::test]
    async fn scale_down_on_empty_cluster_fails() {
        let f = fixture();
        let cluster = f
            .clusters
            .create(&CreateClusterRequest {
                name: "empty".into(),
                region: "nyc1".into(),
            })
            .await
            .unwrap()
            .cluster;

        let err = f.service.scale(&cluster.id, "scale_down").await.unwrap_err();
        assert_eq!(err.to_string(), "no droplets to scale down");

        let err = f.service.scale(&cluster.id, "sideways").await.unwrap_err();
        assert_eq!(err.to_string(), "invalid scale action");
    }
}
