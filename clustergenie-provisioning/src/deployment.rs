//! Deployment simulator.
//!
//! Drives a rollout state machine in the background:
//! `pending → in-progress → (rolled_out | failed → rolled_back)`. Each
//! strategy walks its own step list, appending a log line and sleeping
//! between steps; monitoring steps fail with a configurable probability and
//! trigger an automatic rollback. Used as a state-machine fixture, not a real
//! rollout engine.

use chrono::Utc;
use clustergenie_core::errors::{CoreResult, DeploymentError};
use clustergenie_core::models::*;
use clustergenie_events::{Event, EventKind, EventPublisher, DEPLOYMENTS_TOPIC};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Map;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const DEFAULT_FAILURE_RATE: f64 = 0.15;
const DEFAULT_BASE_DELAY_MS: u64 = 800;
const DEFAULT_JITTER_MS: u64 = 600;
const ROLLBACK_PAUSE: Duration = Duration::from_millis(200);

pub struct DeploymentService {
    repo: Arc<dyn clustergenie_store::DeploymentRepository>,
    publisher: Arc<dyn EventPublisher>,
    failure_rate: f64,
    base_delay_ms: u64,
    jitter_ms: u64,
    rng_seed: Option<u64>,
}

impl DeploymentService {
    pub fn new(
        repo: Arc<dyn clustergenie_store::DeploymentRepository>,
        publisher: Arc<dyn EventPublisher>,
    ) -> DeploymentService {
        DeploymentService {
            repo,
            publisher,
            failure_rate: DEFAULT_FAILURE_RATE,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            jitter_ms: DEFAULT_JITTER_MS,
            rng_seed: None,
        }
    }

    /// Force the monitor-step failure probability. Tests pin this to 0 or 1.
    pub fn with_failure_rate(mut self, rate: f64) -> DeploymentService {
        self.failure_rate = rate;
        self
    }

    /// Shrink the simulated step delays.
    pub fn with_step_delay(mut self, base_ms: u64, jitter_ms: u64) -> DeploymentService {
        self.base_delay_ms = base_ms;
        self.jitter_ms = jitter_ms;
        self
    }

    /// Seed the simulator's RNG for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> DeploymentService {
        self.rng_seed = Some(seed);
        self
    }

    pub async fn start_deployment(&self, req: &StartDeploymentRequest) -> CoreResult<Deployment> {
        if req.cluster_id.is_empty() || req.version.is_empty() {
            return Err(DeploymentError::MissingFields.into());
        }
        let deployment = self
            .repo
            .create(Deployment {
                id: String::new(),
                cluster_id: req.cluster_id.clone(),
                version: req.version.clone(),
                strategy: req.strategy,
                target_percent: req.target_percent,
                status: DeployStatus::Pending,
                started_at: Utc::now(),
                updated_at: Utc::now(),
                logs: Vec::new(),
            })
            .await?;

        self.spawn_rollout(deployment.id.clone());
        Ok(deployment)
    }

    pub async fn get_deployment(&self, id: &str) -> CoreResult<Deployment> {
        self.repo.get(id).await
    }

    pub async fn list_deployments(&self, cluster_id: Option<&str>) -> CoreResult<Vec<Deployment>> {
        self.repo.list(cluster_id).await
    }

    /// Immediate manual rollback.
    pub async fn rollback(&self, id: &str) -> CoreResult<Deployment> {
        let mut deployment = self.repo.get(id).await?;
        deployment.status = DeployStatus::RolledBack;
        deployment.logs.push(format!(
            "manual rollback requested at {}",
            Utc::now().to_rfc3339()
        ));
        let deployment = self.repo.update(deployment).await?;
        publish_deployment_event(&self.publisher, "deployment_rollback", &deployment).await;
        Ok(deployment)
    }

    fn spawn_rollout(&self, id: String) {
        let repo = self.repo.clone();
        let publisher = self.publisher.clone();
        let failure_rate = self.failure_rate;
        let base_delay_ms = self.base_delay_ms;
        let jitter_ms = self.jitter_ms;
        let rng_seed = self.rng_seed;
        tokio::spawn(async move {
            let mut rng = match rng_seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            if let Err(e) = simulate_rollout(
                repo,
                publisher,
                &id,
                failure_rate,
                base_delay_ms,
                jitter_ms,
                &mut rng,
            )
            .await
            {
                warn!(deployment_id = %id, "rollout simulation failed: {}", e);
            }
        });
    }
}

fn steps_for(strategy: DeployStrategy) -> &'static [&'static str] {
    match strategy {
        DeployStrategy::Canary => &[
            "create canary",
            "route 10% traffic",
            "monitor canary",
            "gradual rollout",
            "finish",
        ],
        DeployStrategy::BlueGreen => &["provision green", "switch traffic", "monitor", "finish"],
        DeployStrategy::Rolling => &[
            "batch rollout 1/3",
            "batch rollout 2/3",
            "batch rollout 3/3",
            "monitor",
            "finish",
        ],
    }
}

async fn simulate_rollout(
    repo: Arc<dyn clustergenie_store::DeploymentRepository>,
    publisher: Arc<dyn EventPublisher>,
    id: &str,
    failure_rate: f64,
    base_delay_ms: u64,
    jitter_ms: u64,
    rng: &mut StdRng,
) -> CoreResult<()> {
    let mut deployment = repo.get(id).await?;
    deployment.status = DeployStatus::InProgress;
    deployment.logs.push("Starting rollout".to_string());
    deployment = repo.update(deployment).await?;

    let steps = steps_for(deployment.strategy);
    for (i, step) in steps.iter().enumerate() {
        let jitter = if jitter_ms > 0 {
            rng.gen_range(0..jitter_ms)
        } else {
            0
        };
        tokio::time::sleep(Duration::from_millis(base_delay_ms + jitter)).await;

        deployment
            .logs
            .push(format!("{} - step {}/{}", step, i + 1, steps.len()));
        deployment = repo.update(deployment).await?;

        if step.starts_with("monitor") && rng.gen::<f64>() < failure_rate {
            deployment.status = DeployStatus::Failed;
            deployment
                .logs
                .push("Monitoring detected issues, triggering rollback".to_string());
            deployment = repo.update(deployment).await?;
            publish_deployment_event(&publisher, "deployment_failed", &deployment).await;

            tokio::time::sleep(ROLLBACK_PAUSE).await;
            deployment.status = DeployStatus::RolledBack;
            deployment
                .logs
                .push("Automatic rollback completed".to_string());
            repo.update(deployment).await?;
            return Ok(());
        }
    }

    deployment.status = DeployStatus::RolledOut;
    deployment
        .logs
        .push("Rollout completed successfully".to_string());
    deployment = repo.update(deployment).await?;
    publish_deployment_event(&publisher, "deployment_completed", &deployment).await;
    Ok(())
}

async fn publish_deployment_event(
    publisher: &Arc<dyn EventPublisher>,
    action: &str,
    deployment: &Deployment,
) {
    let mut payload = Map::new();
    if let Ok(value) = serde_json::to_value(deployment) {
        payload.insert("deployment".to_string(), value);
    }
    let event = Event::new(EventKind::Other(action.to_string()))
        .with_cluster(&deployment.cluster_id)
        .with_payload(payload);
    if let Err(e) = publisher
        .publish(DEPLOYMENTS_TOPIC, &deployment.id, &event)
        .await
    {
        warn!(deployment_id = %deployment.id, "failed to publish deployment event: {}", e);
    }
}
