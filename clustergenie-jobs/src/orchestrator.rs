//! Event orchestrator.
//!
//! Consumes committed `cluster-events` and advances jobs through typed
//! progress: `running` → `job_started` → `job_progress(30)` → side effect →
//! `job_progress(75)` → `job_completed`. The trace id of the inbound event is
//! propagated unchanged through everything it causes.

use anyhow::Result;
use async_trait::async_trait;
use clustergenie_core::errors::CoreResult;
use clustergenie_core::models::*;
use clustergenie_events::{Event, EventKind, EventPublisher, EventSink, CLUSTER_EVENTS_TOPIC};
use clustergenie_store::JobRepository;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Narrow capability interface the orchestrator holds on provisioning.
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    async fn create_droplet(&self, req: CreateDropletRequest) -> CoreResult<DropletResponse>;
    async fn scale_cluster(&self, cluster_id: &str, action: &str) -> CoreResult<()>;
}

pub struct EventHandler {
    job_repo: Arc<dyn JobRepository>,
    provisioner: Arc<dyn ClusterProvisioner>,
    publisher: Arc<dyn EventPublisher>,
}

impl EventHandler {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        provisioner: Arc<dyn ClusterProvisioner>,
        publisher: Arc<dyn EventPublisher>,
    ) -> EventHandler {
        EventHandler {
            job_repo,
            provisioner,
            publisher,
        }
    }

    async fn handle_job_requested(&self, event: Event) -> Result<()> {
        let job_id = event.job_id.clone();
        let job_type = event.job_type.clone();
        let cluster_id = event.cluster_id.clone();
        let trace_id = event.trace_id.clone();

        if !job_id.is_empty() {
            self.job_repo
                .update_status(&job_id, JobStatus::Running)
                .await?;
        }

        self.publish(
            EventKind::JobStarted,
            &job_id,
            &job_type,
            &cluster_id,
            0,
            "orchestration started",
            &trace_id,
        )
        .await;
        self.progress(&job_id, 10, "orchestration started").await?;
        self.publish(
            EventKind::JobProgress,
            &job_id,
            &job_type,
            &cluster_id,
            10,
            "orchestration started",
            &trace_id,
        )
        .await;

        let outcome = match job_type.as_str() {
            "provision" => {
                self.publish(
                    EventKind::JobProgress,
                    &job_id,
                    &job_type,
                    &cluster_id,
                    30,
                    "provisioning - initializing",
                    &trace_id,
                )
                .await;
                self.progress(&job_id, 30, "provision: initializing").await?;

                let suffix = &job_id[job_id.len().saturating_sub(8)..];
                let req = CreateDropletRequest {
                    name: format!("droplet-from-job-{}", suffix),
                    cluster_id: Some(cluster_id.clone()),
                    region: "nyc3".to_string(),
                    size: "s-1vcpu-1gb".to_string(),
                    image: "ubuntu-20-04-x64".to_string(),
                    provider: String::new(),
                };
                let result = self.provisioner.create_droplet(req).await.map(|_| ());
                if result.is_ok() {
                    self.publish(
                        EventKind::JobProgress,
                        &job_id,
                        &job_type,
                        &cluster_id,
                        75,
                        "provisioning - completing",
                        &trace_id,
                    )
                    .await;
                    self.progress(&job_id, 75, "provision: completing").await?;
                }
                result
            }
            "scale" => {
                self.publish(
                    EventKind::JobProgress,
                    &job_id,
                    &job_type,
                    &cluster_id,
                    30,
                    "scaling - initializing",
                    &trace_id,
                )
                .await;
                self.progress(&job_id, 30, "scale: initializing").await?;

                let result = self.provisioner.scale_cluster(&cluster_id, "scale_up").await;
                if result.is_ok() {
                    self.publish(
                        EventKind::JobProgress,
                        &job_id,
                        &job_type,
                        &cluster_id,
                        75,
                        "scaling - completing",
                        &trace_id,
                    )
                    .await;
                    self.progress(&job_id, 75, "scale: completing").await?;
                }
                result
            }
            other => {
                warn!("unhandled job type in orchestration: {}", other);
                Ok(())
            }
        };

        let completion_message = match &outcome {
            Ok(()) => "completed".to_string(),
            Err(e) => format!("failed: {}", e),
        };
        if !job_id.is_empty() {
            if outcome.is_err() {
                self.job_repo
                    .update_status(&job_id, JobStatus::Failed)
                    .await?;
            }
            self.job_repo
                .update_progress(&job_id, 100, &completion_message)
                .await?;
        }

        self.publish(
            EventKind::JobCompleted,
            &job_id,
            &job_type,
            &cluster_id,
            100,
            &completion_message,
            &trace_id,
        )
        .await;

        outcome.map_err(Into::into)
    }

    async fn handle_metric_threshold(&self, event: Event) -> Result<()> {
        if event.cluster_id.is_empty() {
            return Ok(());
        }
        info!(cluster_id = %event.cluster_id, "metric threshold exceeded, scaling up");
        self.provisioner
            .scale_cluster(&event.cluster_id, "scale_up")
            .await?;
        Ok(())
    }

    async fn progress(&self, job_id: &str, progress: u32, message: &str) -> Result<()> {
        if job_id.is_empty() {
            return Ok(());
        }
        self.job_repo.update_progress(job_id, progress, message).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn publish(
        &self,
        kind: EventKind,
        job_id: &str,
        job_type: &str,
        cluster_id: &str,
        progress: u32,
        message: &str,
        trace_id: &str,
    ) {
        let event = Event::new(kind)
            .with_job(job_id, job_type)
            .with_cluster(cluster_id)
            .with_progress(progress, message)
            .with_trace(trace_id);
        if let Err(e) = self
            .publisher
            .publish(CLUSTER_EVENTS_TOPIC, job_id, &event)
            .await
        {
            warn!(job_id = %job_id, "failed to publish orchestration event: {}", e);
        }
    }
}

#[async_trait]
impl EventSink for EventHandler {
    async fn handle(&self, event: Event) -> Result<()> {
        match &event.kind {
            EventKind::JobRequested => self.handle_job_requested(event).await,
            EventKind::MetricThresholdExceeded => self.handle_metric_threshold(event).await,
            EventKind::DropletCreated => {
                debug!(cluster_id = %event.cluster_id, "droplet created");
                Ok(())
            }
            // our own progress stream comes back through the topic
            EventKind::JobStarted | EventKind::JobProgress | EventKind::JobCompleted => Ok(()),
            EventKind::Other(t) => {
                info!("unknown event type: {}", t);
                Ok(())
            }
        }
    }
}
