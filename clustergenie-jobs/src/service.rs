//! Job lifecycle service.
//!
//! Jobs are persisted `pending`, enqueued on the worker pool (`queued`), and
//! processed by type: `provision` and `scale` publish a typed `job_requested`
//! event and wait for the orchestrator; `diagnose` and `monitor` simulate the
//! work locally. Terminal classification feeds the processing histogram and
//! the processed counter.

use clustergenie_core::errors::{CoreResult, JobError};
use clustergenie_core::models::*;
use clustergenie_core::Metrics;
use clustergenie_events::{Event, EventKind, EventPublisher, CLUSTER_EVENTS_TOPIC};
use clustergenie_store::JobRepository;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{error, warn};

use crate::pool::{JobHandler, WorkerPool};

const DIAGNOSE_STEPS: u32 = 3;
const DIAGNOSE_STEP_DELAY: Duration = Duration::from_millis(700);
const MONITOR_DELAY: Duration = Duration::from_secs(1);

pub struct JobService {
    repo: Arc<dyn JobRepository>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Metrics,
    pool: WorkerPool,
}

/// Worker-pool handler that routes dequeued ids back into the service.
struct ProcessHandler {
    service: Weak<JobService>,
}

#[async_trait::async_trait]
impl JobHandler for ProcessHandler {
    async fn handle(&self, job_id: String) {
        let Some(service) = self.service.upgrade() else {
            return;
        };
        if let Err(e) = service.process(&job_id).await {
            error!(job_id = %job_id, "failed to process job: {}", e);
        }
    }
}

impl JobService {
    /// Build the service with its worker pool. The pool's handler holds a
    /// weak reference back into the service, so wiring is fixed at
    /// construction; call [`JobService::worker_pool`]`().start()` to begin
    /// draining.
    pub fn new(
        repo: Arc<dyn JobRepository>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Metrics,
        worker_count: usize,
        queue_size: usize,
    ) -> Arc<JobService> {
        Arc::new_cyclic(|weak: &Weak<JobService>| {
            let pool = WorkerPool::new(
                worker_count,
                queue_size,
                Arc::new(ProcessHandler {
                    service: weak.clone(),
                }),
            );
            JobService {
                repo,
                publisher,
                metrics,
                pool,
            }
        })
    }

    pub fn worker_pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Validate, persist and enqueue a job. A full queue persists the job as
    /// `queued_rejected` and surfaces the overflow.
    pub async fn create(&self, req: &CreateJobRequest) -> CoreResult<JobResponse> {
        let job_type = JobType::parse(&req.job_type).ok_or(JobError::InvalidType)?;
        let job = self.repo.create(job_type, &req.parameters).await?;

        if !self.pool.submit(&job.id) {
            self.repo
                .update_status(&job.id, JobStatus::QueuedRejected)
                .await?;
            self.metrics
                .jobs_processed
                .with_label_values(&[job_type.as_str(), "rejected"])
                .inc();
            return Err(JobError::QueueFull.into());
        }
        self.repo.update_status(&job.id, JobStatus::Queued).await?;

        let job = self.repo.get(&job.id).await?;
        Ok(JobResponse {
            job,
            message: "Job created successfully".to_string(),
        })
    }

    pub async fn get(&self, id: &str) -> CoreResult<Job> {
        self.repo.get(id).await
    }

    pub async fn list(&self, req: &ListJobsRequest) -> CoreResult<ListJobsResponse> {
        self.repo.list(req).await
    }

    /// Worker entry point. The job must still be `pending`; processing runs
    /// in its own task so a panic marks the job failed instead of taking the
    /// worker down with it.
    pub async fn process(self: &Arc<Self>, id: &str) -> CoreResult<()> {
        let job = self.repo.get(id).await?;
        if job.status != JobStatus::Pending && job.status != JobStatus::Queued {
            return Err(JobError::NotPending.into());
        }
        self.repo.update_status(id, JobStatus::Running).await?;

        let started = Instant::now();
        let service = self.clone();
        let dispatched = job.clone();
        let outcome =
            tokio::spawn(async move { service.dispatch(dispatched).await }).await;

        let final_status = match outcome {
            Ok(Ok(handed_to_orchestrator)) => {
                if handed_to_orchestrator {
                    // already parked in `queued` before the publish; writing it
                    // again here could overwrite the orchestrator's transitions
                    JobStatus::Queued
                } else {
                    self.repo.update_status(id, JobStatus::Completed).await?;
                    JobStatus::Completed
                }
            }
            Ok(Err(e)) => {
                warn!(job_id = %id, "job failed: {}", e);
                self.repo.update_status(id, JobStatus::Failed).await?;
                self.repo
                    .update_progress(id, 100, &format!("failed: {}", e))
                    .await?;
                JobStatus::Failed
            }
            Err(join_err) => {
                error!(job_id = %id, "job processing panicked: {}", join_err);
                self.repo.update_status(id, JobStatus::Failed).await?;
                JobStatus::Failed
            }
        };

        let status_label = match final_status {
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            _ => "queued",
        };
        self.metrics
            .jobs_processed
            .with_label_values(&[job.job_type.as_str(), status_label])
            .inc();
        self.metrics
            .job_processing_seconds
            .with_label_values(&[job.job_type.as_str(), status_label])
            .observe(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Returns whether the job was handed off to the orchestrator.
    async fn dispatch(self: Arc<Self>, job: Job) -> CoreResult<bool> {
        match job.job_type {
            JobType::Provision | JobType::Scale => {
                self.publish_job_requested(&job).await?;
                Ok(true)
            }
            JobType::Diagnose => {
                self.run_diagnose(&job).await?;
                Ok(false)
            }
            JobType::Monitor => {
                self.run_monitor(&job).await?;
                Ok(false)
            }
        }
    }

    /// Hand a provision/scale job to the orchestration pipeline. The job is
    /// marked `queued` before the publish so the orchestrator's own
    /// transitions cannot be overwritten afterwards.
    async fn publish_job_requested(&self, job: &Job) -> CoreResult<()> {
        let params = parse_parameters(&job.parameters)?;
        let cluster_id = params
            .get("cluster_id")
            .cloned()
            .ok_or(JobError::ClusterIdRequired)?;

        self.repo.update_status(&job.id, JobStatus::Queued).await?;

        let mut payload = Map::new();
        for (k, v) in &params {
            payload.insert(k.clone(), Value::String(v.clone()));
        }
        let event = Event::new(EventKind::JobRequested)
            .with_job(&job.id, job.job_type.as_str())
            .with_cluster(&cluster_id)
            .with_payload(payload)
            .with_trace(&job.trace_id);

        self.publisher
            .publish(CLUSTER_EVENTS_TOPIC, &job.id, &event)
            .await?;
        Ok(())
    }

    async fn run_diagnose(&self, job: &Job) -> CoreResult<()> {
        self.publish_progress_event(job, EventKind::JobStarted, 0, "diagnosis started")
            .await;

        for step in 1..=DIAGNOSE_STEPS {
            tokio::time::sleep(DIAGNOSE_STEP_DELAY).await;
            let progress = step * 100 / DIAGNOSE_STEPS;
            self.repo
                .update_progress(&job.id, progress, "diagnosis step completed")
                .await?;
            self.publish_progress_event(job, EventKind::JobProgress, progress, "diagnosis in-progress")
                .await;
        }

        self.repo
            .update_progress(&job.id, 100, "diagnosis completed")
            .await?;
        self.publish_progress_event(job, EventKind::JobCompleted, 100, "diagnosis completed")
            .await;
        Ok(())
    }

    async fn run_monitor(&self, job: &Job) -> CoreResult<()> {
        self.publish_progress_event(job, EventKind::JobStarted, 0, "monitoring started")
            .await;

        tokio::time::sleep(MONITOR_DELAY).await;
        self.repo
            .update_progress(&job.id, 100, "monitoring completed")
            .await?;

        self.publish_progress_event(job, EventKind::JobCompleted, 100, "monitoring completed")
            .await;
        Ok(())
    }

    async fn publish_progress_event(
        &self,
        job: &Job,
        kind: EventKind,
        progress: u32,
        message: &str,
    ) {
        let event = Event::new(kind)
            .with_job(&job.id, job.job_type.as_str())
            .with_cluster(&job.cluster_id)
            .with_progress(progress, message)
            .with_trace(&job.trace_id);
        if let Err(e) = self
            .publisher
            .publish(CLUSTER_EVENTS_TOPIC, &job.id, &event)
            .await
        {
            warn!(job_id = %job.id, "failed to publish progress event: {}", e);
        }
    }
}

fn parse_parameters(raw: &str) -> CoreResult<HashMap<String, String>> {
    if raw.is_empty() {
        return Ok(HashMap::new());
    }
    serde_json::from_str(raw).map_err(|_| JobError::InvalidParameters.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustergenie_events::{Broker, LocalEventBus};
    use clustergenie_store::MemoryJobRepository;

    fn service_with_bus(
        workers: usize,
        queue: usize,
    ) -> (Arc<JobService>, Arc<LocalEventBus>, Arc<Broker>) {
        let broker = Arc::new(Broker::new());
        let bus = Arc::new(LocalEventBus::new(broker.clone()));
        let service = JobService::new(
            Arc::new(MemoryJobRepository::new()),
            bus.clone(),
            Metrics::new().unwrap(),
            workers,
            queue,
        );
        (service, bus, broker)
    }

    fn monitor_request() -> CreateJobRequest {
        CreateJobRequest {
            job_type: "monitor".to_string(),
            parameters: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn rejects_unknown_job_type() {
        let (service, _bus, _broker) = service_with_bus(1, 10);
        let err = service
            .create(&CreateJobRequest {
                job_type: "reticulate".to_string(),
                parameters: HashMap::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid job type");
    }

    #[tokio::test]
    async fn created_jobs_are_queued() {
        let (service, _bus, _broker) = service_with_bus(1, 10);
        let resp = service.create(&monitor_request()).await.unwrap();
        assert_eq!(resp.job.status, JobStatus::Queued);
        assert_eq!(resp.job.progress, 0);
        assert!(!resp.job.trace_id.is_empty());
    }

    #[tokio::test]
    async fn queue_overflow_persists_rejection_and_counts_it() {
        // one slot, workers never started: the first job occupies the queue
        let (service, _bus, _broker) = service_with_bus(1, 1);

        let first = service.create(&monitor_request()).await.unwrap();
        assert_eq!(first.job.status, JobStatus::Queued);

        let err = service.create(&monitor_request()).await.unwrap_err();
        assert_eq!(err.to_string(), "job queue full");

        let listed = service.list(&ListJobsRequest::default()).await.unwrap();
        let rejected: Vec<_> = listed
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::QueuedRejected)
            .collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(
            service.metrics.jobs_processed_count("monitor", "rejected"),
            1.0
        );
    }

    #[tokio::test]
    async fn process_guards_on_status() {
        let (service, _bus, _broker) = service_with_bus(1, 10);
        let resp = service.create(&monitor_request()).await.unwrap();

        // drive it to completion manually
        service.process(&resp.job.id).await.unwrap();
        let job = service.get(&resp.job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let err = service.process(&resp.job.id).await.unwrap_err();
        assert_eq!(err.to_string(), "job is not in pending status");
    }

    #[tokio::test]
    async fn diagnose_progress_is_monotonic_and_completes() {
        let (service, _bus, _broker) = service_with_bus(1, 10);
        let resp = service
            .create(&CreateJobRequest {
                job_type: "diagnose".to_string(),
                parameters: HashMap::new(),
            })
            .await
            .unwrap();
        let id = resp.job.id.clone();

        let observer = {
            let service = service.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let mut last = 0;
                loop {
                    let job = service.get(&id).await.unwrap();
                    assert!(job.progress >= last, "progress must never decrease");
                    last = job.progress;
                    if job.status.is_terminal() {
                        return job;
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            })
        };

        service.process(&id).await.unwrap();
        let job = observer.await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn diagnose_emits_ordered_events_with_stable_trace() {
        let (service, bus, _broker) = service_with_bus(1, 10);
        let mut rx = bus.subscribe_topic(CLUSTER_EVENTS_TOPIC);

        let resp = service
            .create(&CreateJobRequest {
                job_type: "diagnose".to_string(),
                parameters: HashMap::new(),
            })
            .await
            .unwrap();
        service.process(&resp.job.id).await.unwrap();

        let mut kinds = Vec::new();
        let mut traces = Vec::new();
        let mut progress = Vec::new();
        while let Ok(e) = rx.try_recv() {
            kinds.push(e.kind.clone());
            traces.push(e.trace_id.clone());
            progress.push(e.progress.unwrap_or(0));
        }

        assert_eq!(kinds.first(), Some(&EventKind::JobStarted));
        assert_eq!(kinds.last(), Some(&EventKind::JobCompleted));
        let progress_events: Vec<u32> = progress[1..progress.len() - 1].to_vec();
        assert!(
            progress_events.windows(2).all(|w| w[0] < w[1]),
            "job_progress must be strictly increasing: {:?}",
            progress_events
        );
        assert!(
            traces.iter().all(|t| t == &resp.job.trace_id),
            "trace id must propagate unchanged"
        );
    }

    #[tokio::test]
    async fn scale_without_cluster_id_fails() {
        let (service, _bus, _broker) = service_with_bus(1, 10);
        let resp = service
            .create(&CreateJobRequest {
                job_type: "scale".to_string(),
                parameters: HashMap::new(),
            })
            .await
            .unwrap();

        service.process(&resp.job.id).await.unwrap();
        let job = service.get(&resp.job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 100);
        assert!(job.result.contains("cluster_id required"));
    }

    #[tokio::test]
    async fn scale_publishes_job_requested_and_parks_in_queued() {
        let (service, bus, _broker) = service_with_bus(1, 10);
        let mut rx = bus.subscribe_topic(CLUSTER_EVENTS_TOPIC);

        let mut params = HashMap::new();
        params.insert("cluster_id".to_string(), "c1".to_string());
        let resp = service
            .create(&CreateJobRequest {
                job_type: "scale".to_string(),
                parameters: params,
            })
            .await
            .unwrap();
        service.process(&resp.job.id).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::JobRequested);
        assert_eq!(event.cluster_id, "c1");
        assert_eq!(event.trace_id, resp.job.trace_id);

        let job = service.get(&resp.job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn pool_drives_jobs_end_to_end() {
        let (service, _bus, _broker) = service_with_bus(2, 10);
        service.worker_pool().start();

        let resp = service.create(&monitor_request()).await.unwrap();

        // monitor sleeps one second; give the worker room
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if service.get(&resp.job.id).await.unwrap().status == JobStatus::Completed {
                break;
            }
        }
        let job = service.get(&resp.job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        service
            .worker_pool()
            .stop(Duration::from_millis(10))
            .await;
    }
}
