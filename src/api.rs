//! HTTP surface for submitting and tracking pipeline jobs.
//!
//! - `GET /health` – Liveness probe.
//! - `POST /etl/jobs` – Resolve a [`JobRequest`] against the environment, register the job, and
//!   run it in the background. Configuration errors are rejected with `400` before anything runs.
//! - `GET /etl/jobs/:job_id` – Status, timing, error text, and run summary of one job.
//! - `GET /etl/jobs` – Every job known to this process.
//! - `GET /metrics` – Cumulative pipeline counters.
//!
//! Job state lives in memory and is lost on restart; durable per-object state is the status
//! sink's concern.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::config::{ConfigError, JobConfig, JobRequest, env_lookup};
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{Orchestrator, PipelineContext, RunSummary};
use crate::status::current_timestamp_rfc3339;

/// Lookup used to resolve job settings absent from the request body.
pub type SharedLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, not started yet.
    Submitted,
    /// Run in progress.
    Running,
    /// Run finished; individual objects may still have failed.
    Completed,
    /// Run aborted by a fatal error.
    Failed,
}

/// Tracked state of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    /// Job identifier, also used as the execution id of its run.
    pub job_id: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// RFC3339 start time once running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// RFC3339 end time once finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// Fatal error text for failed jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Run counters for completed jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

/// In-memory job table.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<String, JobRecord>>>,
}

const JOB_ID_ATTEMPTS: u32 = 8;

impl JobRegistry {
    /// Store `record` unless its id is already taken.
    async fn insert_new(&self, record: JobRecord) -> bool {
        match self.jobs.lock().await.entry(record.job_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Register a submitted job under the first free id `next_id` yields for an attempt number.
    async fn register(&self, mut next_id: impl FnMut(u32) -> String) -> Option<String> {
        for attempt in 0..JOB_ID_ATTEMPTS {
            let job_id = next_id(attempt);
            let record = JobRecord {
                job_id: job_id.clone(),
                status: JobStatus::Submitted,
                start_time: None,
                end_time: None,
                error: None,
                summary: None,
            };
            if self.insert_new(record).await {
                return Some(job_id);
            }
            tracing::warn!(job_id = %job_id, attempt, "Job id already taken; regenerating");
        }
        None
    }

    async fn update<F>(&self, job_id: &str, apply: F)
    where
        F: FnOnce(&mut JobRecord),
    {
        if let Some(record) = self.jobs.lock().await.get_mut(job_id) {
            apply(record);
        }
    }

    /// Record for `job_id`, if known.
    pub async fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.lock().await.get(job_id).cloned()
    }

    /// Every record, ordered by job id.
    pub async fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<_> = self.jobs.lock().await.values().cloned().collect();
        records.sort_by(|left, right| left.job_id.cmp(&right.job_id));
        records
    }
}

/// Shared state behind the router.
#[derive(Clone)]
pub struct ApiState {
    context: Arc<PipelineContext>,
    orchestrator: Arc<Orchestrator>,
    jobs: JobRegistry,
    lookup: SharedLookup,
}

impl ApiState {
    /// State resolving job settings from the process environment.
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self {
            orchestrator: Arc::new(Orchestrator::new(context.clone())),
            context,
            jobs: JobRegistry::default(),
            lookup: Arc::new(env_lookup),
        }
    }

    /// Replace the environment lookup.
    pub fn with_lookup(mut self, lookup: SharedLookup) -> Self {
        self.lookup = lookup;
        self
    }

    /// Job table.
    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    async fn execute(&self, job_id: String, job: JobConfig) {
        self.jobs
            .update(&job_id, |record| {
                record.status = JobStatus::Running;
                record.start_time = Some(current_timestamp_rfc3339());
            })
            .await;

        let outcome = self.orchestrator.run_as(&job, &job_id).await;
        let end_time = current_timestamp_rfc3339();
        match outcome {
            Ok(summary) => {
                tracing::info!(job_id = %job_id, "Job completed");
                self.jobs
                    .update(&job_id, |record| {
                        record.status = JobStatus::Completed;
                        record.end_time = Some(end_time);
                        record.summary = Some(summary);
                    })
                    .await;
            }
            Err(error) => {
                tracing::error!(job_id = %job_id, error = %error, "Job failed");
                self.jobs
                    .update(&job_id, |record| {
                        record.status = JobStatus::Failed;
                        record.end_time = Some(end_time);
                        record.error = Some(error.to_string());
                    })
                    .await;
            }
        }
    }
}

/// Build the HTTP router exposing the job API.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/etl/jobs", get(list_jobs).post(create_job))
        .route("/etl/jobs/:job_id", get(get_job))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// Response body for `POST /etl/jobs`.
#[derive(Serialize)]
struct JobSubmitted {
    job_id: String,
    status: JobStatus,
    message: String,
}

async fn create_job(
    State(state): State<ApiState>,
    Json(request): Json<JobRequest>,
) -> Result<Json<JobSubmitted>, AppError> {
    let job = JobConfig::resolve(&request, state.lookup.as_ref())?;
    let job_id = state
        .jobs
        .register(|attempt| generate_job_id(&request, attempt))
        .await
        .ok_or(AppError::IdUnavailable)?;

    tracing::info!(
        job_id = %job_id,
        operation = job.operation.as_str(),
        bucket = %job.bucket,
        "Job submitted"
    );

    let runner = state.clone();
    let spawned_id = job_id.clone();
    tokio::spawn(async move {
        runner.execute(spawned_id, job).await;
    });

    Ok(Json(JobSubmitted {
        job_id,
        status: JobStatus::Submitted,
        message: "ETL job submitted successfully".to_string(),
    }))
}

async fn get_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, AppError> {
    state
        .jobs
        .get(&job_id)
        .await
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// Response body for `GET /etl/jobs`.
#[derive(Serialize)]
struct JobsResponse {
    jobs: Vec<JobRecord>,
}

async fn list_jobs(State(state): State<ApiState>) -> Json<JobsResponse> {
    Json(JobsResponse {
        jobs: state.jobs.list().await,
    })
}

async fn get_metrics(State(state): State<ApiState>) -> Json<MetricsSnapshot> {
    Json(state.context.metrics.snapshot())
}

/// `job-{YYYYMMDD-HHMMSS}-{4 hex digits}` derived from the request and submission time.
fn generate_job_id(request: &JobRequest, attempt: u32) -> String {
    let now = OffsetDateTime::now_utc();
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(request).unwrap_or_default());
    hasher.update(now.unix_timestamp_nanos().to_le_bytes());
    hasher.update(attempt.to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    format!(
        "job-{:04}{:02}{:02}-{:02}{:02}{:02}-{}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        &digest[..4]
    )
}

enum AppError {
    Config(ConfigError),
    NotFound,
    IdUnavailable,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::Config(error) => (StatusCode::BAD_REQUEST, error.to_string()),
            Self::NotFound => (StatusCode::NOT_FOUND, "Job not found".to_string()),
            Self::IdUnavailable => (
                StatusCode::CONFLICT,
                "Could not allocate a unique job id".to_string(),
            ),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(inner: ConfigError) -> Self {
        Self::Config(inner)
    }
}
