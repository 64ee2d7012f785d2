use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use grindmap_core::job::Job;
use grindmap_core::pool::PoolStats;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::AnalyticsSnapshot;

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct ScrapeQuery {
    /// Skip the stats cache and scrape again.
    pub refresh: Option<bool>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ScrapeErrorBody {
    /// Error kind (`user_not_found`, `rate_limit`, `validation`, ...).
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ScrapeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ScrapeErrorBody>,
    /// Served from the stats cache.
    pub cached: bool,
    pub trace_id: String,
}

impl ScrapeResponse {
    pub fn success(data: serde_json::Value, cached: bool, trace_id: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            cached,
            trace_id,
        }
    }

    pub fn failure(kind: String, message: String, trace_id: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ScrapeErrorBody { kind, message }),
            cached: false,
            trace_id,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PlatformInfo {
    pub name: String,
    pub uses_browser: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PlatformsResponse {
    pub platforms: Vec<PlatformInfo>,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateJobRequest {
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub max_retries: Option<u32>,
    /// Delay before the first attempt, in milliseconds.
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobErrorResponse {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: u32,
    pub max_retries: u32,
    pub next_run_at: DateTime<Utc>,
    pub last_error: Option<JobErrorResponse>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            payload: job.payload,
            status: job.status.to_string(),
            attempts: job.attempts,
            max_retries: job.max_retries,
            next_run_at: job.next_run_at,
            last_error: job.last_error.map(|e| JobErrorResponse {
                kind: e.kind.to_string(),
                message: e.message,
            }),
            result: job.result,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            worker_id: job.worker_id,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobStatsResponse {
    pub counts: BTreeMap<String, u64>,
    /// Latest snapshot taken by the `analytics` job.
    pub analytics: Option<AnalyticsSnapshot>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PoolHealth {
    pub browsers: usize,
    pub busy_browsers: usize,
    pub pages_in_use: usize,
    pub launching: usize,
    pub total_launches: u64,
    pub closed: bool,
}

impl From<PoolStats> for PoolHealth {
    fn from(stats: PoolStats) -> Self {
        Self {
            browsers: stats.browsers,
            busy_browsers: stats.busy_browsers,
            pages_in_use: stats.pages_in_use,
            launching: stats.launching,
            total_launches: stats.total_launches,
            closed: stats.closed,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub processing: bool,
    pub pool: PoolHealth,
    pub queue: BTreeMap<String, u64>,
    pub cached_profiles: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
