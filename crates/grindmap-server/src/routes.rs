use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use grindmap_client::platforms::validate_username;
use grindmap_client::{Platform, SCRAPE_JOB_TYPE, ScrapeRequest};
use grindmap_core::classify::ErrorKind;
use grindmap_core::error::AppError;
use grindmap_core::job::{EnqueueOptions, JobError, JobStatus};
use grindmap_core::job_queue::JobQueue;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::dto::{
    CreateJobRequest, CreateJobResponse, HealthResponse, JobListResponse, JobResponse,
    JobStatsResponse, ListJobsQuery, PlatformInfo, PlatformsResponse, ScrapeQuery,
    ScrapeResponse,
};
use crate::error::{ApiError, status_for_kind};
use crate::openapi::ApiDoc;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the full router with all routes.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/scrape/platforms", get(list_platforms))
        .route("/api/scrape/{platform}/{username}", get(scrape_profile))
        .route("/api/jobs", get(list_jobs).post(create_job))
        .route("/api/jobs/stats", get(job_stats))
        .route("/api/jobs/{id}", get(get_job));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

async fn queue_counts(state: &AppState) -> Result<BTreeMap<String, u64>, AppError> {
    let mut counts = BTreeMap::new();
    for status in JobStatus::ALL {
        counts.insert(
            status.to_string(),
            state.engine.queue().count_by_status(status).await?,
        );
    }
    Ok(counts)
}

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

/// A scrape that could not produce stats.
struct ScrapeError {
    status: StatusCode,
    kind: String,
    message: String,
}

impl ScrapeError {
    fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "validation".to_string(),
            message: message.into(),
        }
    }
}

impl From<AppError> for ScrapeError {
    fn from(err: AppError) -> Self {
        let err = ApiError::from(err);
        let (status, kind) = err.parts();
        Self {
            status,
            kind,
            message: err.message(),
        }
    }
}

impl From<JobError> for ScrapeError {
    fn from(err: JobError) -> Self {
        Self {
            status: status_for_kind(err.kind),
            kind: err.kind.to_string(),
            message: err.message,
        }
    }
}

fn trace_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[utoipa::path(
    get,
    path = "/api/scrape/{platform}/{username}",
    params(
        ("platform" = String, Path, description = "CODECHEF, ATCODER or CODEFORCES"),
        ("username" = String, Path, description = "Profile handle"),
        ScrapeQuery,
    ),
    responses(
        (status = 200, description = "Profile stats", body = ScrapeResponse),
        (status = 400, description = "Invalid platform or username", body = ScrapeResponse),
        (status = 404, description = "User not found", body = ScrapeResponse),
        (status = 429, description = "Rate limited by the platform", body = ScrapeResponse),
        (status = 502, description = "Platform unreachable or unparsable", body = ScrapeResponse),
        (status = 504, description = "Timed out", body = ScrapeResponse),
    ),
    tag = "scrape"
)]
pub async fn scrape_profile(
    State(state): State<Arc<AppState>>,
    Path((platform, username)): Path<(String, String)>,
    Query(query): Query<ScrapeQuery>,
    headers: HeaderMap,
) -> Response {
    let trace_id = trace_id(&headers);
    let refresh = query.refresh.unwrap_or(false);

    let (status, body) = match run_scrape(&state, &platform, &username, refresh, &trace_id).await {
        Ok((data, cached)) => (StatusCode::OK, ScrapeResponse::success(data, cached, trace_id.clone())),
        Err(err) => {
            tracing::warn!(%trace_id, %platform, %username, kind = %err.kind, error = %err.message, "Scrape failed");
            (err.status, ScrapeResponse::failure(err.kind, err.message, trace_id.clone()))
        }
    };

    let mut response = (status, axum::Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn run_scrape(
    state: &AppState,
    platform: &str,
    username: &str,
    refresh: bool,
    trace_id: &str,
) -> Result<(serde_json::Value, bool), ScrapeError> {
    let platform: Platform = platform.parse().map_err(ScrapeError::validation)?;
    validate_username(username).map_err(|f| ScrapeError::validation(f.message))?;

    if !refresh && let Some(cached) = state.cache.get(platform, username).await {
        tracing::debug!(%trace_id, %platform, %username, "Serving cached stats");
        return Ok((cached, true));
    }

    let job_id = state
        .engine
        .enqueue(
            SCRAPE_JOB_TYPE,
            ScrapeRequest::new(platform, username).to_payload(),
            EnqueueOptions::default().with_max_retries(state.max_retries),
        )
        .await?;
    tracing::info!(%trace_id, %job_id, %platform, %username, "Scrape job enqueued");

    let job = state.engine.wait_for(job_id, state.request_timeout).await?;
    match job.status {
        JobStatus::Succeeded => Ok((job.result.unwrap_or_default(), false)),
        _ => Err(job
            .last_error
            .unwrap_or_else(|| JobError::new(ErrorKind::Unknown, "Job failed without an error"))
            .into()),
    }
}

#[utoipa::path(
    get,
    path = "/api/scrape/platforms",
    responses(
        (status = 200, description = "Supported platforms", body = PlatformsResponse),
    ),
    tag = "scrape"
)]
pub async fn list_platforms() -> impl IntoResponse {
    let platforms = Platform::ALL
        .iter()
        .map(|p| PlatformInfo {
            name: p.to_string(),
            uses_browser: p.uses_browser(),
        })
        .collect();
    axum::Json(PlatformsResponse { platforms })
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 202, description = "Job enqueued", body = CreateJobResponse),
        (status = 400, description = "Unknown job type", body = crate::dto::ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.engine.registered_types().contains(&body.job_type) {
        return Err(AppError::HandlerNotFound(body.job_type).into());
    }

    let mut options =
        EnqueueOptions::default().with_max_retries(body.max_retries.unwrap_or(state.max_retries));
    if let Some(ms) = body.delay_ms {
        options = options.with_delay(Duration::from_millis(ms));
    }

    let job_id = state.engine.enqueue(body.job_type, body.payload, options).await?;
    let job = state
        .engine
        .queue()
        .get_job(job_id)
        .await?
        .ok_or(AppError::JobNotFound(job_id))?;

    let response = CreateJobResponse {
        job_id,
        status: job.status.to_string(),
    };

    Ok((StatusCode::ACCEPTED, axum::Json(response)))
}

#[utoipa::path(
    get,
    path = "/api/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "List of jobs", body = JobListResponse),
        (status = 400, description = "Unknown status", body = crate::dto::ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status_filter = query
        .status
        .map(|s| s.parse::<JobStatus>().map_err(ApiError::BadRequest))
        .transpose()?;

    let limit = query.limit.unwrap_or(20).min(100);
    let jobs = state.engine.queue().list_jobs(status_filter, limit).await?;
    let total = jobs.len();

    let response = JobListResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/api/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job details", body = JobResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .engine
        .queue()
        .get_job(id)
        .await?
        .ok_or(AppError::JobNotFound(id))?;

    Ok(axum::Json(JobResponse::from(job)))
}

#[utoipa::path(
    get,
    path = "/api/jobs/stats",
    responses(
        (status = 200, description = "Job counts and latest analytics", body = JobStatsResponse),
    ),
    tag = "jobs"
)]
pub async fn job_stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let response = JobStatsResponse {
        counts: queue_counts(&state).await?,
        analytics: state.analytics.latest(),
    };
    Ok(axum::Json(response))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is shutting down", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let pool = state.pool.stats();
    let status = if pool.closed {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let response = HealthResponse {
        status: if pool.closed { "shutting_down" } else { "healthy" },
        processing: state.engine.is_processing(),
        pool: pool.into(),
        queue: queue_counts(&state).await?,
        cached_profiles: state.cache.len().await,
    };

    Ok((status, axum::Json(response)))
}
