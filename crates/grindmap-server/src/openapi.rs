use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "GrindMap API",
        version = "0.1.0",
        description = "Competitive-programming profile stats, scraped through a shared headless browser pool."
    ),
    paths(
        crate::routes::scrape_profile,
        crate::routes::list_platforms,
        crate::routes::create_job,
        crate::routes::list_jobs,
        crate::routes::get_job,
        crate::routes::job_stats,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::ScrapeResponse,
        crate::dto::ScrapeErrorBody,
        crate::dto::PlatformInfo,
        crate::dto::PlatformsResponse,
        crate::dto::CreateJobRequest,
        crate::dto::CreateJobResponse,
        crate::dto::JobErrorResponse,
        crate::dto::JobResponse,
        crate::dto::JobListResponse,
        crate::dto::JobStatsResponse,
        crate::dto::PoolHealth,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
        crate::jobs::AnalyticsSnapshot,
    )),
    tags(
        (name = "scrape", description = "On-demand profile scraping"),
        (name = "jobs", description = "Job queue inspection and enqueue"),
        (name = "system", description = "Health and system status"),
    )
)]
pub struct ApiDoc;
