use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Clip Clash Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::jobs::process_vote_queue,
        crate::routes::jobs::advance_slot,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::jobs::DrainReport,
            crate::dto::jobs::JobSkipped,
            crate::dto::jobs::AdvanceRequest,
            crate::dto::jobs::AdvanceReport,
            crate::queue::QueueHealth,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "jobs", description = "Scheduled job trigger endpoints"),
    )
)]
pub struct ApiDoc;
